// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime directory layout and artifact naming.
//!
//! A single configured directory holds every channel artifact and
//! endpoint: the daemon-created `in` pipe and stream sockets, the
//! producer-created `in.<name>`/`out.<name>` pipes, the structured
//! event log, and the stdout tap FIFO.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use nix::sys::stat::Mode;

/// Channel name for the default `in` pipe.
pub const DEFAULT_CHANNEL: &str = "default";

/// Kind of producer artifact found in the runtime directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// `in` or `in.<name>`: producer→daemon pipe.
    Input { channel: String },
    /// `out.<name>`: daemon→producer pipe, producer-created.
    Output { channel: String },
}

/// Classify a runtime-directory file name. Unknown names return `None`
/// and are ignored by the watcher.
pub fn classify(name: &str) -> Option<Artifact> {
    if name == "in" {
        return Some(Artifact::Input { channel: DEFAULT_CHANNEL.to_string() });
    }
    if let Some(rest) = name.strip_prefix("in.") {
        if !rest.is_empty() {
            return Some(Artifact::Input { channel: rest.to_string() });
        }
    }
    if let Some(rest) = name.strip_prefix("out.") {
        if !rest.is_empty() {
            return Some(Artifact::Output { channel: rest.to_string() });
        }
    }
    None
}

/// Path map over the configured runtime directory.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    root: PathBuf,
}

impl RuntimePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Default input pipe, daemon-created.
    pub fn input_pipe(&self) -> PathBuf {
        self.root.join("in")
    }

    /// Named input pipe, producer-created.
    pub fn named_input(&self, channel: &str) -> PathBuf {
        self.root.join(format!("in.{channel}"))
    }

    /// Named output pipe, producer-created.
    pub fn output_pipe(&self, channel: &str) -> PathBuf {
        self.root.join(format!("out.{channel}"))
    }

    /// Hook-to-daemon control endpoint.
    pub fn control_socket(&self) -> PathBuf {
        self.root.join("control.sock")
    }

    /// Turn broadcast endpoint.
    pub fn output_socket(&self) -> PathBuf {
        self.root.join("output.sock")
    }

    /// Structured event log.
    pub fn event_log(&self) -> PathBuf {
        self.root.join("events.jsonl")
    }

    /// FIFO receiving the pane stdout tap (`tmux pipe-pane`).
    pub fn stdout_tap(&self) -> PathBuf {
        self.root.join("agent.tap")
    }

    /// Create the runtime directory (owner-only) and the daemon-owned
    /// artifacts; remove stale endpoints from a previous run.
    ///
    /// Producer-owned `in.<name>`/`out.<name>` pipes are never created
    /// here.
    pub fn ensure(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("create runtime directory {}", self.root.display()))?;
        std::fs::set_permissions(&self.root, std::fs::Permissions::from_mode(0o700))?;

        for sock in [self.control_socket(), self.output_socket()] {
            if sock.exists() {
                std::fs::remove_file(&sock)
                    .with_context(|| format!("remove stale endpoint {}", sock.display()))?;
            }
        }

        for fifo in [self.input_pipe(), self.stdout_tap()] {
            ensure_fifo(&fifo)?;
        }

        Ok(())
    }

    /// Unlink every endpoint file the daemon created. Producer-owned
    /// artifacts are left alone.
    pub fn cleanup(&self) {
        for path in [
            self.input_pipe(),
            self.stdout_tap(),
            self.control_socket(),
            self.output_socket(),
        ] {
            let _ = std::fs::remove_file(&path);
        }
    }
}

/// Create a FIFO at `path` if absent, replacing any non-FIFO file that
/// squats on the name.
fn ensure_fifo(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => return Ok(()),
        Ok(_) => {
            std::fs::remove_file(path)
                .with_context(|| format!("replace non-pipe artifact {}", path.display()))?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("stat {}", path.display())),
    }
    nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o600))
        .with_context(|| format!("mkfifo {}", path.display()))?;
    Ok(())
}

/// Default runtime root: `$XDG_RUNTIME_DIR/roost`, falling back to
/// `~/.roost`.
pub fn default_root() -> PathBuf {
    if let Ok(runtime) = std::env::var("XDG_RUNTIME_DIR") {
        if !runtime.is_empty() {
            return PathBuf::from(runtime).join("roost");
        }
    }
    let home = std::env::var("HOME").unwrap_or_default();
    PathBuf::from(home).join(".roost")
}

#[cfg(test)]
#[path = "paths_tests.rs"]
mod tests;
