// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal session controller.
//!
//! Every tmux invocation lives here, and this controller is the single
//! writer to the agent pane. The tmux session is a process-external
//! resource: the daemon creates it once, then acts as a client, which
//! is what lets the daemon restart without restarting the agent.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context;

pub struct TmuxController {
    session: String,
    socket: Option<PathBuf>,
}

impl TmuxController {
    pub fn new(session: impl Into<String>) -> Self {
        Self { session: session.into(), socket: None }
    }

    /// Target a specific tmux server socket (`tmux -S`) instead of the
    /// user's default server. Tests use this for isolation.
    pub fn with_socket(session: impl Into<String>, socket: Option<PathBuf>) -> Self {
        Self { session: session.into(), socket }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// Build a `std::process::Command` for tmux, prepending `-S <socket>` if set.
    fn cmd(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new("tmux");
        if let Some(ref socket) = self.socket {
            cmd.arg("-S").arg(socket);
        }
        cmd
    }

    /// Build a `tokio::process::Command` for tmux, prepending `-S <socket>` if set.
    fn async_cmd(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("tmux");
        if let Some(ref socket) = self.socket {
            cmd.arg("-S").arg(socket);
        }
        cmd
    }

    /// Verify the tmux binary is reachable. Startup-fatal when missing.
    pub fn check_binary(&self) -> anyhow::Result<()> {
        match std::process::Command::new("tmux")
            .arg("-V")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                anyhow::bail!("tmux is not installed or not in PATH")
            }
            Err(e) => Err(anyhow::Error::new(e).context("failed to invoke tmux")),
        }
    }

    pub fn session_exists(&self) -> bool {
        self.cmd()
            .args(["has-session", "-t", &self.session])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Attach to the named session, creating it (and launching
    /// `command` in its single pane) when absent. Returns `true` when
    /// the session was created. Idempotent.
    pub fn ensure_session(&self, command: &[String]) -> anyhow::Result<bool> {
        if self.session_exists() {
            return Ok(false);
        }

        let status = self
            .cmd()
            .args(["new-session", "-d", "-s", &self.session])
            .args(command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .context("spawn tmux new-session")?;
        anyhow::ensure!(status.success(), "tmux new-session failed for '{}'", self.session);

        // Keep a dead pane around so the supervisor can respawn in place.
        let _ = self
            .cmd()
            .args(["set-option", "-t", &self.session, "remain-on-exit", "on"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        Ok(true)
    }

    /// Inject `text` verbatim into the pane. `-l` disables key-name
    /// lookup and the `--` guard protects leading dashes, so quoting,
    /// backticks, and shell metacharacters pass through unchanged.
    pub async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        let status = self
            .async_cmd()
            .args(["send-keys", "-l", "-t", &self.session, "--"])
            .arg(text)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .context("spawn tmux send-keys")?;
        anyhow::ensure!(status.success(), "tmux send-keys failed");
        Ok(())
    }

    /// Submit the buffered input. Deliberately a separate invocation
    /// from [`send_text`]: a combined call would type "Enter" as text.
    ///
    /// [`send_text`]: TmuxController::send_text
    pub async fn send_enter(&self) -> anyhow::Result<()> {
        let status = self
            .async_cmd()
            .args(["send-keys", "-t", &self.session, "Enter"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .context("spawn tmux send-keys")?;
        anyhow::ensure!(status.success(), "tmux send-keys Enter failed");
        Ok(())
    }

    /// Currently visible pane contents as text.
    pub async fn capture_pane(&self) -> anyhow::Result<String> {
        let output = self
            .async_cmd()
            .args(["capture-pane", "-p", "-t", &self.session])
            .output()
            .await
            .context("spawn tmux capture-pane")?;
        anyhow::ensure!(output.status.success(), "tmux capture-pane failed");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Duplicate pane output into the FIFO at `tap`. Replaces any
    /// previous pipe, so it is safe to re-issue after a respawn.
    pub fn mount_stdout_tap(&self, tap: &Path) -> anyhow::Result<()> {
        let sink = format!("cat >> '{}'", tap.display());
        let status = self
            .cmd()
            .args(["pipe-pane", "-t", &self.session, "-O", &sink])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .context("spawn tmux pipe-pane")?;
        anyhow::ensure!(status.success(), "tmux pipe-pane failed");
        Ok(())
    }

    /// Best-effort pid of the pane's root process (the agent).
    pub fn pane_pid(&self) -> Option<u32> {
        let output = self
            .cmd()
            .args(["display-message", "-p", "-t", &self.session, "#{pane_pid}"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        text.trim().parse().ok()
    }

    /// True when tmux reports the pane's process has exited
    /// (remain-on-exit keeps the dead pane visible).
    pub fn pane_dead(&self) -> bool {
        let Ok(output) = self
            .cmd()
            .args(["display-message", "-p", "-t", &self.session, "#{pane_dead}"])
            .output()
        else {
            return false;
        };
        output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "1"
    }

    /// Epoch-seconds timestamp of the most recent keystroke from any
    /// attached client, or `None` when no client is attached.
    ///
    /// `send-keys` is a tmux server command and never advances a
    /// client's activity clock, so this observes only human keystrokes
    /// — the injection path stays invisible here by construction.
    pub fn last_client_activity(&self) -> Option<u64> {
        let output = self
            .cmd()
            .args(["list-clients", "-t", &self.session, "-F", "#{client_activity}"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse::<u64>().ok())
            .max()
    }

    /// Relaunch `command` in the existing pane, killing any remnant.
    pub fn respawn(&self, command: &[String]) -> anyhow::Result<()> {
        let status = self
            .cmd()
            .args(["respawn-pane", "-k", "-t", &self.session])
            .args(command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .context("spawn tmux respawn-pane")?;
        anyhow::ensure!(status.success(), "tmux respawn-pane failed");
        Ok(())
    }
}
