// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime-directory watcher.
//!
//! Converges the registered channel set to the artifacts currently on
//! disk: `notify` events and a polling fallback both wake the same
//! rescan-and-diff pass, so a daemon restarted over a populated
//! directory synthesizes register events for everything already there.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::paths::{classify, Artifact, RuntimePaths};

/// Register/deregister events emitted as artifacts appear and
/// disappear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// An `in*` artifact appeared; a reader should be registered.
    InputAdded { path: PathBuf, channel: String },
    /// A registered `in*` artifact disappeared.
    InputRemoved { path: PathBuf },
    /// An `out.<name>` artifact appeared. Observed for auditing only —
    /// the daemon opens these lazily on routed writes.
    OutputAdded { path: PathBuf, channel: String },
    /// An `out.<name>` artifact disappeared.
    OutputRemoved { path: PathBuf },
}

pub struct DirWatcher {
    paths: RuntimePaths,
    poll_interval: Duration,
    known: BTreeMap<PathBuf, Artifact>,
}

impl DirWatcher {
    pub fn new(paths: RuntimePaths) -> Self {
        Self { paths, poll_interval: Duration::from_secs(5), known: BTreeMap::new() }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Scan the directory once and emit one event per difference
    /// between the on-disk artifact set and the known set.
    fn scan(&mut self) -> Vec<WatchEvent> {
        let mut present = BTreeMap::new();
        if let Ok(entries) = std::fs::read_dir(self.paths.root()) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if let Some(artifact) = classify(name) {
                    present.insert(entry.path(), artifact);
                }
            }
        }

        let mut events = Vec::new();
        for (path, artifact) in &present {
            if !self.known.contains_key(path) {
                events.push(match artifact {
                    Artifact::Input { channel } => {
                        WatchEvent::InputAdded { path: path.clone(), channel: channel.clone() }
                    }
                    Artifact::Output { channel } => {
                        WatchEvent::OutputAdded { path: path.clone(), channel: channel.clone() }
                    }
                });
            }
        }
        for (path, artifact) in &self.known {
            if !present.contains_key(path) {
                events.push(match artifact {
                    Artifact::Input { .. } => WatchEvent::InputRemoved { path: path.clone() },
                    Artifact::Output { .. } => WatchEvent::OutputRemoved { path: path.clone() },
                });
            }
        }
        self.known = present;
        events
    }

    /// Run until shutdown, sending events to `event_tx`.
    ///
    /// The first pass runs before any waiting, so artifacts already
    /// present at startup register immediately.
    pub async fn run(mut self, event_tx: mpsc::Sender<WatchEvent>, shutdown: CancellationToken) {
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
        let _watcher = self.setup_notify_watcher(wake_tx);

        let mut poll = tokio::time::interval(self.poll_interval);

        loop {
            for event in self.scan() {
                if event_tx.send(event).await.is_err() {
                    return;
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = wake_rx.recv() => {}
                _ = poll.tick() => {}
            }
        }
    }

    /// Set up a `notify` watcher on the runtime directory, used purely
    /// as a wakeup. Returns the watcher handle (must be kept alive).
    fn setup_notify_watcher(
        &self,
        wake_tx: mpsc::Sender<()>,
    ) -> Option<notify::RecommendedWatcher> {
        use notify::{RecursiveMode, Watcher};

        let mut watcher = notify::recommended_watcher(move |_: notify::Result<notify::Event>| {
            let _ = wake_tx.try_send(());
        })
        .ok()?;

        watcher.watch(self.paths.root(), RecursiveMode::NonRecursive).ok()?;
        Some(watcher)
    }
}

#[cfg(test)]
#[path = "watch_tests.rs"]
mod tests;
