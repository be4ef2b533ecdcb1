// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Readiness detection.
//!
//! Fuses two signals into a three-valued state: silence on the pane
//! stdout tap (primary — the agent repaints the terminal several times
//! a second while generating) and confirmation markers in a pane
//! snapshot. The configured ready-prompt glyph is advisory only; it is
//! buried in escape sequences on the byte stream and never gates
//! `ready`.

use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::event::{ReadyMethod, ReadyState};
use crate::event_log::{DaemonEvent, EventLog};
use crate::nbio::{self, FifoFd};
use crate::tmux::TmuxController;

/// Single-writer readiness cell.
///
/// The detector task stores, everyone else loads. Stale reads are
/// acceptable: the injection controller re-evaluates at each attempt.
pub struct ReadinessCell {
    state: AtomicU8,
    /// Milliseconds since `started` of the last stdout tap byte.
    last_output_ms: AtomicU64,
    started: Instant,
}

impl Default for ReadinessCell {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessCell {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ReadyState::Busy.encode()),
            last_output_ms: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> ReadyState {
        ReadyState::decode(self.state.load(Ordering::Acquire))
    }

    /// Detector-only write path (single-writer discipline).
    pub(crate) fn set_state(&self, state: ReadyState) {
        self.state.store(state.encode(), Ordering::Release);
    }

    /// Timestamp the arrival of stdout bytes. Called only by the tap
    /// reader.
    pub fn note_output(&self) {
        self.last_output_ms.store(self.elapsed_ms(), Ordering::Release);
    }

    /// Milliseconds since the last stdout byte (or since start when
    /// nothing has arrived yet).
    pub fn millis_since_output(&self) -> u64 {
        self.elapsed_ms().saturating_sub(self.last_output_ms.load(Ordering::Acquire))
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Reads the pipe-pane FIFO and timestamps every byte batch.
pub struct StdoutTap {
    afd: AsyncFd<FifoFd>,
}

impl StdoutTap {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Ok(Self { afd: nbio::open_fifo_reader(path)? })
    }

    pub async fn run(self, cell: Arc<ReadinessCell>, shutdown: CancellationToken) {
        let mut buf = [0u8; 8192];
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = nbio::read_chunk(&self.afd, &mut buf) => {
                    match result {
                        Ok(0) => tokio::time::sleep(Duration::from_millis(200)).await,
                        Ok(_) => cell.note_output(),
                        Err(_) => tokio::time::sleep(Duration::from_millis(200)).await,
                    }
                }
            }
        }
    }
}

/// One readiness transition, emitted on state change only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub prev: ReadyState,
    pub next: ReadyState,
}

/// Pure fusion rule.
///
/// Returns the derived state and whether the advisory prompt glyph was
/// present on the last non-blank snapshot line. With stdout still
/// active the snapshot is not consulted at all.
pub fn fuse(
    silent: bool,
    snapshot: &str,
    prompt_marker: &str,
    confirm_markers: &[String],
) -> (ReadyState, bool) {
    if !silent {
        return (ReadyState::Busy, false);
    }
    let glyph = !prompt_marker.is_empty()
        && last_nonblank_line(snapshot).is_some_and(|line| line.contains(prompt_marker));
    if confirm_markers.iter().any(|marker| snapshot.contains(marker.as_str())) {
        return (ReadyState::Confirm, glyph);
    }
    (ReadyState::Ready, glyph)
}

/// Last line of the snapshot containing any non-whitespace.
pub fn last_nonblank_line(snapshot: &str) -> Option<&str> {
    snapshot.lines().rev().find(|line| !line.trim().is_empty())
}

pub struct ReadinessDetector {
    cell: Arc<ReadinessCell>,
    tmux: Arc<TmuxController>,
    log: Arc<EventLog>,
    silence_timeout: Duration,
    tick: Duration,
    prompt_marker: String,
    confirm_markers: Vec<String>,
}

impl ReadinessDetector {
    pub fn new(
        cell: Arc<ReadinessCell>,
        tmux: Arc<TmuxController>,
        log: Arc<EventLog>,
        silence_timeout: Duration,
        prompt_marker: String,
        confirm_markers: Vec<String>,
    ) -> Self {
        Self {
            cell,
            tmux,
            log,
            silence_timeout,
            tick: Duration::from_millis(250),
            prompt_marker,
            confirm_markers,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Seed readiness from one snapshot without waiting out a silence
    /// window. Used when adopting a session that already exists.
    pub async fn seed_from_snapshot(&self) {
        let Ok(snapshot) = self.tmux.capture_pane().await else {
            return;
        };
        let (state, _) = fuse(true, &snapshot, &self.prompt_marker, &self.confirm_markers);
        self.cell.set_state(state);
        if state == ReadyState::Ready {
            self.log.record(DaemonEvent::ReadyDetected { method: ReadyMethod::Skipped });
        }
    }

    /// Evaluate on a fixed cadence until shutdown. Transitions are sent
    /// to `edge_tx`; busy→ready edges there trigger injection
    /// evaluation.
    pub async fn run(self, edge_tx: mpsc::Sender<Transition>, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(self.tick);
        let mut prev = self.cell.state();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }

            let silent = self.cell.millis_since_output()
                >= u64::try_from(self.silence_timeout.as_millis()).unwrap_or(u64::MAX);

            let (next, glyph) = if silent {
                // Snapshot failures (e.g. mid-respawn) keep the prior state.
                let Ok(snapshot) = self.tmux.capture_pane().await else {
                    continue;
                };
                fuse(true, &snapshot, &self.prompt_marker, &self.confirm_markers)
            } else {
                (ReadyState::Busy, false)
            };

            if next != prev {
                self.cell.set_state(next);
                if next == ReadyState::Ready {
                    let method =
                        if glyph { ReadyMethod::Snapshot } else { ReadyMethod::Silence };
                    self.log.record(DaemonEvent::ReadyDetected { method });
                }
                debug!(prev = prev.as_str(), next = next.as_str(), "readiness transition");
                if edge_tx.send(Transition { prev, next }).await.is_err() {
                    break;
                }
                prev = next;
            }
        }
    }
}

#[cfg(test)]
#[path = "detect_tests.rs"]
mod tests;
