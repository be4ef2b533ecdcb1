// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal activity monitor.
//!
//! Tracks the last human keystroke by polling tmux's per-client
//! activity clock. Nothing else writes this timestamp, and injected
//! keystrokes never appear on it (see
//! [`TmuxController::last_client_activity`]).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::tmux::TmuxController;

/// Single-writer keystroke clock, epoch seconds.
#[derive(Default)]
pub struct ActivityState {
    last_keystroke: AtomicU64,
}

impl ActivityState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock; older observations are ignored.
    pub fn note_keystroke_at(&self, epoch: u64) {
        self.last_keystroke.fetch_max(epoch, Ordering::AcqRel);
    }

    /// Epoch seconds of the last observed human keystroke (0 when no
    /// client has ever typed).
    pub fn last_keystroke(&self) -> u64 {
        self.last_keystroke.load(Ordering::Acquire)
    }

    /// True when the terminal has been free of human keystrokes for at
    /// least `threshold`.
    pub fn idle_for(&self, threshold: Duration, now_epoch: u64) -> bool {
        now_epoch.saturating_sub(self.last_keystroke()) >= threshold.as_secs()
    }
}

/// Polls the tmux client-activity clock into [`ActivityState`].
pub struct ActivityMonitor {
    tmux: Arc<TmuxController>,
    state: Arc<ActivityState>,
    poll_interval: Duration,
}

impl ActivityMonitor {
    pub fn new(tmux: Arc<TmuxController>, state: Arc<ActivityState>) -> Self {
        Self { tmux, state, poll_interval: Duration::from_secs(1) }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut poll = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = poll.tick() => {}
            }
            if let Some(epoch) = self.tmux.last_client_activity() {
                self.state.note_keystroke_at(epoch);
            }
        }
    }
}

#[cfg(test)]
#[path = "activity_tests.rs"]
mod tests;
