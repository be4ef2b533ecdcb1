// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle supervisor.
//!
//! Polls the agent process and restarts it in place with capped
//! exponential backoff. The restart counter is monotone for the
//! daemon's lifetime — a 24/7 supervisor must keep restart storms
//! damped even after long stable stretches.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal;
use nix::unistd::Pid;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::event_log::{DaemonEvent, EventLog};
use crate::tmux::TmuxController;

/// Flag appended on relaunch so the agent resumes its own history.
const RESUME_FLAG: &str = "--continue";

/// Checks whether a process with the given PID is alive.
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid_i32) = i32::try_from(pid) else {
        return false;
    };
    signal::kill(Pid::from_raw(pid_i32), None).is_ok()
}

/// Backoff before restart `n` (0-based): `min(initial · 2^n, cap)`.
pub fn backoff_delay(initial: Duration, cap: Duration, n: u32) -> Duration {
    let shift = n.min(63);
    let millis = initial.as_millis().saturating_mul(1u128 << shift);
    let capped = millis.min(cap.as_millis());
    Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX))
}

/// True when a pane snapshot shows no live agent: tmux's dead-pane
/// banner, or nothing rendered at all. Fallback only — pid liveness is
/// the primary check.
pub fn snapshot_is_dead(snapshot: &str) -> bool {
    snapshot.contains("Pane is dead") || snapshot.trim().is_empty()
}

pub struct Supervisor {
    tmux: Arc<TmuxController>,
    log: Arc<EventLog>,
    command: Vec<String>,
    poll_interval: Duration,
    backoff_initial: Duration,
    backoff_cap: Duration,
    tap: PathBuf,
    restart_count: u32,
    pane_pid: Option<u32>,
}

impl Supervisor {
    pub fn new(
        tmux: Arc<TmuxController>,
        log: Arc<EventLog>,
        command: Vec<String>,
        poll_interval: Duration,
        backoff_initial: Duration,
        backoff_cap: Duration,
        tap: PathBuf,
    ) -> Self {
        Self {
            tmux,
            log,
            command,
            poll_interval,
            backoff_initial,
            backoff_cap,
            tap,
            restart_count: 0,
            pane_pid: None,
        }
    }

    /// Monotone restart counter; never reset.
    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// First-start path: create the session or adopt an existing one,
    /// then mount the stdout tap. Returns `true` when the session
    /// already existed and the agent was left untouched.
    pub fn start(&mut self) -> anyhow::Result<bool> {
        let created = self.tmux.ensure_session(&self.command)?;
        self.tmux.mount_stdout_tap(&self.tap)?;
        self.pane_pid = self.tmux.pane_pid();
        if created {
            info!(session = self.tmux.session(), "created agent session");
        } else {
            info!(session = self.tmux.session(), "adopted existing agent session");
        }
        Ok(!created)
    }

    /// Two-level crash check: pid liveness first, pane snapshot second.
    async fn agent_crashed(&self) -> bool {
        if let Some(pid) = self.pane_pid {
            return !is_process_alive(pid);
        }
        if self.tmux.pane_dead() {
            return true;
        }
        match self.tmux.capture_pane().await {
            Ok(snapshot) => snapshot_is_dead(&snapshot),
            // Session itself is gone.
            Err(_) => true,
        }
    }

    /// Poll until shutdown, restarting the agent on detected crashes.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = poll.tick() => {}
            }

            if self.pane_pid.is_none() {
                self.pane_pid = self.tmux.pane_pid();
            }
            if !self.agent_crashed().await {
                continue;
            }

            self.log.record(DaemonEvent::ProcessCrash { pid: self.pane_pid });
            let delay =
                backoff_delay(self.backoff_initial, self.backoff_cap, self.restart_count);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.relaunch() {
                Ok(()) => {
                    self.restart_count += 1;
                    self.log.record(DaemonEvent::ProcessRestart {
                        restart_count: self.restart_count,
                        backoff_seconds: delay.as_secs(),
                    });
                }
                Err(e) => warn!(error = %e, "agent relaunch failed"),
            }
        }
    }

    /// Relaunch with the resume flag, then re-mount the stdout tap so
    /// the readiness detector observes the new process.
    fn relaunch(&mut self) -> anyhow::Result<()> {
        let mut command = self.command.clone();
        if !command.iter().any(|arg| arg == RESUME_FLAG) {
            command.push(RESUME_FLAG.to_string());
        }

        if self.tmux.session_exists() {
            self.tmux.respawn(&command)?;
        } else {
            self.tmux.ensure_session(&command)?;
        }
        self.tmux.mount_stdout_tap(&self.tap)?;
        self.pane_pid = self.tmux.pane_pid();
        Ok(())
    }
}

#[cfg(test)]
#[path = "supervise_tests.rs"]
mod tests;
