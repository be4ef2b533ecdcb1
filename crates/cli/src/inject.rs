// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Injection controller.
//!
//! The single consumer of the message queue and the only component
//! driving keystrokes into the pane. Evaluations fire on three edges —
//! queue-nonempty, a readiness transition to `ready`, and turn arrival
//! — and each one re-checks the injection window before draining:
//! readiness must be `ready` and the terminal idle for at least the
//! configured threshold. Draining and injecting are serialized inside
//! the task; a suppressed evaluation leaves the queue untouched.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeZone;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::activity::ActivityState;
use crate::detect::{ReadinessCell, Transition};
use crate::event::{unix_now, Message, ReadyState, SuppressReason};
use crate::event_log::{DaemonEvent, EventLog};
use crate::queue::MessageQueue;
use crate::tmux::TmuxController;

pub struct InjectionController {
    pub queue: Arc<MessageQueue>,
    pub cell: Arc<ReadinessCell>,
    pub activity: Arc<ActivityState>,
    pub tmux: Arc<TmuxController>,
    pub log: Arc<EventLog>,
    pub idle_threshold: Duration,
}

impl InjectionController {
    /// Await the three evaluation edges until shutdown.
    pub async fn run(
        self,
        mut edge_rx: mpsc::Receiver<Transition>,
        mut turn_rx: mpsc::Receiver<()>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.queue.notified() => {}
                edge = edge_rx.recv() => {
                    match edge {
                        Some(t) if t.next == ReadyState::Ready => {}
                        Some(_) => continue,
                        None => break,
                    }
                }
                wake = turn_rx.recv() => {
                    if wake.is_none() {
                        break;
                    }
                }
            }
            self.evaluate().await;
        }
    }

    /// One injection evaluation: check the window, then drain-and-send.
    pub async fn evaluate(&self) {
        if self.queue.is_empty() {
            return;
        }

        match self.cell.state() {
            ReadyState::Busy => {
                self.log.record(DaemonEvent::Suppressed { reason: SuppressReason::Busy });
                return;
            }
            ReadyState::Confirm => {
                self.log.record(DaemonEvent::Suppressed { reason: SuppressReason::Confirm });
                return;
            }
            ReadyState::Ready => {}
        }

        if !self.activity.idle_for(self.idle_threshold, unix_now()) {
            self.log
                .record(DaemonEvent::Suppressed { reason: SuppressReason::TerminalActive });
            return;
        }

        let batch = self.queue.drain();
        if batch.is_empty() {
            return;
        }
        let text = format_batch(&batch);

        // Nothing reached the pane yet, so the batch can go back whole.
        if let Err(e) = self.tmux.send_text(&text).await {
            warn!(error = %e, "send-text failed, batch requeued");
            self.queue.requeue_front(batch);
            return;
        }
        // Text is already in the input buffer; requeueing now would
        // double-inject it on the next pass.
        if let Err(e) = self.tmux.send_enter().await {
            warn!(error = %e, "send-enter failed after text");
            return;
        }

        self.log.record(DaemonEvent::MessageInjected { message_count: batch.len() });
    }
}

/// Render a drained batch, one line per message, in arrival order. The
/// whole batch is sent as one `send_text` plus one Enter.
pub fn format_batch(batch: &[Message]) -> String {
    batch.iter().map(format_message).collect::<Vec<_>>().join("\n")
}

/// `[HH:MM channel] content`, with `ts` rendered in local time.
pub fn format_message(message: &Message) -> String {
    format!("[{} {}] {}", local_hhmm(message.ts), message.channel, message.content)
}

fn local_hhmm(ts: u64) -> String {
    match chrono::Local.timestamp_opt(i64::try_from(ts).unwrap_or(0), 0) {
        chrono::LocalResult::Single(dt) => dt.format("%H:%M").to_string(),
        _ => "00:00".to_string(),
    }
}

#[cfg(test)]
#[path = "inject_tests.rs"]
mod tests;
