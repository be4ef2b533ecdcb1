// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-backed structured event log.
//!
//! One JSONL record per significant occurrence, with a stable schema:
//! `{"event": <name>, "ts": <unix-seconds>, ...per-event fields}`.
//! Records are appended to `events.jsonl` in the runtime directory and
//! mirrored to `tracing`.

use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::event::{unix_now, ReadyMethod, SuppressReason};

/// Every significant daemon occurrence, tagged by event name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DaemonEvent {
    ChannelRegister { path: String },
    ChannelDeregister { path: String },
    MessageReceived { channel: String, content_len: usize },
    MessageInjected { message_count: usize },
    ReadyDetected { method: ReadyMethod },
    BroadcastSent { subscriber_count: usize },
    ToolCalled { channel: String, message_len: usize },
    ProcessCrash { pid: Option<u32> },
    ProcessRestart { restart_count: u32, backoff_seconds: u64 },
    Suppressed { reason: SuppressReason },
    ParseError { channel: String, detail: String },
}

/// One serialized log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(flatten)]
    pub event: DaemonEvent,
    pub ts: u64,
}

/// Append-only JSONL event log.
///
/// If `path` is `None` (tests), nothing is written to disk; events
/// still reach `tracing`. Write failures are swallowed — the log is
/// observability, never control flow.
pub struct EventLog {
    path: Option<PathBuf>,
}

impl EventLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Record one event with the current timestamp.
    pub fn record(&self, event: DaemonEvent) {
        let record = EventRecord { event, ts: unix_now() };
        let Ok(mut line) = serde_json::to_string(&record) else {
            return;
        };
        tracing::info!(target: "roost::event", "{line}");
        line.push('\n');
        let Some(ref path) = self.path else {
            return;
        };
        let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(path) else {
            return;
        };
        let _ = file.write_all(line.as_bytes());
    }

    /// Read back every record in the log, skipping malformed lines.
    pub fn read_all(&self) -> Vec<EventRecord> {
        let Some(ref path) = self.path else {
            return vec![];
        };
        let Ok(contents) = std::fs::read_to_string(path) else {
            return vec![];
        };
        contents.lines().filter_map(|line| serde_json::from_str(line).ok()).collect()
    }
}

#[cfg(test)]
#[path = "event_log_tests.rs"]
mod tests;
