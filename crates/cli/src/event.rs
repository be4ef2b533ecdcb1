// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared data model: producer messages, completed agent turns, and the
//! readiness vocabulary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One unit of input accepted from a producer.
///
/// Created when a channel reader parses one complete line; destroyed
/// after successful injection. A message is injected at most once, and
/// ordering relative to other messages from the same channel is
/// preserved.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Short channel identifier, inferred from the artifact filename or
    /// overridden by a JSON payload.
    pub channel: String,
    /// Single-line message text.
    pub content: String,
    /// Producer timestamp, Unix seconds.
    pub ts: u64,
    /// Opaque key→value map, forwarded untouched.
    pub meta: Map<String, Value>,
}

/// One completed agent reply, delivered through the control channel and
/// fanned out to subscribers.
///
/// `turn` holds the assistant turn's typed blocks verbatim from the
/// agent transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub ts: u64,
    pub session: String,
    pub turn: Vec<Value>,
}

/// Classified readiness of the wrapped agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Stdout has been silent and no confirmation prompt is visible.
    Ready,
    /// Stdout is still active within the silence window.
    Busy,
    /// Stdout is silent but the pane shows a confirmation prompt.
    Confirm,
}

impl ReadyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Confirm => "confirm",
        }
    }

    /// Encoding for atomic storage.
    pub(crate) fn encode(self) -> u8 {
        match self {
            Self::Ready => 0,
            Self::Busy => 1,
            Self::Confirm => 2,
        }
    }

    pub(crate) fn decode(value: u8) -> Self {
        match value {
            0 => Self::Ready,
            2 => Self::Confirm,
            _ => Self::Busy,
        }
    }
}

impl std::fmt::Display for ReadyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an injection evaluation declined to drain the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    Busy,
    Confirm,
    TerminalActive,
}

impl SuppressReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::Confirm => "confirm",
            Self::TerminalActive => "terminal_active",
        }
    }
}

/// How a `ready` transition was corroborated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyMethod {
    /// Stdout silence alone.
    Silence,
    /// Silence plus the advisory prompt glyph in the pane snapshot.
    Snapshot,
    /// Seeded from a snapshot when adopting an existing session.
    Skipped,
}

/// Current Unix time in whole seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
