// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Input channel readers.
//!
//! One non-blocking FIFO reader per registered `in*` artifact. Bytes
//! accumulate in a per-channel line buffer; each complete line becomes
//! one [`Message`]. A blocking line-reader would deadlock against
//! producers writing more than the pipe buffer, so reads go through
//! `AsyncFd` readiness with `O_RDWR | O_NONBLOCK` (see [`crate::nbio`]).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::unix::AsyncFd;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::event::{unix_now, Message};
use crate::event_log::{DaemonEvent, EventLog};
use crate::nbio::{self, FifoFd};
use crate::queue::MessageQueue;

/// Maximum accepted line length in bytes, newline excluded. Pipe writes
/// above `PIPE_BUF` lose atomicity and may interleave, so longer lines
/// are treated as corrupt.
pub const MAX_LINE_BYTES: usize = 4096;

/// Cap on buffered bytes while waiting for a newline. A producer that
/// streams without newlines is discarded wholesale at this bound.
const MAX_PARTIAL_BYTES: usize = 64 * 1024;

/// Why a producer line failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Line exceeded [`MAX_LINE_BYTES`].
    Oversize(usize),
    /// First non-whitespace byte was `{` but the JSON was invalid.
    Json(String),
    /// Valid JSON object without the required `content` field.
    MissingContent,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Oversize(len) => write!(f, "line of {len} bytes exceeds {MAX_LINE_BYTES}"),
            Self::Json(detail) => write!(f, "invalid JSON payload: {detail}"),
            Self::MissingContent => f.write_str("JSON payload missing `content`"),
        }
    }
}

/// Parse one producer line into a [`Message`].
///
/// A line whose first non-whitespace byte is `{` must be a JSON object
/// carrying at least `content`; `channel` defaults to the
/// filename-derived name and `ts` to `now`. Any other line is taken
/// verbatim as content.
pub fn parse_line(line: &str, default_channel: &str, now: u64) -> Result<Message, ParseError> {
    if line.len() > MAX_LINE_BYTES {
        return Err(ParseError::Oversize(line.len()));
    }

    if line.trim_start().starts_with('{') {
        return parse_json_line(line, default_channel, now);
    }

    Ok(Message {
        channel: default_channel.to_string(),
        content: line.to_string(),
        ts: now,
        meta: serde_json::Map::new(),
    })
}

fn parse_json_line(line: &str, default_channel: &str, now: u64) -> Result<Message, ParseError> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| ParseError::Json(e.to_string()))?;

    let content = value
        .get("content")
        .and_then(|v| v.as_str())
        .ok_or(ParseError::MissingContent)?
        .to_string();
    let channel = value
        .get("channel")
        .and_then(|v| v.as_str())
        .unwrap_or(default_channel)
        .to_string();
    let ts = value.get("ts").and_then(|v| v.as_u64()).unwrap_or(now);
    let meta = value
        .get("meta")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();

    Ok(Message { channel, content, ts, meta })
}

/// One registered FIFO reader pumping complete lines into the queue.
pub struct ChannelReader {
    path: PathBuf,
    channel: String,
    afd: AsyncFd<FifoFd>,
    line_buf: Vec<u8>,
}

impl ChannelReader {
    /// Open the FIFO at `path` without blocking on writer arrival.
    pub fn open(path: &Path, channel: &str) -> anyhow::Result<Self> {
        let afd = nbio::open_fifo_reader(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            channel: channel.to_string(),
            afd,
            line_buf: Vec::with_capacity(4096),
        })
    }

    /// Read until shutdown, pushing parsed messages into `queue`.
    ///
    /// Parse failures log one event and never tear the reader down; a
    /// writer-side EOF leaves the reader registered (the `O_RDWR` open
    /// suppresses it entirely in practice).
    pub async fn run(
        mut self,
        queue: Arc<MessageQueue>,
        log: Arc<EventLog>,
        shutdown: CancellationToken,
    ) {
        let mut buf = [0u8; 4096];
        loop {
            while let Some(line) = take_line(&mut self.line_buf) {
                match parse_line(&line, &self.channel, unix_now()) {
                    Ok(message) => {
                        log.record(DaemonEvent::MessageReceived {
                            channel: message.channel.clone(),
                            content_len: message.content.len(),
                        });
                        queue.push(message);
                    }
                    Err(e) => {
                        log.record(DaemonEvent::ParseError {
                            channel: self.channel.clone(),
                            detail: e.to_string(),
                        });
                    }
                }
            }

            if self.line_buf.len() > MAX_PARTIAL_BYTES {
                log.record(DaemonEvent::ParseError {
                    channel: self.channel.clone(),
                    detail: format!(
                        "discarded {} buffered bytes with no newline",
                        self.line_buf.len()
                    ),
                });
                self.line_buf.clear();
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                result = nbio::read_chunk(&self.afd, &mut buf) => {
                    match result {
                        Ok(0) => {
                            // EOF is not expected with an O_RDWR open;
                            // back off rather than spin on a readable fd.
                            tokio::time::sleep(Duration::from_millis(200)).await;
                        }
                        Ok(n) => self.line_buf.extend_from_slice(&buf[..n]),
                        Err(e) => {
                            debug!(path = %self.path.display(), error = %e, "channel read error");
                            tokio::time::sleep(Duration::from_millis(200)).await;
                        }
                    }
                }
            }
        }
    }
}

/// Extract the next complete line (newline stripped) from the buffer.
fn take_line(buf: &mut Vec<u8>) -> Option<String> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let line = String::from_utf8_lossy(&buf[..pos]).into_owned();
    buf.drain(..=pos);
    Some(line)
}

/// Owns the set of live channel reader tasks, keyed by artifact path.
///
/// Registration opens the FIFO and spawns a reader; deregistration
/// cancels it. The readers push straight into the shared queue.
pub struct ChannelSet {
    queue: Arc<MessageQueue>,
    log: Arc<EventLog>,
    shutdown: CancellationToken,
    readers: HashMap<PathBuf, CancellationToken>,
}

impl ChannelSet {
    pub fn new(queue: Arc<MessageQueue>, log: Arc<EventLog>, shutdown: CancellationToken) -> Self {
        Self { queue, log, shutdown, readers: HashMap::new() }
    }

    /// Register a reader for an input artifact. Idempotent per path.
    pub fn register(&mut self, path: &Path, channel: &str) {
        if self.readers.contains_key(path) {
            return;
        }
        match ChannelReader::open(path, channel) {
            Ok(reader) => {
                let token = self.shutdown.child_token();
                self.readers.insert(path.to_path_buf(), token.clone());
                tokio::spawn(reader.run(self.queue.clone(), self.log.clone(), token));
                self.log
                    .record(DaemonEvent::ChannelRegister { path: path.display().to_string() });
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open input channel");
            }
        }
    }

    /// Cancel and forget the reader for a removed artifact.
    pub fn deregister(&mut self, path: &Path) {
        if let Some(token) = self.readers.remove(path) {
            token.cancel();
            self.log.record(DaemonEvent::ChannelDeregister { path: path.display().to_string() });
        }
    }

    /// Paths with a live reader, sorted for deterministic assertions.
    pub fn registered(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.readers.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Cancel every reader (shutdown path).
    pub fn close_all(&mut self) {
        for (_, token) in self.readers.drain() {
            token.cancel();
        }
    }
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
