// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hook control server.
//!
//! Local stream endpoint at `control.sock` receiving one JSON request
//! per connection from the agent side: completed turns for broadcast,
//! session-start notices, and routed-output writes. Connections are
//! short-lived; a malformed payload is logged and the connection
//! closed.

use std::io::Write;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event::{unix_now, Turn};
use crate::event_log::{DaemonEvent, EventLog};
use crate::nbio;
use crate::paths::RuntimePaths;

/// Largest accepted request body. Turns carry whole assistant replies,
/// so the cap is generous.
const MAX_REQUEST_BYTES: u64 = 8 * 1024 * 1024;

/// A decoded control request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    /// A completed agent turn for broadcast.
    Broadcast {
        session: String,
        turn: Vec<serde_json::Value>,
    },
    /// The agent session came up; note where its transcript lives.
    SessionStart {
        session: String,
        #[serde(default)]
        transcript_path: Option<String>,
    },
    /// Route one line of agent output to a producer-owned
    /// `out.<channel>` pipe.
    Send { channel: String, content: String },
}

/// Single JSON reply written back on every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlReply {
    fn ok() -> Self {
        Self { ok: true, error: None }
    }

    fn err(detail: impl Into<String>) -> Self {
        Self { ok: false, error: Some(detail.into()) }
    }
}

struct ControlContext {
    paths: RuntimePaths,
    log: Arc<EventLog>,
    /// Turns forwarded to the output broadcaster.
    turn_tx: mpsc::Sender<Turn>,
    /// Injection-evaluation wakeups on turn arrival.
    wake_tx: mpsc::Sender<()>,
}

pub struct ControlServer {
    listener: UnixListener,
    context: Arc<ControlContext>,
}

impl ControlServer {
    /// Bind the control endpoint. Must happen before the agent launches
    /// — the installed hooks call straight back into this socket.
    pub fn bind(
        paths: &RuntimePaths,
        log: Arc<EventLog>,
        turn_tx: mpsc::Sender<Turn>,
        wake_tx: mpsc::Sender<()>,
    ) -> anyhow::Result<Self> {
        let listener = UnixListener::bind(paths.control_socket()).map_err(|e| {
            anyhow::anyhow!("bind control socket {}: {e}", paths.control_socket().display())
        })?;
        let context =
            Arc::new(ControlContext { paths: paths.clone(), log, turn_tx, wake_tx });
        Ok(Self { listener, context })
    }

    /// Accept connections until shutdown.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            tokio::spawn(handle_connection(stream, self.context.clone()));
                        }
                        Err(e) => debug!(error = %e, "control accept failed"),
                    }
                }
            }
        }
    }
}

async fn handle_connection(mut stream: UnixStream, context: Arc<ControlContext>) {
    let mut body = Vec::new();
    if let Err(e) = (&mut stream).take(MAX_REQUEST_BYTES).read_to_end(&mut body).await {
        debug!(error = %e, "control read failed");
        return;
    }

    let reply = match serde_json::from_slice::<ControlRequest>(&body) {
        Ok(request) => process(&context, request).await,
        Err(e) => {
            context.log.record(DaemonEvent::ParseError {
                channel: "control".to_string(),
                detail: e.to_string(),
            });
            ControlReply::err(format!("malformed control request: {e}"))
        }
    };

    let Ok(mut line) = serde_json::to_string(&reply) else {
        return;
    };
    line.push('\n');
    let _ = stream.write_all(line.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn process(context: &ControlContext, request: ControlRequest) -> ControlReply {
    match request {
        ControlRequest::Broadcast { session, turn } => {
            let turn = Turn { ts: unix_now(), session, turn };
            if context.turn_tx.send(turn).await.is_err() {
                return ControlReply::err("broadcaster is gone");
            }
            // A completed turn is one of the two injection edges.
            let _ = context.wake_tx.try_send(());
            ControlReply::ok()
        }
        ControlRequest::SessionStart { session, transcript_path } => {
            info!(session = %session, transcript_path = ?transcript_path, "agent session started");
            ControlReply::ok()
        }
        ControlRequest::Send { channel, content } => {
            route_output(&context.paths, &context.log, &channel, &content)
        }
    }
}

/// Write one line to the producer-owned `out.<channel>` pipe.
///
/// The pipe belongs to the producer; a missing pipe or absent reader is
/// a structured error back to the agent, never a daemon failure.
pub fn route_output(
    paths: &RuntimePaths,
    log: &EventLog,
    channel: &str,
    content: &str,
) -> ControlReply {
    let path = paths.output_pipe(channel);
    if !path.exists() {
        warn!(channel, "routed output to unknown channel");
        return ControlReply::err(format!("unknown output channel: {channel}"));
    }

    let mut file = match nbio::open_fifo_writer(&path) {
        Ok(file) => file,
        Err(e) if e.raw_os_error() == Some(nix::libc::ENXIO) => {
            return ControlReply::err(format!("output channel {channel} has no reader"));
        }
        Err(e) => return ControlReply::err(format!("open out.{channel}: {e}")),
    };

    let mut line = content.as_bytes().to_vec();
    line.push(b'\n');
    if let Err(e) = file.write_all(&line) {
        return ControlReply::err(format!("write out.{channel}: {e}"));
    }

    log.record(DaemonEvent::ToolCalled {
        channel: channel.to_string(),
        message_len: content.len(),
    });
    ControlReply::ok()
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
