// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output broadcaster.
//!
//! Local stream endpoint at `output.sock`. Every completed turn is
//! serialized once and fanned out as one newline-terminated JSON line
//! to each connected subscriber. Subscribers only see turns that
//! arrive after they connect; there is no replay and no per-subscriber
//! queue beyond the fan-out channel and the OS socket buffer. A write
//! failure closes only that subscriber.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::event::Turn;
use crate::event_log::{DaemonEvent, EventLog};
use crate::paths::RuntimePaths;

/// Fan-out channel depth. A subscriber that lags this far behind has
/// its oldest turns dropped rather than stalling the daemon.
const FANOUT_DEPTH: usize = 256;

pub struct Broadcaster {
    listener: UnixListener,
    line_tx: broadcast::Sender<Arc<String>>,
    log: Arc<EventLog>,
}

impl Broadcaster {
    /// Bind the broadcast endpoint.
    pub fn bind(paths: &RuntimePaths, log: Arc<EventLog>) -> anyhow::Result<Self> {
        let listener = UnixListener::bind(paths.output_socket()).map_err(|e| {
            anyhow::anyhow!("bind output socket {}: {e}", paths.output_socket().display())
        })?;
        let (line_tx, _) = broadcast::channel(FANOUT_DEPTH);
        Ok(Self { listener, line_tx, log })
    }

    /// Serialize one turn and fan it out. Logged even with zero
    /// subscribers; the turn is not retained.
    pub fn publish(&self, turn: &Turn) {
        let Ok(mut line) = serde_json::to_string(turn) else {
            return;
        };
        line.push('\n');
        let subscriber_count = self.line_tx.receiver_count();
        let _ = self.line_tx.send(Arc::new(line));
        self.log.record(DaemonEvent::BroadcastSent { subscriber_count });
    }

    /// Accept subscribers and publish incoming turns until shutdown.
    pub async fn run(self, mut turn_rx: mpsc::Receiver<Turn>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                turn = turn_rx.recv() => {
                    match turn {
                        Some(turn) => self.publish(&turn),
                        None => break,
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let rx = self.line_tx.subscribe();
                            tokio::spawn(serve_subscriber(stream, rx, shutdown.clone()));
                        }
                        Err(e) => debug!(error = %e, "broadcast accept failed"),
                    }
                }
            }
        }
    }
}

/// Copy fan-out lines to one subscriber until it errors or shutdown.
async fn serve_subscriber(
    mut stream: UnixStream,
    mut rx: broadcast::Receiver<Arc<String>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            line = rx.recv() => {
                match line {
                    Ok(line) => {
                        if stream.write_all(line.as_bytes()).await.is_err() {
                            // Dead subscriber; drop it, nobody else is affected.
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "subscriber lagged, turns dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "broadcast_tests.rs"]
mod tests;
