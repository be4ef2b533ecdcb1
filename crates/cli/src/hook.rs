// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `roost hook` — the script side of the hook integration.
//!
//! Invoked by the agent's hook system with the payload JSON on stdin
//! (`session_id`, `transcript_path`). For the turn-completion kind the
//! last assistant turn is lifted verbatim from the JSONL transcript
//! and posted to the daemon's control socket as one request. A daemon
//! that is down or slow must never block the agent, so connection
//! failures exit 0.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use serde_json::json;

#[derive(Debug, Args)]
pub struct HookArgs {
    /// Hook event kind: session-start or stop.
    pub event: String,

    /// Daemon control socket path.
    #[arg(long, env = "ROOST_CONTROL_SOCKET")]
    pub socket: PathBuf,
}

/// Run the subcommand. Returns a process exit code.
pub fn run(args: &HookArgs) -> i32 {
    let mut payload = String::new();
    if std::io::stdin().read_to_string(&mut payload).is_err() {
        return 0;
    }
    match build_request(&args.event, &payload) {
        Ok(Some(request)) => post(&args.socket, &request),
        Ok(None) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            2
        }
    }
}

/// Build the control request for one hook invocation, or `None` when
/// there is nothing to forward (e.g. no assistant turn yet).
pub fn build_request(event: &str, payload: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("hook payload is not JSON")?;
    let session =
        payload.get("session_id").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
    let transcript_path = payload.get("transcript_path").and_then(|v| v.as_str());

    match event {
        "session-start" => Ok(Some(json!({
            "type": "session_start",
            "session": session,
            "transcript_path": transcript_path,
        }))),
        "stop" => {
            let Some(path) = transcript_path else {
                return Ok(None);
            };
            let transcript = std::fs::read_to_string(path)
                .with_context(|| format!("read transcript {path}"))?;
            let Some(turn) = last_assistant_turn(&transcript) else {
                return Ok(None);
            };
            Ok(Some(json!({
                "type": "broadcast",
                "session": session,
                "turn": turn,
            })))
        }
        other => anyhow::bail!("unknown hook event: {other}"),
    }
}

/// Block sequence of the last assistant line in a JSONL transcript,
/// forwarded verbatim.
pub fn last_assistant_turn(transcript: &str) -> Option<Vec<serde_json::Value>> {
    for line in transcript.lines().rev() {
        let Ok(entry) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if entry.get("type").and_then(|v| v.as_str()) != Some("assistant") {
            continue;
        }
        if let Some(content) = entry
            .get("message")
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_array())
        {
            return Some(content.clone());
        }
    }
    None
}

/// Post one request and wait for the (discarded) reply.
fn post(socket: &Path, request: &serde_json::Value) -> i32 {
    let Ok(mut stream) = UnixStream::connect(socket) else {
        return 0;
    };
    let Ok(line) = serde_json::to_string(request) else {
        return 0;
    };
    if stream.write_all(line.as_bytes()).is_err() {
        return 0;
    }
    let _ = stream.shutdown(std::net::Shutdown::Write);
    let mut reply = String::new();
    let _ = stream.read_to_string(&mut reply);
    0
}

#[cfg(test)]
#[path = "hook_tests.rs"]
mod tests;
