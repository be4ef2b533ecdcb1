// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent hook installation.
//!
//! Binds the agent's session-start and turn-completion events to the
//! `roost hook` subcommand in the agent's settings JSON. Installation
//! is idempotent and preserves every other key. Per-tool-call hooks
//! are never installed: they would fire for agent instances outside
//! this daemon's control.
//!
//! The daemon writes these definitions and only then launches the
//! agent, with the control endpoint already listening — that ordering
//! breaks the daemon↔agent callback cycle.

use std::path::Path;

use anyhow::Context;
use serde_json::{json, Value};

/// Settings keys bound to roost hook events: (settings key, CLI event).
const HOOK_EVENTS: &[(&str, &str)] = &[("SessionStart", "session-start"), ("Stop", "stop")];

/// Hook command line for one event kind. Uses the daemon's own binary
/// path so the agent finds the subcommand without PATH assumptions.
pub fn hook_command(event: &str, control_socket: &Path) -> String {
    format!("{} hook {event} --socket '{}'", hook_program(), control_socket.display())
}

fn hook_program() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.to_str().map(str::to_owned))
        .unwrap_or_else(|| "roost".to_string())
}

/// Install the roost hook definitions into the settings file at
/// `settings_path`, creating it (and its parent directory) if needed.
pub fn install_hooks(settings_path: &Path, control_socket: &Path) -> anyhow::Result<()> {
    let mut settings: Value = match std::fs::read_to_string(settings_path) {
        Ok(text) => serde_json::from_str(&text)
            .with_context(|| format!("parse agent settings {}", settings_path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => json!({}),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("read agent settings {}", settings_path.display()))
        }
    };

    install_into(&mut settings, control_socket)?;

    if let Some(dir) = settings_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let contents = serde_json::to_string_pretty(&settings)?;
    std::fs::write(settings_path, contents)
        .with_context(|| format!("write agent settings {}", settings_path.display()))?;
    Ok(())
}

/// Merge the hook definitions into a settings value. Roost-owned
/// entries are replaced, foreign entries and all other keys are left
/// alone.
pub fn install_into(settings: &mut Value, control_socket: &Path) -> anyhow::Result<()> {
    let root = settings.as_object_mut().context("agent settings is not a JSON object")?;
    let hooks = root.entry("hooks").or_insert_with(|| json!({}));
    let hooks = hooks.as_object_mut().context("`hooks` is not a JSON object")?;

    for (settings_key, event) in HOOK_EVENTS {
        let command = hook_command(event, control_socket);
        let entry = json!({
            "matcher": "",
            "hooks": [{ "type": "command", "command": command }]
        });

        let list = hooks.entry(*settings_key).or_insert_with(|| json!([]));
        let list = list
            .as_array_mut()
            .with_context(|| format!("`hooks.{settings_key}` is not an array"))?;
        list.retain(|existing| !entry_is_ours(existing));
        list.push(entry);
    }
    Ok(())
}

/// True when a hook entry invokes the roost hook subcommand.
fn entry_is_ours(entry: &Value) -> bool {
    entry
        .get("hooks")
        .and_then(|hooks| hooks.as_array())
        .is_some_and(|hooks| {
            hooks.iter().any(|hook| {
                hook.get("command")
                    .and_then(|command| command.as_str())
                    .is_some_and(is_roost_command)
            })
        })
}

/// Matches `<any program> hook <event> --socket ...` regardless of
/// where the binary lives, so reinstalls from a relocated daemon still
/// replace the old entry.
fn is_roost_command(command: &str) -> bool {
    let mut words = command.split_whitespace();
    let _program = words.next();
    words.next() == Some("hook") && command.contains("--socket")
}

#[cfg(test)]
#[path = "setup_tests.rs"]
mod tests;
