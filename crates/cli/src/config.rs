// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;

/// Asynchronous input multiplexer for an interactive terminal AI agent.
#[derive(Debug, Parser)]
#[command(name = "roost", version, about)]
pub struct Config {
    /// Runtime directory holding channel pipes and sockets.
    #[arg(long, env = "ROOST_DIR")]
    pub dir: Option<PathBuf>,

    /// tmux session name the agent runs in.
    #[arg(long, env = "ROOST_SESSION")]
    pub session: Option<String>,

    /// tmux server socket (tmux -S); uses the default server when unset.
    #[arg(long, env = "ROOST_TMUX_SOCKET")]
    pub tmux_socket: Option<PathBuf>,

    /// Seconds the terminal must be free of human keystrokes before
    /// injection.
    #[arg(long, env = "ROOST_IDLE_THRESHOLD")]
    pub idle_threshold: Option<f64>,

    /// Seconds of stdout silence before the agent counts as ready.
    #[arg(long, env = "ROOST_SILENCE_TIMEOUT")]
    pub silence_timeout: Option<f64>,

    /// Initial restart backoff in seconds.
    #[arg(long, env = "ROOST_BACKOFF_INITIAL")]
    pub backoff_initial: Option<u64>,

    /// Restart backoff cap in seconds.
    #[arg(long, env = "ROOST_BACKOFF_CAP")]
    pub backoff_cap: Option<u64>,

    /// Supervisor poll interval in seconds.
    #[arg(long, env = "ROOST_POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    /// Literal marker shown on the agent's ready prompt line.
    #[arg(long, env = "ROOST_PROMPT_MARKER")]
    pub prompt_marker: Option<String>,

    /// Confirmation-prompt phrase; repeatable, replaces the default set.
    #[arg(long = "confirm-marker")]
    pub confirm_markers: Vec<String>,

    /// Agent settings file receiving the hook definitions.
    #[arg(long, env = "ROOST_AGENT_SETTINGS")]
    pub agent_settings: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, env = "ROOST_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "ROOST_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Optional JSON configuration file; flags take precedence.
    #[arg(long, env = "ROOST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Agent launch command (after --).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Optional JSON configuration file; every field may be omitted.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub dir: Option<PathBuf>,
    pub session: Option<String>,
    pub tmux_socket: Option<PathBuf>,
    pub idle_threshold: Option<f64>,
    pub silence_timeout: Option<f64>,
    pub backoff_initial: Option<u64>,
    pub backoff_cap: Option<u64>,
    pub poll_interval: Option<u64>,
    pub prompt_marker: Option<String>,
    pub confirm_markers: Option<Vec<String>>,
    pub agent_settings: Option<PathBuf>,
    pub command: Option<Vec<String>>,
}

/// Fully-resolved daemon settings: flags > config file > defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub dir: PathBuf,
    pub session: String,
    pub tmux_socket: Option<PathBuf>,
    pub idle_threshold: Duration,
    pub silence_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_cap: Duration,
    pub poll_interval: Duration,
    pub prompt_marker: String,
    pub confirm_markers: Vec<String>,
    pub agent_settings: PathBuf,
    pub command: Vec<String>,
}

/// Confirmation phrases matched against pane snapshots when no set is
/// configured. A policy parameter, not a heuristic — replace per agent
/// with `--confirm-marker`.
pub const DEFAULT_CONFIRM_MARKERS: &[&str] =
    &["Do you want", "Would you like", "(y/n)", "(Y/n)", "Proceed?"];

/// Default agent launch command.
pub const DEFAULT_COMMAND: &str = "claude";

impl Config {
    /// Load the optional config file and resolve the final settings.
    pub fn resolve(&self) -> anyhow::Result<Settings> {
        let file = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("read config file {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parse config file {}", path.display()))?
            }
            None => FileConfig::default(),
        };
        self.resolve_with(file)
    }

    /// Merge flags over the file config and apply defaults.
    pub fn resolve_with(&self, file: FileConfig) -> anyhow::Result<Settings> {
        let idle_threshold = self.idle_threshold.or(file.idle_threshold).unwrap_or(2.0);
        let silence_timeout = self.silence_timeout.or(file.silence_timeout).unwrap_or(3.0);
        let backoff_initial = self.backoff_initial.or(file.backoff_initial).unwrap_or(1);
        let backoff_cap = self.backoff_cap.or(file.backoff_cap).unwrap_or(60);
        let poll_interval = self.poll_interval.or(file.poll_interval).unwrap_or(2);

        anyhow::ensure!(silence_timeout > 0.0, "silence timeout must be positive");
        anyhow::ensure!(backoff_initial >= 1, "backoff initial must be at least 1 second");
        anyhow::ensure!(
            backoff_cap >= backoff_initial,
            "backoff cap must be at least the initial backoff"
        );
        anyhow::ensure!(poll_interval >= 1, "poll interval must be at least 1 second");

        let idle_threshold = Duration::try_from_secs_f64(idle_threshold)
            .context("idle threshold must be a non-negative number of seconds")?;
        let silence_timeout = Duration::try_from_secs_f64(silence_timeout)
            .context("silence timeout must be a valid number of seconds")?;

        let confirm_markers = if !self.confirm_markers.is_empty() {
            self.confirm_markers.clone()
        } else {
            file.confirm_markers
                .unwrap_or_else(|| DEFAULT_CONFIRM_MARKERS.iter().map(|m| m.to_string()).collect())
        };

        let command = if !self.command.is_empty() {
            self.command.clone()
        } else {
            match file.command {
                Some(command) if !command.is_empty() => command,
                _ => vec![DEFAULT_COMMAND.to_string()],
            }
        };

        Ok(Settings {
            dir: self.dir.clone().or(file.dir).unwrap_or_else(crate::paths::default_root),
            session: self.session.clone().or(file.session).unwrap_or_else(|| "roost".to_string()),
            tmux_socket: self.tmux_socket.clone().or(file.tmux_socket),
            idle_threshold,
            silence_timeout,
            backoff_initial: Duration::from_secs(backoff_initial),
            backoff_cap: Duration::from_secs(backoff_cap),
            poll_interval: Duration::from_secs(poll_interval),
            prompt_marker: self
                .prompt_marker
                .clone()
                .or(file.prompt_marker)
                .unwrap_or_else(|| "❯".to_string()),
            confirm_markers,
            agent_settings: self
                .agent_settings
                .clone()
                .or(file.agent_settings)
                .unwrap_or_else(default_agent_settings),
            command,
        })
    }
}

/// Default agent settings target: `~/.claude/settings.json`.
fn default_agent_settings() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_default();
    PathBuf::from(home).join(".claude").join("settings.json")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
