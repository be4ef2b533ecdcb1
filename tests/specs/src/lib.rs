// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end daemon scenarios.
//!
//! Spawns the real `roost` binary against an isolated tmux server
//! (`tmux -S <tmpdir>/tmux.sock`) running a mock agent: a shell script
//! that prints a prompt, then echoes a configurable reply after a
//! configurable delay for every input line. Tests that need tmux call
//! [`tmux_available`] first and skip when it is missing.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Resolve the path to the compiled `roost` binary.
pub fn roost_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("roost")
}

/// True when a usable tmux binary is on PATH.
pub fn tmux_available() -> bool {
    Command::new("tmux")
        .arg("-V")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Create a FIFO with the system mkfifo utility (keeps the harness free
/// of fd plumbing).
pub fn mkfifo(path: &Path) -> anyhow::Result<()> {
    let status = Command::new("mkfifo").arg(path).status()?;
    anyhow::ensure!(status.success(), "mkfifo {} failed", path.display());
    Ok(())
}

/// Poll `predicate` until it returns true or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

/// Write one line to a FIFO, retrying while the daemon has not opened
/// its reader yet (`ENXIO` from a non-blocking open).
pub fn write_line(pipe: &Path, line: &str) -> anyhow::Result<()> {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match roost::nbio::open_fifo_writer(pipe) {
            Ok(mut file) => {
                file.write_all(format!("{line}\n").as_bytes())?;
                return Ok(());
            }
            Err(_) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => return Err(anyhow::anyhow!("no reader on {}: {e}", pipe.display())),
        }
    }
}

/// Write the mock agent script into `dir` and return its path.
///
/// The script prints a prompt line, then echoes `reply: <line>` after
/// `$MOCK_DELAY` seconds for every line of input.
pub fn write_mock_agent(dir: &Path) -> anyhow::Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("mock-agent.sh");
    let script = concat!(
        "#!/bin/sh\n",
        "printf '%s\\n' 'mock agent up'\n",
        "printf '%s ' '\u{276f}'\n",
        "while IFS= read -r line; do\n",
        "  sleep \"${MOCK_DELAY:-0}\"\n",
        "  printf 'reply: %s\\n' \"$line\"\n",
        "  printf '%s ' '\u{276f}'\n",
        "done\n",
    );
    std::fs::write(&path, script)?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

/// A running daemon plus its isolated tmux server, torn down on drop.
pub struct RoostDaemon {
    child: Child,
    pub dir: PathBuf,
    pub session: String,
    tmux_socket: PathBuf,
    _tmpdir: tempfile::TempDir,
}

/// Builder for daemon spawns with test-friendly timing defaults.
pub struct RoostBuilder {
    silence_timeout: f64,
    idle_threshold: f64,
    poll_interval: u64,
    backoff_initial: u64,
    backoff_cap: u64,
    mock_delay: f64,
}

impl Default for RoostBuilder {
    fn default() -> Self {
        Self {
            silence_timeout: 1.0,
            idle_threshold: 0.0,
            poll_interval: 1,
            backoff_initial: 1,
            backoff_cap: 8,
            mock_delay: 0.0,
        }
    }
}

impl RoostBuilder {
    pub fn silence_timeout(mut self, seconds: f64) -> Self {
        self.silence_timeout = seconds;
        self
    }

    pub fn idle_threshold(mut self, seconds: f64) -> Self {
        self.idle_threshold = seconds;
        self
    }

    /// Seconds the mock agent sleeps before echoing each reply.
    pub fn mock_delay(mut self, seconds: f64) -> Self {
        self.mock_delay = seconds;
        self
    }

    /// Spawn the daemon wrapping a fresh mock agent.
    pub fn spawn(self) -> anyhow::Result<RoostDaemon> {
        let binary = roost_binary();
        anyhow::ensure!(binary.exists(), "roost binary not found at {}", binary.display());

        let tmpdir = tempfile::tempdir()?;
        let dir = tmpdir.path().join("runtime");
        let tmux_socket = tmpdir.path().join("tmux.sock");
        let agent_settings = tmpdir.path().join("agent-settings.json");
        let mock = write_mock_agent(tmpdir.path())?;
        let session = format!("roost-spec-{}", std::process::id());

        let child = Command::new(&binary)
            .arg("--dir")
            .arg(&dir)
            .arg("--session")
            .arg(&session)
            .arg("--tmux-socket")
            .arg(&tmux_socket)
            .arg("--agent-settings")
            .arg(&agent_settings)
            .args(["--silence-timeout", &self.silence_timeout.to_string()])
            .args(["--idle-threshold", &self.idle_threshold.to_string()])
            .args(["--poll-interval", &self.poll_interval.to_string()])
            .args(["--backoff-initial", &self.backoff_initial.to_string()])
            .args(["--backoff-cap", &self.backoff_cap.to_string()])
            .arg("--")
            .arg("env")
            .arg(format!("MOCK_DELAY={}", self.mock_delay))
            .arg(&mock)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(RoostDaemon { child, dir, session, tmux_socket, _tmpdir: tmpdir })
    }
}

impl RoostDaemon {
    pub fn builder() -> RoostBuilder {
        RoostBuilder::default()
    }

    pub fn input_pipe(&self) -> PathBuf {
        self.dir.join("in")
    }

    pub fn control_socket(&self) -> PathBuf {
        self.dir.join("control.sock")
    }

    pub fn output_socket(&self) -> PathBuf {
        self.dir.join("output.sock")
    }

    /// Wait until the daemon has created its endpoints.
    pub fn wait_until_up(&self) -> bool {
        let pipe = self.input_pipe();
        let control = self.control_socket();
        wait_for(Duration::from_secs(10), || pipe.exists() && control.exists())
    }

    /// Visible pane contents of the wrapped agent.
    pub fn capture_pane(&self) -> String {
        let output = Command::new("tmux")
            .arg("-S")
            .arg(&self.tmux_socket)
            .args(["capture-pane", "-p", "-t", &self.session])
            .output();
        match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).into_owned(),
            _ => String::new(),
        }
    }

    /// Kill the agent pane's process (crash simulation).
    pub fn kill_agent(&self) -> anyhow::Result<()> {
        let output = Command::new("tmux")
            .arg("-S")
            .arg(&self.tmux_socket)
            .args(["display-message", "-p", "-t", &self.session, "#{pane_pid}"])
            .output()?;
        let pid: u32 = String::from_utf8_lossy(&output.stdout).trim().parse()?;
        let status = Command::new("kill").args(["-9", &pid.to_string()]).status()?;
        anyhow::ensure!(status.success(), "kill failed");
        Ok(())
    }

    /// Parsed records from the daemon's structured event log.
    pub fn events(&self) -> Vec<serde_json::Value> {
        let Ok(contents) = std::fs::read_to_string(self.dir.join("events.jsonl")) else {
            return vec![];
        };
        contents.lines().filter_map(|line| serde_json::from_str(line).ok()).collect()
    }

    /// Count of events with the given name.
    pub fn event_count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e["event"] == name).count()
    }
}

impl Drop for RoostDaemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        // Kill the isolated tmux server — cleans up the agent session.
        let _ = Command::new("tmux")
            .arg("-S")
            .arg(&self.tmux_socket)
            .arg("kill-server")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}
