// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios against the real binary, a mock agent, and an
//! isolated tmux server. Every test skips cleanly when tmux is absent.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use roost_specs::{mkfifo, tmux_available, wait_for, write_line, RoostDaemon};

macro_rules! require_tmux {
    () => {
        if !tmux_available() {
            eprintln!("skipping: tmux not found in PATH");
            return Ok(());
        }
    };
}

#[test]
fn single_message_reaches_the_pane_and_is_logged() -> anyhow::Result<()> {
    require_tmux!();

    let daemon = RoostDaemon::builder().spawn()?;
    anyhow::ensure!(daemon.wait_until_up(), "daemon endpoints never appeared");

    write_line(&daemon.input_pipe(), "hello world")?;

    let injected = wait_for(Duration::from_secs(15), || {
        daemon.capture_pane().contains("default] hello world")
    });
    anyhow::ensure!(injected, "injected line never appeared:\n{}", daemon.capture_pane());

    // The mock agent echoed the submitted input back.
    let replied = wait_for(Duration::from_secs(15), || {
        daemon.capture_pane().contains("reply: [")
    });
    anyhow::ensure!(replied, "mock agent never replied:\n{}", daemon.capture_pane());

    anyhow::ensure!(
        wait_for(Duration::from_secs(5), || daemon.event_count("message_injected") >= 1),
        "message_injected event missing"
    );
    assert_eq!(daemon.event_count("message_received"), 1);
    Ok(())
}

#[test]
fn messages_queued_while_busy_inject_as_one_ordered_batch() -> anyhow::Result<()> {
    require_tmux!();

    // A longer silence window keeps the daemon busy while we queue.
    let daemon = RoostDaemon::builder().silence_timeout(5.0).spawn()?;
    anyhow::ensure!(daemon.wait_until_up(), "daemon endpoints never appeared");

    mkfifo(&daemon.dir.join("in.a"))?;
    mkfifo(&daemon.dir.join("in.b"))?;

    write_line(&daemon.dir.join("in.a"), "first")?;
    write_line(&daemon.dir.join("in.b"), "second")?;
    write_line(&daemon.dir.join("in.a"), "third")?;

    let injected = wait_for(Duration::from_secs(20), || {
        let pane = daemon.capture_pane();
        pane.contains("a] first") && pane.contains("b] second") && pane.contains("a] third")
    });
    anyhow::ensure!(injected, "batch never appeared:\n{}", daemon.capture_pane());

    let pane = daemon.capture_pane();
    let first = pane.find("a] first").unwrap();
    let second = pane.find("b] second").unwrap();
    let third = pane.find("a] third").unwrap();
    assert!(first < second && second < third, "batch out of order:\n{pane}");

    // One batch, one injection event covering all three messages.
    anyhow::ensure!(
        wait_for(Duration::from_secs(5), || {
            daemon.events().iter().any(|e| {
                e["event"] == "message_injected" && e["message_count"] == 3
            })
        }),
        "expected a single 3-message injection, events: {:?}",
        daemon.events()
    );
    Ok(())
}

fn read_turn_line(stream: &mut UnixStream) -> anyhow::Result<String> {
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    anyhow::ensure!(line.ends_with('\n'), "subscriber stream closed early");
    Ok(line)
}

fn post_control(daemon: &RoostDaemon, body: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
    let mut stream = UnixStream::connect(daemon.control_socket())?;
    stream.write_all(body.to_string().as_bytes())?;
    stream.shutdown(std::net::Shutdown::Write)?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    let mut reply = String::new();
    use std::io::Read;
    stream.read_to_string(&mut reply)?;
    Ok(serde_json::from_str(reply.trim())?)
}

#[test]
fn turns_fan_out_to_every_subscriber() -> anyhow::Result<()> {
    require_tmux!();

    let daemon = RoostDaemon::builder().spawn()?;
    anyhow::ensure!(daemon.wait_until_up(), "daemon endpoints never appeared");

    let mut subs = Vec::new();
    for _ in 0..3 {
        subs.push(UnixStream::connect(daemon.output_socket())?);
    }
    // Let the accept loop pick all three up.
    std::thread::sleep(Duration::from_millis(200));

    let reply = post_control(
        &daemon,
        &serde_json::json!({
            "type": "broadcast",
            "session": "spec",
            "turn": [{"type": "text", "text": "fan out"}]
        }),
    )?;
    anyhow::ensure!(reply["ok"] == true, "broadcast rejected: {reply}");

    let mut lines = Vec::new();
    for stream in &mut subs {
        lines.push(read_turn_line(stream)?);
    }
    assert_eq!(lines[0], lines[1]);
    assert_eq!(lines[1], lines[2]);
    let turn: serde_json::Value = serde_json::from_str(lines[0].trim())?;
    assert_eq!(turn["session"], "spec");
    assert_eq!(turn["turn"][0]["text"], "fan out");

    // Dropping one subscriber leaves the others working.
    drop(subs.pop());
    post_control(
        &daemon,
        &serde_json::json!({
            "type": "broadcast",
            "session": "spec",
            "turn": [{"type": "text", "text": "second"}]
        }),
    )?;
    for stream in &mut subs {
        let line = read_turn_line(stream)?;
        assert!(line.contains("second"));
    }
    Ok(())
}

#[test]
fn channel_set_converges_on_create_and_remove() -> anyhow::Result<()> {
    require_tmux!();

    let daemon = RoostDaemon::builder().spawn()?;
    anyhow::ensure!(daemon.wait_until_up(), "daemon endpoints never appeared");

    let pipe = daemon.dir.join("in.x");
    mkfifo(&pipe)?;

    anyhow::ensure!(
        wait_for(Duration::from_secs(10), || {
            daemon.events().iter().any(|e| {
                e["event"] == "channel_register"
                    && e["path"].as_str().is_some_and(|p| p.ends_with("in.x"))
            })
        }),
        "in.x never registered"
    );

    std::fs::remove_file(&pipe)?;
    anyhow::ensure!(
        wait_for(Duration::from_secs(10), || {
            daemon.events().iter().any(|e| {
                e["event"] == "channel_deregister"
                    && e["path"].as_str().is_some_and(|p| p.ends_with("in.x"))
            })
        }),
        "in.x never deregistered"
    );
    Ok(())
}

#[test]
fn crashed_agent_restarts_with_backoff_and_keeps_serving() -> anyhow::Result<()> {
    require_tmux!();

    let daemon = RoostDaemon::builder().spawn()?;
    anyhow::ensure!(daemon.wait_until_up(), "daemon endpoints never appeared");

    anyhow::ensure!(
        wait_for(Duration::from_secs(10), || {
            daemon.capture_pane().contains("mock agent up")
        }),
        "mock agent never came up"
    );

    daemon.kill_agent()?;

    anyhow::ensure!(
        wait_for(Duration::from_secs(20), || daemon.event_count("process_restart") >= 1),
        "agent never restarted, events: {:?}",
        daemon.events()
    );
    let events = daemon.events();
    let restart = events.iter().find(|e| e["event"] == "process_restart").unwrap();
    assert_eq!(restart["restart_count"], 1);
    assert_eq!(restart["backoff_seconds"], 1);
    anyhow::ensure!(daemon.event_count("process_crash") >= 1, "crash never logged");

    // Injection still works against the respawned agent.
    write_line(&daemon.input_pipe(), "after restart")?;
    anyhow::ensure!(
        wait_for(Duration::from_secs(20), || {
            daemon.capture_pane().contains("default] after restart")
        }),
        "injection after restart failed:\n{}",
        daemon.capture_pane()
    );
    Ok(())
}
