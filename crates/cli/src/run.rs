// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level daemon runner — shared by `main` and the end-to-end specs.
//!
//! Prepares the runtime directory and endpoints, installs the agent
//! hooks, creates or adopts the tmux session, then wires one
//! supervisory task per subsystem under a shared cancellation token.
//! Startup environment failures are the only fatal errors; everything
//! after `run` reaches its task tree is logged and survived.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::activity::{ActivityMonitor, ActivityState};
use crate::broadcast::Broadcaster;
use crate::channel::ChannelSet;
use crate::config::Settings;
use crate::control::ControlServer;
use crate::detect::{ReadinessCell, ReadinessDetector, StdoutTap, Transition};
use crate::event::Turn;
use crate::event_log::{DaemonEvent, EventLog};
use crate::inject::InjectionController;
use crate::paths::RuntimePaths;
use crate::queue::MessageQueue;
use crate::setup;
use crate::supervise::Supervisor;
use crate::tmux::TmuxController;
use crate::watch::{DirWatcher, WatchEvent};

/// How long shutdown waits for the task tree before abandoning it.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize the tracing subscriber from the configured format/level.
pub fn init_logging(format: &str, level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    if format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// A fully-prepared daemon ready to run.
///
/// Construction performs every fatal step (directory, endpoints, hook
/// install, session create-or-adopt) so [`Daemon::run`] can treat all
/// later errors as survivable.
pub struct Daemon {
    settings: Settings,
    paths: RuntimePaths,
    log: Arc<EventLog>,
    tmux: Arc<TmuxController>,
    queue: Arc<MessageQueue>,
    cell: Arc<ReadinessCell>,
    activity: Arc<ActivityState>,
    supervisor: Supervisor,
    adopted: bool,
    control: ControlServer,
    broadcaster: Broadcaster,
    tap: StdoutTap,
    turn_rx: mpsc::Receiver<Turn>,
    wake_rx: mpsc::Receiver<()>,
    shutdown: CancellationToken,
}

/// Prepare the runtime: directory, endpoints, hooks, session.
pub fn prepare(settings: Settings) -> anyhow::Result<Daemon> {
    let paths = RuntimePaths::new(&settings.dir);
    paths.ensure()?;
    let log = Arc::new(EventLog::new(Some(paths.event_log())));

    let tmux = Arc::new(TmuxController::with_socket(
        settings.session.clone(),
        settings.tmux_socket.clone(),
    ));
    tmux.check_binary()?;

    // The hooks call back into control.sock, so both endpoints listen
    // before the agent can possibly launch.
    let (turn_tx, turn_rx) = mpsc::channel::<Turn>(64);
    let (wake_tx, wake_rx) = mpsc::channel::<()>(16);
    let control = ControlServer::bind(&paths, log.clone(), turn_tx, wake_tx)?;
    let broadcaster = Broadcaster::bind(&paths, log.clone())?;

    setup::install_hooks(&settings.agent_settings, &paths.control_socket())
        .context("install agent hooks")?;

    let mut supervisor = Supervisor::new(
        tmux.clone(),
        log.clone(),
        settings.command.clone(),
        settings.poll_interval,
        settings.backoff_initial,
        settings.backoff_cap,
        paths.stdout_tap(),
    );
    let adopted = supervisor.start().context("start agent session")?;

    let tap = StdoutTap::open(&paths.stdout_tap())?;

    Ok(Daemon {
        settings,
        paths,
        log,
        tmux,
        queue: Arc::new(MessageQueue::new()),
        cell: Arc::new(ReadinessCell::new()),
        activity: Arc::new(ActivityState::new()),
        supervisor,
        adopted,
        control,
        broadcaster,
        tap,
        turn_rx,
        wake_rx,
        shutdown: CancellationToken::new(),
    })
}

impl Daemon {
    /// Run the task tree until SIGTERM/SIGINT or external cancellation,
    /// then drain within [`SHUTDOWN_TIMEOUT`] and unlink the endpoints.
    /// The agent and its tmux session survive shutdown.
    pub async fn run(self) -> anyhow::Result<i32> {
        let Daemon {
            settings,
            paths,
            log,
            tmux,
            queue,
            cell,
            activity,
            supervisor,
            adopted,
            control,
            broadcaster,
            tap,
            turn_rx,
            wake_rx,
            shutdown,
        } = self;

        let detector = ReadinessDetector::new(
            cell.clone(),
            tmux.clone(),
            log.clone(),
            settings.silence_timeout,
            settings.prompt_marker.clone(),
            settings.confirm_markers.clone(),
        );
        if adopted {
            // Existing session: derive the current state from a fresh
            // snapshot instead of waiting out a silence window.
            detector.seed_from_snapshot().await;
        }

        let (edge_tx, edge_rx) = mpsc::channel::<Transition>(16);
        let (watch_tx, mut watch_rx) = mpsc::channel::<WatchEvent>(64);

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        tasks.push(tokio::spawn(
            DirWatcher::new(paths.clone()).run(watch_tx, shutdown.clone()),
        ));

        // Watch events drive the reader set; out.* artifacts are only
        // logged.
        let mut channels = ChannelSet::new(queue.clone(), log.clone(), shutdown.clone());
        let channel_log = log.clone();
        let channel_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = channel_shutdown.cancelled() => break,
                    event = watch_rx.recv() => {
                        match event {
                            Some(WatchEvent::InputAdded { path, channel }) => {
                                channels.register(&path, &channel);
                            }
                            Some(WatchEvent::InputRemoved { path }) => {
                                channels.deregister(&path);
                            }
                            Some(WatchEvent::OutputAdded { path, .. }) => {
                                channel_log.record(DaemonEvent::ChannelRegister {
                                    path: path.display().to_string(),
                                });
                            }
                            Some(WatchEvent::OutputRemoved { path }) => {
                                channel_log.record(DaemonEvent::ChannelDeregister {
                                    path: path.display().to_string(),
                                });
                            }
                            None => break,
                        }
                    }
                }
            }
            channels.close_all();
        }));

        tasks.push(tokio::spawn(tap.run(cell.clone(), shutdown.clone())));
        tasks.push(tokio::spawn(detector.run(edge_tx, shutdown.clone())));
        tasks.push(tokio::spawn(
            ActivityMonitor::new(tmux.clone(), activity.clone()).run(shutdown.clone()),
        ));
        tasks.push(tokio::spawn(control.run(shutdown.clone())));
        tasks.push(tokio::spawn(broadcaster.run(turn_rx, shutdown.clone())));
        tasks.push(tokio::spawn(
            InjectionController {
                queue,
                cell,
                activity,
                tmux,
                log,
                idle_threshold: settings.idle_threshold,
            }
            .run(edge_rx, wake_rx, shutdown.clone()),
        ));
        tasks.push(tokio::spawn(supervisor.run(shutdown.clone())));

        wait_for_shutdown(&shutdown).await?;
        shutdown.cancel();

        let drained = tokio::time::timeout(
            SHUTDOWN_TIMEOUT,
            futures_util::future::join_all(tasks),
        )
        .await
        .is_ok();
        if !drained {
            tracing::warn!("task tree did not drain within the shutdown timeout");
        }

        // Endpoint files go; the tmux session and the agent stay.
        paths.cleanup();
        info!("shutdown complete");
        Ok(0)
    }
}

/// Resolve-and-run entry point used by `main`.
pub async fn run(settings: Settings) -> anyhow::Result<i32> {
    prepare(settings)?.run().await
}

/// Wait for SIGTERM, SIGINT, or external cancellation.
async fn wait_for_shutdown(shutdown: &CancellationToken) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    let mut int = signal(SignalKind::interrupt()).context("install SIGINT handler")?;

    tokio::select! {
        _ = term.recv() => info!("received SIGTERM"),
        _ = int.recv() => info!("received SIGINT"),
        _ = shutdown.cancelled() => {}
    }
    Ok(())
}
