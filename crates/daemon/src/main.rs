// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! lanectld: the autonomous code-delivery dispatch daemon.
//!
//! Background process that owns the event loop: the IPC watcher reads
//! file-dropped dispatch/task/completion envelopes, `DaemonHandler` applies
//! authorization and the dispatch/completion contracts, and the
//! orchestrator tick drives the Group Queue and Worker-Run Supervisor
//! forward (spec.md §4.3-§4.5).

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use lanectl_adapters::{DockerContainerDriver, SyntheticChannelAdapter};
use lanectl_core::SystemClock;
use lanectl_ipc::{poll_loop, watch_for_changes, IpcHandler};
use lanectl_storage::{Checkpointer, MaterializedState, Wal};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::{error, info};

use lanectl_daemon::event_bus::EventBus;
use lanectl_daemon::lifecycle::{self, Config, LifecycleError, StartupResult};
use lanectl_daemon::{orchestrator, protocol};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("lanectld {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("lanectld {}", env!("CARGO_PKG_VERSION"));
                println!("lane control daemon — dispatches chat-driven coding work to containerized agents");
                println!();
                println!("USAGE:");
                println!("    lanectld");
                println!();
                println!("The daemon is typically started by the `lanectl` CLI and should not");
                println!("be invoked directly. It reads dispatch/task envelopes dropped under");
                println!("its IPC root and exposes a minimal status socket for `lanectl`.");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: lanectld [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = Config::load()?;

    rotate_log_if_needed(&config.log_path);
    write_startup_marker(&config)?;
    let log_guard = setup_logging(&config)?;

    info!("starting lanectld");

    let driver = DockerContainerDriver::new();
    let channel = SyntheticChannelAdapter::new();
    let clock = SystemClock;

    let StartupResult {
        mut daemon,
        listener: status_listener,
        mut event_reader,
    } = match lifecycle::startup(&config, driver, channel, clock).await {
        Ok(r) => r,
        Err(LifecycleError::LockFailed(_)) => {
            let pid = std::fs::read_to_string(&config.lock_path)
                .unwrap_or_default()
                .trim()
                .to_string();
            let version = std::fs::read_to_string(&config.version_path)
                .unwrap_or_default()
                .trim()
                .to_string();

            eprintln!("lanectld is already running");
            if !pid.is_empty() {
                eprintln!("  pid: {pid}");
            }
            if !version.is_empty() {
                let current_version = env!("CARGO_PKG_VERSION");
                if version == current_version {
                    eprintln!("  version: {version}");
                } else {
                    eprintln!("  version: {version} (outdated — current: {current_version})");
                }
            }
            std::process::exit(1);
        }
        Err(e) => {
            write_startup_error(&config, &e);
            error!("failed to start daemon: {}", e);
            drop(log_guard);
            return Err(e.into());
        }
    };

    // Shutdown signal: non-durable, so shutdown requests are never persisted
    // to the WAL and accidentally replayed on the next startup.
    let shutdown_notify = Arc::new(Notify::new());

    // IPC watcher: native push notifications with a polling fallback
    // (mirrors the teacher's dual-mode `notify::bus` design).
    let (_fs_watcher, mut push_rx) = watch_for_changes(&config.ipc_root)?;
    let handler_for_watcher: Arc<dyn IpcHandler> = daemon.handler.clone();
    let (poll_shutdown_tx, poll_shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(poll_loop(
        config.ipc_root.clone(),
        Arc::clone(&handler_for_watcher),
        lanectl_daemon::env::ipc_scan_interval(),
        poll_shutdown_rx,
    ));

    spawn_checkpoint(
        Arc::clone(&daemon.state),
        event_reader.wal(),
        daemon.config.snapshot_path.clone(),
    );
    spawn_flush_task(daemon.event_bus.clone());
    spawn_status_socket(
        status_listener,
        Arc::clone(&shutdown_notify),
        Arc::clone(&daemon.state),
        daemon.handler.queue().clone(),
        daemon.start_time,
    );

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!(
        "daemon ready, ipc root {}",
        config.ipc_root.display()
    );
    println!("READY");

    let mut orchestrator_tick = tokio::time::interval(Duration::from_millis(500));
    // Per-lane cursor of the most recent agent-visible message timestamp;
    // populated as the IPC watcher processes dispatches. Empty for now —
    // the supervisor's queued-cursor-stale rule degrades gracefully when a
    // lane has no recorded cursor yet.
    let last_agent_timestamp: HashMap<lanectl_core::LaneId, u64> = HashMap::new();

    loop {
        tokio::select! {
            _ = push_rx.recv() => {
                // Native filesystem event arrived; the poll loop's own
                // ticker will pick up the change on its next tick, same as
                // the teacher's dual-mode design. No extra scan here avoids
                // duplicating `scan_once` across two call sites.
            }

            result = event_reader.recv() => {
                match result {
                    Ok(Some(entry)) => {
                        daemon.reapply(&entry.event);
                        event_reader.mark_processed(entry.seq);
                    }
                    Ok(None) => {
                        info!("event bus closed, shutting down");
                        break;
                    }
                    Err(e) => {
                        error!("error reading from WAL: {}", e);
                    }
                }
            }

            _ = orchestrator_tick.tick() => {
                orchestrator::tick(daemon.handler.as_ref(), &daemon.event_bus, &last_agent_timestamp).await;
            }

            _ = shutdown_notify.notified() => {
                info!("shutdown requested via status socket");
                break;
            }

            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }

            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                break;
            }
        }
    }

    let _ = poll_shutdown_tx.send(());
    daemon.shutdown()?;
    info!("daemon stopped");
    Ok(())
}

/// Flush interval for group commit (~10ms durability window).
const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

fn spawn_flush_task(event_bus: EventBus) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(FLUSH_INTERVAL);
        loop {
            interval.tick().await;
            if event_bus.needs_flush() {
                if let Err(e) = event_bus.flush() {
                    tracing::error!("failed to flush event bus: {}", e);
                }
            }
        }
    });
}

/// Checkpoint interval (60 seconds).
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(60);

fn spawn_checkpoint(
    state: Arc<Mutex<MaterializedState>>,
    event_wal: Arc<Mutex<Wal>>,
    snapshot_path: PathBuf,
) {
    let checkpointer = Checkpointer::new(snapshot_path);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CHECKPOINT_INTERVAL);
        loop {
            interval.tick().await;

            let (state_ref, processed_seq) = {
                let state_guard = state.lock();
                let wal_guard = event_wal.lock();
                (state_guard.clone(), wal_guard.processed_seq())
            };
            if processed_seq == 0 {
                continue;
            }

            let handle = checkpointer.start(processed_seq, &state_ref);
            let result = tokio::task::spawn_blocking(move || handle.wait()).await;

            match result {
                Ok(Ok(checkpoint_result)) => {
                    tracing::debug!(
                        seq = checkpoint_result.seq,
                        size_bytes = checkpoint_result.size_bytes,
                        "checkpoint complete"
                    );
                    let mut wal = event_wal.lock();
                    if let Err(e) = wal.truncate_before(processed_seq) {
                        tracing::warn!(error = %e, "failed to truncate WAL after checkpoint");
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "checkpoint failed, WAL not truncated");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "checkpoint task panicked");
                }
            }
        }
    });
}

/// Serve the minimal status socket (`protocol::{Request,Response}`). Every
/// connection is handled to completion before the listener accepts the
/// next one — this socket only ever carries small, infrequent operator
/// queries, unlike the teacher's job-output-carrying protocol.
fn spawn_status_socket<D: lanectl_adapters::ContainerDriver>(
    listener: tokio::net::UnixListener,
    shutdown: Arc<Notify>,
    state: Arc<Mutex<MaterializedState>>,
    queue: Arc<lanectl_engine::GroupQueue<D>>,
    start_time: std::time::Instant,
) {
    tokio::spawn(async move {
        loop {
            let (mut stream, _addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "status socket accept failed");
                    continue;
                }
            };
            let shutdown = Arc::clone(&shutdown);
            let state = Arc::clone(&state);
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let request = match protocol::read_request(
                    &mut stream,
                    protocol::DEFAULT_TIMEOUT,
                )
                .await
                {
                    Ok(r) => r,
                    Err(_) => return,
                };
                let response = handle_status_request(request, &state, &queue, &shutdown, start_time);
                let _ = protocol::write_response(
                    &mut stream,
                    &response,
                    protocol::DEFAULT_TIMEOUT,
                )
                .await;
            });
        }
    });
}

fn run_summary(run: &lanectl_core::WorkerRun) -> protocol::RunSummary {
    protocol::RunSummary {
        run_id: run.run_id.to_string(),
        lane_id: run.lane_id.to_string(),
        phase: run.phase,
        status: run.status,
        repair_attempts: run.repair_attempts,
        created_at_epoch_ms: run.created_at_epoch_ms,
        completed_at_epoch_ms: run.completed_at_epoch_ms,
    }
}

fn handle_status_request<D: lanectl_adapters::ContainerDriver>(
    request: protocol::Request,
    state: &Arc<Mutex<MaterializedState>>,
    queue: &Arc<lanectl_engine::GroupQueue<D>>,
    shutdown: &Arc<Notify>,
    start_time: std::time::Instant,
) -> protocol::Response {
    use protocol::{Request, Response};

    match request {
        Request::Ping => Response::Pong,
        Request::Version => Response::Version {
            version: protocol::PROTOCOL_VERSION.to_string(),
        },
        Request::Status => {
            let state = state.lock();
            Response::Status(protocol::StatusSummary {
                uptime_secs: start_time.elapsed().as_secs(),
                registered_lanes: state.lanes.len(),
                active_containers: queue.active_count(),
                non_terminal_runs: state
                    .worker_runs
                    .values()
                    .filter(|r| r.phase != lanectl_core::Phase::Terminal)
                    .count(),
            })
        }
        Request::ListRuns => {
            let state = state.lock();
            Response::Runs(
                state
                    .worker_runs
                    .values()
                    .filter(|r| r.phase != lanectl_core::Phase::Terminal)
                    .map(run_summary)
                    .collect(),
            )
        }
        Request::GetRun { run_id } => {
            let state = state.lock();
            Response::Run(state.get_worker_run(&run_id).map(run_summary))
        }
        Request::Shutdown => {
            shutdown.notify_one();
            Response::ShuttingDown
        }
    }
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep (daemon.log.1, .2, .3).
const MAX_ROTATED_LOGS: u32 = 3;

fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

/// Startup marker prefix written to log before anything else.
const STARTUP_MARKER_PREFIX: &str = "--- lanectld: starting (pid: ";

fn write_startup_marker(config: &Config) -> Result<(), LifecycleError> {
    use std::io::Write;
    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)?;
    writeln!(
        file,
        "{}{}) ---\n",
        STARTUP_MARKER_PREFIX,
        std::process::id()
    )?;
    Ok(())
}

fn write_startup_error(config: &Config, error: &LifecycleError) {
    use std::io::Write;
    let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)
    else {
        return;
    };
    let _ = writeln!(file, "ERROR failed to start daemon: {}", error);
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file_appender = tracing_appender::rolling::never(
        config.log_path.parent().ok_or(LifecycleError::NoStateDir)?,
        config
            .log_path
            .file_name()
            .ok_or(LifecycleError::NoStateDir)?,
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}
