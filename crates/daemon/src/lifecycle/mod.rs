// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, shutdown, recovery.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use fs2::FileExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::UnixListener;
use tracing::{info, warn};

use lanectl_adapters::{ChannelAdapter, ContainerDriver};
use lanectl_core::{Clock, SystemClock};
use lanectl_engine::{GroupQueue, SupervisorConfig, WorkerRunSupervisor};
use lanectl_storage::{load_snapshot, Checkpointer, MaterializedState, Wal};

use crate::event_bus::{EventBus, EventReader};
use crate::handler::DaemonHandler;

/// Operator-configurable cross-lane concurrency cap default (spec.md never
/// gives a literal value; this keeps a single daemon from saturating the
/// host with containers by default).
pub const DEFAULT_MAX_CONCURRENT_CONTAINERS: usize = 4;

const HARD_TIMEOUT_MS: u64 = 6 * 60 * 60 * 1000; // 6h absolute ceiling on a run
const NO_CONTAINER_GRACE_MS: u64 = 60_000;
const QUEUED_CURSOR_GRACE_MS: u64 = 30_000;
const REPAIR_HANDOFF_GRACE_MS: u64 = 120_000;
const LEASE_TTL_MS: u64 = 90_000;
const RESTART_SUPPRESSION_WINDOW_MS: u64 = 15_000;

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory (e.g. ~/.local/state/lanectl).
    pub state_dir: PathBuf,
    /// Root of the file-dropped IPC mailboxes (`<root>/<lane>/{messages,tasks}`).
    pub ipc_root: PathBuf,
    /// Path to the minimal operator status Unix socket.
    pub socket_path: PathBuf,
    /// Path to lock/PID file.
    pub lock_path: PathBuf,
    /// Path to version file.
    pub version_path: PathBuf,
    /// Path to daemon log file.
    pub log_path: PathBuf,
    /// Path to WAL file.
    pub wal_path: PathBuf,
    /// Path to snapshot file.
    pub snapshot_path: PathBuf,
    /// Cross-lane concurrency cap (spec.md §4.4).
    pub max_concurrent_containers: usize,
}

impl Config {
    /// Load configuration for the user-level daemon.
    ///
    /// Uses fixed paths under `~/.local/state/lanectl/` (or
    /// `$XDG_STATE_HOME/lanectl/`). One daemon serves every registered lane.
    pub fn load() -> Result<Self, LifecycleError> {
        let state_dir = crate::env::state_dir()?;

        Ok(Self {
            ipc_root: state_dir.join("ipc"),
            socket_path: state_dir.join("daemon.sock"),
            lock_path: state_dir.join("daemon.pid"),
            version_path: state_dir.join("daemon.version"),
            log_path: state_dir.join("daemon.log"),
            wal_path: state_dir.join("wal").join("events.wal"),
            snapshot_path: state_dir.join("snapshot.json"),
            max_concurrent_containers: crate::env::max_concurrent_containers()
                .unwrap_or(DEFAULT_MAX_CONCURRENT_CONTAINERS),
            state_dir,
        })
    }
}

/// Daemon state during operation. The status-socket listener is returned
/// separately from startup so the caller can spawn it as its own task.
pub struct DaemonState<D: ContainerDriver, C: ChannelAdapter, CLK: Clock = SystemClock> {
    pub config: Config,
    #[allow(dead_code)]
    lock_file: File,
    pub state: Arc<Mutex<MaterializedState>>,
    pub handler: Arc<DaemonHandler<D, C, CLK>>,
    pub event_bus: EventBus,
    pub start_time: Instant,
}

/// Result of daemon startup.
pub struct StartupResult<D: ContainerDriver, C: ChannelAdapter, CLK: Clock = SystemClock> {
    pub daemon: DaemonState<D, C, CLK>,
    pub listener: UnixListener,
    pub event_reader: EventReader,
}

impl<D: ContainerDriver, C: ChannelAdapter, CLK: Clock> DaemonState<D, C, CLK> {
    /// Apply a WAL-replayed event to materialized state. Safe to call for
    /// events the handler already applied synchronously — `apply_event` is
    /// idempotent.
    pub fn reapply(&self, event: &lanectl_core::Event) {
        self.state.lock().apply_event(event);
    }

    /// Shut the daemon down gracefully: flush the WAL, checkpoint, and
    /// remove the PID/socket/version files. Worker containers are left
    /// running — on next startup the supervisor reconnects via each worker
    /// lane's live session, matching spec.md's "survives daemon restarts"
    /// requirement for in-flight runs.
    pub fn shutdown(&mut self) -> Result<(), LifecycleError> {
        info!("shutting down daemon");

        if let Err(e) = self.event_bus.flush() {
            warn!("failed to flush WAL on shutdown: {}", e);
        }

        let processed_seq = self.event_bus.processed_seq();
        if processed_seq > 0 {
            let state_clone = self.state.lock().clone();
            let checkpointer = Checkpointer::new(self.config.snapshot_path.clone());
            match checkpointer.checkpoint_sync(processed_seq, &state_clone) {
                Ok(result) => info!(
                    seq = result.seq,
                    size_bytes = result.size_bytes,
                    "saved final shutdown snapshot"
                ),
                Err(e) => warn!("failed to save shutdown snapshot: {}", e),
            }
        }

        if self.config.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.socket_path) {
                warn!("failed to remove socket file: {}", e);
            }
        }
        if self.config.lock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.lock_path) {
                warn!("failed to remove PID file: {}", e);
            }
        }
        if self.config.version_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.version_path) {
                warn!("failed to remove version file: {}", e);
            }
        }

        info!("daemon shutdown complete");
        Ok(())
    }
}

/// Lifecycle errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine state directory")]
    NoStateDir,

    #[error("failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("WAL error: {0}")]
    Wal(#[from] lanectl_storage::WalError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] lanectl_storage::SnapshotError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Start the daemon.
pub async fn startup<D, C, CLK>(
    config: &Config,
    driver: D,
    channel: C,
    clock: CLK,
) -> Result<StartupResult<D, C, CLK>, LifecycleError>
where
    D: ContainerDriver,
    C: ChannelAdapter,
    CLK: Clock,
{
    match startup_inner(config, driver, channel, clock).await {
        Ok(result) => Ok(result),
        Err(e) => {
            // Don't clean up if we failed to acquire the lock — those files
            // belong to the already-running daemon.
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(config);
            }
            Err(e)
        }
    }
}

async fn startup_inner<D, C, CLK>(
    config: &Config,
    driver: D,
    channel: C,
    clock: CLK,
) -> Result<StartupResult<D, C, CLK>, LifecycleError>
where
    D: ContainerDriver,
    C: ChannelAdapter,
    CLK: Clock,
{
    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Acquire lock first to avoid racing a second daemon instance. Use
    // OpenOptions to avoid truncating the file before we hold the lock,
    // which would wipe the running daemon's PID.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;

    use std::io::Write;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    if let Some(parent) = config.wal_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(&config.ipc_root)?;

    std::fs::write(&config.version_path, env!("CARGO_PKG_VERSION"))?;

    let (mut state, processed_seq) = match load_snapshot(&config.snapshot_path)? {
        Some(snapshot) => {
            info!(
                seq = snapshot.seq,
                lanes = snapshot.state.lanes.len(),
                worker_runs = snapshot.state.worker_runs.len(),
                "loaded snapshot"
            );
            (snapshot.state, snapshot.seq)
        }
        None => {
            info!("no snapshot found, starting with empty state");
            (MaterializedState::default(), 0)
        }
    };

    let event_wal = Wal::open(&config.wal_path, processed_seq)?;
    let events_to_replay = event_wal.entries_after(processed_seq)?;
    let (event_bus, event_reader) = EventBus::new(event_wal);
    let replay_count = events_to_replay.len();
    for entry in events_to_replay {
        state.apply_event(&entry.event);
    }
    if replay_count > 0 {
        info!(replay_count, processed_seq, "replayed events from WAL");
    }

    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let listener = UnixListener::bind(&config.socket_path)
        .map_err(|e| LifecycleError::BindFailed(config.socket_path.clone(), e))?;

    let state = Arc::new(Mutex::new(state));

    let queue = Arc::new(GroupQueue::new(driver.clone(), config.max_concurrent_containers));
    let supervisor = Arc::new(WorkerRunSupervisor::new(
        driver.clone(),
        SupervisorConfig {
            hard_timeout_ms: HARD_TIMEOUT_MS,
            no_container_grace_ms: NO_CONTAINER_GRACE_MS,
            queued_cursor_grace_ms: QUEUED_CURSOR_GRACE_MS,
            repair_handoff_grace_ms: REPAIR_HANDOFF_GRACE_MS,
            lease_ttl_ms: LEASE_TTL_MS,
            process_start_at_epoch_ms: clock.epoch_ms(),
            restart_suppression_window_ms: RESTART_SUPPRESSION_WINDOW_MS,
            owner_id: format!("lanectld-{}", std::process::id()),
        },
    ));

    let handler = Arc::new(DaemonHandler::new(
        Arc::clone(&state),
        event_bus.clone(),
        queue,
        supervisor,
        driver,
        channel,
        clock,
    ));

    info!("daemon started");

    Ok(StartupResult {
        daemon: DaemonState {
            config: config.clone(),
            lock_file,
            state,
            handler,
            event_bus,
            start_time: Instant::now(),
        },
        listener,
        event_reader,
    })
}

fn cleanup_on_failure(config: &Config) {
    if config.socket_path.exists() {
        let _ = std::fs::remove_file(&config.socket_path);
    }
    if config.version_path.exists() {
        let _ = std::fs::remove_file(&config.version_path);
    }
    if config.lock_path.exists() {
        let _ = std::fs::remove_file(&config.lock_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanectl_adapters::{FakeChannelAdapter, FakeContainerDriver};
    use lanectl_core::FakeClock;
    use lanectl_storage::Checkpointer;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        let state_dir = dir.path().to_path_buf();
        Config {
            ipc_root: state_dir.join("ipc"),
            socket_path: state_dir.join("daemon.sock"),
            lock_path: state_dir.join("daemon.pid"),
            version_path: state_dir.join("daemon.version"),
            log_path: state_dir.join("daemon.log"),
            wal_path: state_dir.join("wal").join("events.wal"),
            snapshot_path: state_dir.join("snapshot.json"),
            max_concurrent_containers: DEFAULT_MAX_CONCURRENT_CONTAINERS,
            state_dir,
        }
    }

    #[tokio::test]
    async fn startup_creates_lock_version_and_socket_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);

        let result = startup(
            &config,
            FakeContainerDriver::new(),
            FakeChannelAdapter::new(),
            FakeClock::new(),
        )
        .await
        .unwrap();

        assert!(config.lock_path.exists());
        assert!(config.version_path.exists());
        assert!(config.socket_path.exists());
        assert_eq!(
            std::fs::read_to_string(&config.version_path).unwrap(),
            env!("CARGO_PKG_VERSION")
        );
        drop(result);
    }

    #[tokio::test]
    async fn startup_fails_with_lock_held_and_leaves_running_daemons_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);

        let first = startup(
            &config,
            FakeContainerDriver::new(),
            FakeChannelAdapter::new(),
            FakeClock::new(),
        )
        .await
        .unwrap();

        let err = startup(
            &config,
            FakeContainerDriver::new(),
            FakeChannelAdapter::new(),
            FakeClock::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, LifecycleError::LockFailed(_)));
        // The first daemon's files must survive the second's failed attempt.
        assert!(config.lock_path.exists());
        assert!(config.version_path.exists());
        drop(first);
    }

    #[tokio::test]
    async fn startup_loads_existing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        std::fs::create_dir_all(config.snapshot_path.parent().unwrap()).unwrap();

        let mut seeded = MaterializedState::default();
        seeded.apply_event(&lanectl_core::Event::LaneRegistered {
            lane_id: lanectl_core::LaneId::new("jarvis-worker-1"),
            folder_name: "jarvis-worker-1".to_string(),
        });
        Checkpointer::new(config.snapshot_path.clone())
            .checkpoint_sync(7, &seeded)
            .unwrap();

        let result = startup(
            &config,
            FakeContainerDriver::new(),
            FakeChannelAdapter::new(),
            FakeClock::new(),
        )
        .await
        .unwrap();

        assert_eq!(result.daemon.state.lock().lanes.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_removes_socket_lock_and_version_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);

        let mut result = startup(
            &config,
            FakeContainerDriver::new(),
            FakeChannelAdapter::new(),
            FakeClock::new(),
        )
        .await
        .unwrap();

        result.daemon.shutdown().unwrap();

        assert!(!config.socket_path.exists());
        assert!(!config.lock_path.exists());
        assert!(!config.version_path.exists());
    }

    #[tokio::test]
    async fn shutdown_writes_a_snapshot_once_events_have_been_processed() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);

        let mut result = startup(
            &config,
            FakeContainerDriver::new(),
            FakeChannelAdapter::new(),
            FakeClock::new(),
        )
        .await
        .unwrap();

        result
            .daemon
            .event_bus
            .send(lanectl_core::Event::LaneRegistered {
                lane_id: lanectl_core::LaneId::new("jarvis-worker-1"),
                folder_name: "jarvis-worker-1".to_string(),
            })
            .unwrap();
        result.daemon.event_bus.flush().unwrap();
        // Mark it processed so `shutdown` sees a non-zero processed_seq and
        // takes the checkpoint branch.
        let entry = result.event_reader.recv().await.unwrap().unwrap();
        result.daemon.reapply(&entry.event);
        result.event_reader.mark_processed(entry.seq);

        result.daemon.shutdown().unwrap();

        assert!(config.snapshot_path.exists());
    }

    #[test]
    fn cleanup_on_failure_removes_partial_startup_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        std::fs::write(&config.socket_path, b"").unwrap();
        std::fs::write(&config.version_path, b"0.1.0").unwrap();
        std::fs::write(&config.lock_path, b"123").unwrap();

        cleanup_on_failure(&config);

        assert!(!config.socket_path.exists());
        assert!(!config.version_path.exists());
        assert!(!config.lock_path.exists());
    }
}
