// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon client for CLI commands.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::UnixStream;

use lanectl_daemon::protocol::{self, ProtocolError};
use lanectl_daemon::{Request, Response, RunSummary, StatusSummary};

use crate::daemon_process::{
    cleanup_stale_socket, daemon_dir, daemon_socket, probe_socket, read_startup_error,
    start_daemon_background, stop_daemon_sync, wrap_with_startup_error,
};

fn parse_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Timeout for status-socket requests.
pub fn timeout_ipc() -> Duration {
    parse_duration_ms("LANECTL_TIMEOUT_IPC_MS").unwrap_or(Duration::from_secs(5))
}

/// Timeout for waiting for the daemon to start.
pub fn timeout_connect() -> Duration {
    parse_duration_ms("LANECTL_TIMEOUT_CONNECT_MS").unwrap_or(Duration::from_secs(5))
}

/// Timeout for waiting for the daemon process to exit.
pub fn timeout_exit() -> Duration {
    parse_duration_ms("LANECTL_TIMEOUT_EXIT_MS").unwrap_or(Duration::from_secs(2))
}

/// Polling interval for connection retries.
pub fn poll_interval() -> Duration {
    parse_duration_ms("LANECTL_CONNECT_POLL_MS").unwrap_or(Duration::from_millis(50))
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon not running")]
    DaemonNotRunning,

    #[error("failed to start daemon: {0}")]
    DaemonStartFailed(String),

    #[error("timed out waiting for the daemon to start")]
    DaemonStartTimeout,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("daemon rejected request: {0}")]
    Rejected(String),

    #[error("unexpected response from daemon")]
    UnexpectedResponse,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not determine state directory")]
    NoStateDir,
}

/// Thin client for the operator status socket. Dispatch, completion, and
/// task routing are driven entirely through the file-dropped IPC mailboxes
/// (`lanectl-ipc`) — this client only ever reads status and ledger state,
/// or asks the daemon to shut down.
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    /// Connect to an existing daemon, auto-starting it if it isn't running.
    pub async fn connect_or_start() -> Result<Self, ClientError> {
        match Self::connect() {
            Ok(client) => {
                if probe_socket(&client.socket_path) {
                    Ok(client)
                } else {
                    cleanup_stale_socket()?;
                    let child = start_daemon_background()?;
                    Self::connect_with_retry(timeout_connect(), child).await
                }
            }
            Err(ClientError::DaemonNotRunning) => {
                let child = start_daemon_background()?;
                Self::connect_with_retry(timeout_connect(), child).await
            }
            Err(e) => Err(wrap_with_startup_error(e)),
        }
    }

    /// Connect to an already-running daemon; never starts one.
    pub fn connect() -> Result<Self, ClientError> {
        let socket_path = daemon_socket()?;
        if !socket_path.exists() {
            return Err(ClientError::DaemonNotRunning);
        }
        Ok(Self { socket_path })
    }

    async fn connect_with_retry(
        timeout: Duration,
        mut child: std::process::Child,
    ) -> Result<Self, ClientError> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let poll_start = Instant::now();
                    while poll_start.elapsed() < timeout_exit() {
                        if let Some(err) = read_startup_error() {
                            return Err(ClientError::DaemonStartFailed(err));
                        }
                        tokio::time::sleep(poll_interval()).await;
                    }
                    return Err(ClientError::DaemonStartFailed(format!(
                        "daemon exited with {status}"
                    )));
                }
                Ok(None) => {}
                Err(_) => {}
            }

            match Self::connect() {
                Ok(client) => return Ok(client),
                Err(ClientError::DaemonNotRunning) => {
                    tokio::time::sleep(poll_interval()).await;
                }
                Err(e) => return Err(wrap_with_startup_error(e)),
            }
        }
        Err(wrap_with_startup_error(ClientError::DaemonStartTimeout))
    }

    async fn send(&self, request: &Request) -> Result<Response, ClientError> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (mut reader, mut writer) = stream.into_split();

        let data = protocol::encode(request)?;
        tokio::time::timeout(timeout_ipc(), protocol::write_message(&mut writer, &data))
            .await
            .map_err(|_| ProtocolError::Timeout)??;

        let response_bytes = tokio::time::timeout(timeout_ipc(), protocol::read_message(&mut reader))
            .await
            .map_err(|_| ProtocolError::Timeout)??;

        Ok(protocol::decode(&response_bytes)?)
    }

    fn reject<T>(response: Response) -> Result<T, ClientError> {
        match response {
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Health check.
    pub async fn ping(&self) -> Result<(), ClientError> {
        match self.send(&Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Self::reject(other),
        }
    }

    /// Daemon build version.
    pub async fn version(&self) -> Result<String, ClientError> {
        match self.send(&Request::Version).await? {
            Response::Version { version } => Ok(version),
            other => Self::reject(other),
        }
    }

    /// Daemon-wide status snapshot.
    pub async fn status(&self) -> Result<StatusSummary, ClientError> {
        match self.send(&Request::Status).await? {
            Response::Status(summary) => Ok(summary),
            other => Self::reject(other),
        }
    }

    /// Every non-terminal worker-run ledger row.
    pub async fn list_runs(&self) -> Result<Vec<RunSummary>, ClientError> {
        match self.send(&Request::ListRuns).await? {
            Response::Runs(runs) => Ok(runs),
            other => Self::reject(other),
        }
    }

    /// A single ledger row by run_id (or unique prefix).
    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunSummary>, ClientError> {
        let request = Request::GetRun {
            run_id: run_id.to_string(),
        };
        match self.send(&request).await? {
            Response::Run(run) => Ok(run),
            other => Self::reject(other),
        }
    }

    /// Ask the daemon to shut down gracefully.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        match self.send(&Request::Shutdown).await? {
            Response::ShuttingDown => Ok(()),
            other => Self::reject(other),
        }
    }
}

/// Stop the daemon if it's running (synchronous, for the `daemon stop` command).
pub fn stop_daemon() {
    stop_daemon_sync();
}

/// Path to the daemon's PID file directory, exposed for `daemon status`.
pub fn daemon_state_dir() -> Result<PathBuf, ClientError> {
    daemon_dir()
}
