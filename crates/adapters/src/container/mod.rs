// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container driver: the seam between the supervisor and whatever actually
//! runs a worker's coding agent. A worker run owns at most one container at
//! a time; the driver's job is spawn/reconnect/send/kill and nothing else —
//! output validation and phase transitions live in the supervisor.

mod docker;

pub use docker::DockerContainerDriver;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{ContainerCall, FakeContainerDriver};

use async_trait::async_trait;
use lanectl_core::{AgentSessionId, RunId};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from container operations.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container not found for run {0}")]
    NotFound(String),
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("kill failed: {0}")]
    KillFailed(String),
}

/// Everything the driver needs to start a fresh container for a run.
#[derive(Debug, Clone)]
pub struct ContainerSpawnConfig {
    pub run_id: RunId,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub repo: Option<String>,
    pub branch: Option<String>,
    /// Text handed to the agent as its first turn.
    pub initial_input: String,
}

/// Everything the driver needs to reattach to a container that may already
/// be running (daemon restart, supervisor handoff).
#[derive(Debug, Clone)]
pub struct ContainerReconnectConfig {
    pub run_id: RunId,
    pub session_id: AgentSessionId,
}

/// A live container, as returned by `spawn`/`reconnect`.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    pub run_id: RunId,
    pub session_id: AgentSessionId,
    pub container_name: String,
}

/// Drives the lifecycle of a single worker's container.
///
/// Implementations are expected to be cheap to clone (an `Arc`-backed
/// handle registry internally), matching the adapter pattern used
/// throughout this pack.
#[async_trait]
pub trait ContainerDriver: Clone + Send + Sync + 'static {
    /// Start a new container for `config.run_id` and wait until the agent
    /// inside is ready to receive input.
    async fn spawn(&self, config: ContainerSpawnConfig) -> Result<ContainerHandle, ContainerError>;

    /// Reattach to a container that may still be running from a previous
    /// supervisor lifetime. Fails if the container can't be found or isn't
    /// responding.
    async fn reconnect(
        &self,
        config: ContainerReconnectConfig,
    ) -> Result<ContainerHandle, ContainerError>;

    /// Send a turn of input to the agent running in `run_id`'s container.
    async fn send(&self, run_id: &RunId, input: &str) -> Result<(), ContainerError>;

    /// Tear down the container and any volumes it owns. Idempotent: killing
    /// an already-gone container is not an error.
    async fn kill(&self, run_id: &RunId) -> Result<(), ContainerError>;

    /// Whether the container is still up, best-effort.
    async fn is_alive(&self, run_id: &RunId) -> bool;
}
