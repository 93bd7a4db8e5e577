// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory `ContainerDriver` for tests: no subprocesses, records every
//! call it receives so tests can assert on driver interaction order.

use super::{
    ContainerDriver, ContainerError, ContainerHandle, ContainerReconnectConfig,
    ContainerSpawnConfig,
};
use async_trait::async_trait;
use lanectl_core::{AgentSessionId, RunId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerCall {
    Spawn(RunId),
    Reconnect(RunId),
    Send(RunId, String),
    Kill(RunId),
}

#[derive(Clone, Default)]
pub struct FakeContainerDriver {
    alive: Arc<Mutex<HashMap<RunId, ContainerHandle>>>,
    calls: Arc<Mutex<Vec<ContainerCall>>>,
    fail_spawn: Arc<Mutex<bool>>,
}

impl FakeContainerDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ContainerCall> {
        self.calls.lock().clone()
    }

    pub fn set_fail_spawn(&self, fail: bool) {
        *self.fail_spawn.lock() = fail;
    }
}

#[async_trait]
impl ContainerDriver for FakeContainerDriver {
    async fn spawn(&self, config: ContainerSpawnConfig) -> Result<ContainerHandle, ContainerError> {
        self.calls
            .lock()
            .push(ContainerCall::Spawn(config.run_id.clone()));
        if *self.fail_spawn.lock() {
            return Err(ContainerError::SpawnFailed("fake spawn failure".into()));
        }
        let handle = ContainerHandle {
            run_id: config.run_id.clone(),
            session_id: AgentSessionId::new(format!("fake-session-{}", config.run_id)),
            container_name: format!("fake-{}", config.run_id),
        };
        self.alive
            .lock()
            .insert(config.run_id, handle.clone());
        Ok(handle)
    }

    async fn reconnect(
        &self,
        config: ContainerReconnectConfig,
    ) -> Result<ContainerHandle, ContainerError> {
        self.calls
            .lock()
            .push(ContainerCall::Reconnect(config.run_id.clone()));
        let handle = ContainerHandle {
            run_id: config.run_id.clone(),
            session_id: config.session_id,
            container_name: format!("fake-{}", config.run_id),
        };
        self.alive
            .lock()
            .insert(config.run_id, handle.clone());
        Ok(handle)
    }

    async fn send(&self, run_id: &RunId, input: &str) -> Result<(), ContainerError> {
        self.calls
            .lock()
            .push(ContainerCall::Send(run_id.clone(), input.to_string()));
        if !self.alive.lock().contains_key(run_id) {
            return Err(ContainerError::NotFound(run_id.to_string()));
        }
        Ok(())
    }

    async fn kill(&self, run_id: &RunId) -> Result<(), ContainerError> {
        self.calls.lock().push(ContainerCall::Kill(run_id.clone()));
        self.alive.lock().remove(run_id);
        Ok(())
    }

    async fn is_alive(&self, run_id: &RunId) -> bool {
        self.alive.lock().contains_key(run_id)
    }
}
