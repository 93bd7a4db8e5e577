// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced adapter wrappers for consistent observability.

use crate::channel::{ChannelAdapter, ChannelError};
use crate::container::{
    ContainerDriver, ContainerError, ContainerHandle, ContainerReconnectConfig,
    ContainerSpawnConfig,
};
use async_trait::async_trait;
use lanectl_core::{LaneId, RunId};
use tracing::Instrument;

/// Wrapper that adds tracing spans to any `ContainerDriver`.
#[derive(Clone)]
pub struct TracedContainer<D> {
    inner: D,
}

impl<D> TracedContainer<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<D: ContainerDriver> ContainerDriver for TracedContainer<D> {
    async fn spawn(&self, config: ContainerSpawnConfig) -> Result<ContainerHandle, ContainerError> {
        let span = tracing::info_span!("container.spawn", run_id = %config.run_id, image = %config.image);
        async {
            let start = std::time::Instant::now();
            let result = self.inner.spawn(config).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;
            match &result {
                Ok(h) => tracing::info!(run_id = %h.run_id, elapsed_ms, "container spawned"),
                Err(e) => tracing::error!(elapsed_ms, error = %e, "spawn failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn reconnect(
        &self,
        config: ContainerReconnectConfig,
    ) -> Result<ContainerHandle, ContainerError> {
        let span = tracing::info_span!("container.reconnect", run_id = %config.run_id);
        async {
            let start = std::time::Instant::now();
            let result = self.inner.reconnect(config).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;
            match &result {
                Ok(h) => tracing::info!(run_id = %h.run_id, elapsed_ms, "container reconnected"),
                Err(e) => tracing::error!(elapsed_ms, error = %e, "reconnect failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn send(&self, run_id: &RunId, input: &str) -> Result<(), ContainerError> {
        tracing::info_span!("container.send", %run_id)
            .in_scope(|| tracing::debug!(input_len = input.len(), "sending"));
        let result = self.inner.send(run_id, input).await;
        if let Err(ref e) = result {
            tracing::error!(%run_id, error = %e, "send failed");
        }
        result
    }

    async fn kill(&self, run_id: &RunId) -> Result<(), ContainerError> {
        let result = self.inner.kill(run_id).await;
        tracing::info_span!("container.kill", %run_id).in_scope(|| match &result {
            Ok(()) => tracing::info!("killed"),
            Err(e) => tracing::warn!(error = %e, "kill failed (may be expected)"),
        });
        result
    }

    async fn is_alive(&self, run_id: &RunId) -> bool {
        let result = self.inner.is_alive(run_id).await;
        tracing::trace!(%run_id, alive = result, "checked");
        result
    }
}

/// Wrapper that adds tracing spans to any `ChannelAdapter`.
#[derive(Clone)]
pub struct TracedChannel<C> {
    inner: C,
}

impl<C> TracedChannel<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<C: ChannelAdapter> ChannelAdapter for TracedChannel<C> {
    async fn send(
        &self,
        lane_id: &LaneId,
        text: &str,
        origin_lane_id: Option<&LaneId>,
    ) -> Result<(), ChannelError> {
        tracing::info_span!("channel.send", %lane_id, origin = ?origin_lane_id)
            .in_scope(|| tracing::debug!(text_len = text.len(), "sending"));
        let result = self.inner.send(lane_id, text, origin_lane_id).await;
        if let Err(ref e) = result {
            tracing::error!(%lane_id, error = %e, "send failed");
        }
        result
    }

    async fn typing(&self, lane_id: &LaneId) -> Result<(), ChannelError> {
        self.inner.typing(lane_id).await
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
