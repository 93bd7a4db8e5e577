// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Channel adapter: outbound chat traffic. Grounded on the teacher's
//! `notify::bus` pub/sub fan-out (push notifications to one or more sinks),
//! generalized from desktop notifications to outbound messages addressed
//! to a lane.

mod synthetic;

pub use synthetic::SyntheticChannelAdapter;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{ChannelCall, FakeChannelAdapter};

use async_trait::async_trait;
use lanectl_core::LaneId;
use thiserror::Error;

/// Errors from channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Adapter for sending chat traffic to a lane. A single process may run
/// several of these (one per external chat provider plus the synthetic
/// in-process lane-to-lane sink); the daemon picks which one owns a given
/// `LaneId` the same way it picks a `ContainerDriver` per run.
#[async_trait]
pub trait ChannelAdapter: Clone + Send + Sync + 'static {
    /// Post `text` to `lane_id`, optionally tagging it as a relay from
    /// `origin_lane_id` so the recipient can distinguish forwarded traffic.
    async fn send(
        &self,
        lane_id: &LaneId,
        text: &str,
        origin_lane_id: Option<&LaneId>,
    ) -> Result<(), ChannelError>;

    /// Best-effort typing indicator; channels without one treat this as a
    /// no-op rather than an error.
    async fn typing(&self, lane_id: &LaneId) -> Result<(), ChannelError>;
}
