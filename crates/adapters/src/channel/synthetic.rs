// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Synthetic in-process channel: delivers lane-to-lane traffic (the
//! `*@nanoclaw`-style addressing spec.md §4.7 describes) by re-injecting the
//! message directly into the target lane's inbound queue instead of going
//! out to a real chat provider. Gated behind the same enabled/disabled
//! pattern as the teacher's `BusNotifyAdapter`, since a deployment with a
//! single lane has no use for it.

use super::{ChannelAdapter, ChannelError};
use async_trait::async_trait;
use lanectl_core::LaneId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// A message relayed to a lane via the synthetic channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayedMessage {
    pub lane_id: LaneId,
    pub text: String,
    pub origin_lane_id: Option<LaneId>,
}

/// Delivers lane-to-lane messages by appending to an in-memory queue the
/// message loop drains on its next poll, rather than calling out to any
/// external transport.
#[derive(Clone, Default)]
pub struct SyntheticChannelAdapter {
    inbox: Arc<Mutex<VecDeque<RelayedMessage>>>,
}

impl SyntheticChannelAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain every message relayed since the last drain, oldest first.
    pub fn drain(&self) -> Vec<RelayedMessage> {
        self.inbox.lock().drain(..).collect()
    }
}

#[async_trait]
impl ChannelAdapter for SyntheticChannelAdapter {
    async fn send(
        &self,
        lane_id: &LaneId,
        text: &str,
        origin_lane_id: Option<&LaneId>,
    ) -> Result<(), ChannelError> {
        self.inbox.lock().push_back(RelayedMessage {
            lane_id: lane_id.clone(),
            text: text.to_string(),
            origin_lane_id: origin_lane_id.cloned(),
        });
        Ok(())
    }

    async fn typing(&self, _lane_id: &LaneId) -> Result<(), ChannelError> {
        Ok(())
    }
}
