// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory `ChannelAdapter` for tests, recording every send/typing call.

use super::{ChannelAdapter, ChannelError};
use async_trait::async_trait;
use lanectl_core::LaneId;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCall {
    Send {
        lane_id: LaneId,
        text: String,
        origin_lane_id: Option<LaneId>,
    },
    Typing(LaneId),
}

#[derive(Clone, Default)]
pub struct FakeChannelAdapter {
    calls: Arc<Mutex<Vec<ChannelCall>>>,
    fail_send: Arc<Mutex<bool>>,
}

impl FakeChannelAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ChannelCall> {
        self.calls.lock().clone()
    }

    pub fn set_fail_send(&self, fail: bool) {
        *self.fail_send.lock() = fail;
    }
}

#[async_trait]
impl ChannelAdapter for FakeChannelAdapter {
    async fn send(
        &self,
        lane_id: &LaneId,
        text: &str,
        origin_lane_id: Option<&LaneId>,
    ) -> Result<(), ChannelError> {
        self.calls.lock().push(ChannelCall::Send {
            lane_id: lane_id.clone(),
            text: text.to_string(),
            origin_lane_id: origin_lane_id.cloned(),
        });
        if *self.fail_send.lock() {
            return Err(ChannelError::SendFailed("fake send failure".into()));
        }
        Ok(())
    }

    async fn typing(&self, lane_id: &LaneId) -> Result<(), ChannelError> {
        self.calls.lock().push(ChannelCall::Typing(lane_id.clone()));
        Ok(())
    }
}
