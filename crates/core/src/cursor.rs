// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-lane read cursor for the message loop: the boundary between messages
//! already folded into materialized state and messages still to process.

use crate::ids::{LaneId, MessageId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where the message loop left off in a single lane's message stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaneCursor {
    pub lane_id: LaneId,
    pub last_processed_message_id: Option<MessageId>,
    pub last_processed_epoch_ms: u64,
}

impl LaneCursor {
    pub fn initial(lane_id: LaneId) -> Self {
        Self {
            lane_id,
            last_processed_message_id: None,
            last_processed_epoch_ms: 0,
        }
    }

    pub fn advance(&mut self, message_id: MessageId, epoch_ms: u64) {
        self.last_processed_message_id = Some(message_id);
        self.last_processed_epoch_ms = epoch_ms;
    }
}

/// All lane cursors, keyed by lane. Part of materialized `State` so a
/// restarted message loop resumes exactly where it left off rather than
/// replaying (and re-dispatching) already-handled messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CursorTable {
    cursors: HashMap<LaneId, LaneCursor>,
}

impl CursorTable {
    pub fn get(&self, lane_id: &LaneId) -> Option<&LaneCursor> {
        self.cursors.get(lane_id)
    }

    pub fn advance(&mut self, lane_id: LaneId, message_id: MessageId, epoch_ms: u64) {
        self.cursors
            .entry(lane_id.clone())
            .or_insert_with(|| LaneCursor::initial(lane_id))
            .advance(message_id, epoch_ms);
    }

    /// Whether `message_id` is at or before the recorded cursor, meaning the
    /// message loop has already folded it into state and must not redispatch it.
    pub fn already_processed(&self, lane_id: &LaneId, message_id: &MessageId) -> bool {
        self.cursors
            .get(lane_id)
            .and_then(|c| c.last_processed_message_id.as_ref())
            .is_some_and(|last| last == message_id)
    }
}
