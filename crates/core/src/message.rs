// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound/outbound chat messages as they flow through the message loop.

use crate::ids::{LaneId, MessageId};
use serde::{Deserialize, Serialize};

/// A single chat message, inbound or outbound, as seen by the orchestrator.
///
/// `(lane_id, id)` is the dedupe key used by the processed-message cursor
/// (spec.md §4.6) to make the message loop idempotent across restarts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub lane_id: LaneId,
    pub sender: String,
    pub text: String,
    pub epoch_ms: u64,
    #[serde(default)]
    pub from_bot: bool,
    /// Set when this message is a synthetic lane-to-lane relay (e.g. a
    /// planner dispatching to a worker lane) rather than a human-authored one.
    #[serde(default)]
    pub origin_lane_id: Option<LaneId>,
}

impl Message {
    pub fn dedupe_key(&self) -> (LaneId, MessageId) {
        (self.lane_id.clone(), self.id.clone())
    }

    /// Whether this message was relayed from another lane rather than typed
    /// by a human participant of `lane_id`.
    pub fn is_relayed(&self) -> bool {
        self.origin_lane_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg() -> Message {
        Message {
            id: MessageId::new("m1"),
            lane_id: LaneId::new("main"),
            sender: "alice".to_string(),
            text: "@bot hello".to_string(),
            epoch_ms: 1_000,
            from_bot: false,
            origin_lane_id: None,
        }
    }

    #[test]
    fn dedupe_key_combines_lane_and_message_id() {
        let m = msg();
        assert_eq!(m.dedupe_key(), (LaneId::new("main"), MessageId::new("m1")));
    }

    #[test]
    fn relayed_message_is_detected_via_origin_lane() {
        let mut m = msg();
        assert!(!m.is_relayed());
        m.origin_lane_id = Some(LaneId::new("andy-developer"));
        assert!(m.is_relayed());
    }
}
