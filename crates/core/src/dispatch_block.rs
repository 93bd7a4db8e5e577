// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Record of a dispatch attempt rejected by the cross-lane authorization
//! table (spec.md §4.3), kept so operators can audit why a message was
//! silently dropped instead of starting a run.

use crate::ids::LaneId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Neither lane is the main lane, the sender itself, nor an authorized
    /// planner-to-worker pair.
    NotAuthorized,
    /// Sender lane is unregistered.
    UnknownSenderLane,
    /// Target lane is unregistered.
    UnknownTargetLane,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchBlockEvent {
    pub sender_lane_id: LaneId,
    pub target_lane_id: LaneId,
    pub reason: BlockReason,
    pub epoch_ms: u64,
}

/// Cross-lane authorization table (spec.md §4.3): the main lane may address
/// any lane, any lane may address itself, the planner lane may address
/// worker lanes, and nothing else is permitted.
pub fn authorize(
    sender: &crate::lane::Lane,
    target: &crate::lane::Lane,
) -> Result<(), BlockReason> {
    use crate::lane::LaneKind;

    if sender.id == target.id {
        return Ok(());
    }
    if matches!(sender.kind(), LaneKind::Main) {
        return Ok(());
    }
    if matches!(sender.kind(), LaneKind::Planner) && matches!(target.kind(), LaneKind::Worker) {
        return Ok(());
    }
    Err(BlockReason::NotAuthorized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::LaneId;
    use crate::lane::Lane;

    fn lane(folder: &str) -> Lane {
        Lane {
            id: LaneId::new(folder),
            folder_name: folder.to_string(),
            display_name: folder.to_string(),
            trigger_pattern: "@bot".to_string(),
            container_config: None,
            requires_trigger: true,
        }
    }

    #[test]
    fn main_lane_may_address_anyone() {
        assert!(authorize(&lane("main"), &lane("jarvis-worker-1")).is_ok());
    }

    #[test]
    fn any_lane_may_address_itself() {
        let l = lane("jarvis-worker-1");
        assert!(authorize(&l, &l).is_ok());
    }

    #[test]
    fn planner_may_address_workers() {
        assert!(authorize(&lane("andy-developer"), &lane("jarvis-worker-1")).is_ok());
    }

    #[test]
    fn planner_may_not_address_another_planner_or_main() {
        assert!(authorize(&lane("andy-developer"), &lane("main")).is_err());
    }

    #[test]
    fn worker_may_not_address_another_worker() {
        assert!(authorize(&lane("jarvis-worker-1"), &lane("jarvis-worker-2")).is_err());
    }
}
