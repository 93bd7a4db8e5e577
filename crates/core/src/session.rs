// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-lane agent session bookkeeping: which container/session a worker lane
//! currently owns, so a `context_intent: continue` dispatch can reattach
//! instead of spawning a fresh container.

use crate::ids::{AgentSessionId, LaneId, RunId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Container is up and the session can be reattached to.
    Live,
    /// Container was torn down; the session id is kept around for audit but
    /// can no longer be resumed.
    Retired,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub session_id: AgentSessionId,
    pub lane_id: LaneId,
    pub owning_run_id: RunId,
    pub state: SessionState,
    pub created_at_epoch_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
}

impl Session {
    pub fn new(
        session_id: AgentSessionId,
        lane_id: LaneId,
        owning_run_id: RunId,
        created_at_epoch_ms: u64,
    ) -> Self {
        Self {
            session_id,
            lane_id,
            owning_run_id,
            state: SessionState::Live,
            created_at_epoch_ms,
            container_name: None,
        }
    }

    /// A dispatch naming `session_id` with `context_intent: continue` may
    /// reuse this session only if it's still live and belongs to the same
    /// lane the dispatch is targeting — reuse across lanes is never allowed,
    /// even if the caller is an authorized planner.
    pub fn reusable_by(&self, lane_id: &LaneId) -> bool {
        self.state == SessionState::Live && &self.lane_id == lane_id
    }

    pub fn retire(&mut self) {
        self.state = SessionState::Retired;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            AgentSessionId::new("sess-1"),
            LaneId::new("jarvis-worker-1"),
            RunId::new("run-1"),
            1_000,
        )
    }

    #[test]
    fn live_session_is_reusable_by_its_own_lane() {
        let s = session();
        assert!(s.reusable_by(&LaneId::new("jarvis-worker-1")));
    }

    #[test]
    fn live_session_is_not_reusable_by_another_lane() {
        let s = session();
        assert!(!s.reusable_by(&LaneId::new("jarvis-worker-2")));
    }

    #[test]
    fn retired_session_is_not_reusable() {
        let mut s = session();
        s.retire();
        assert!(!s.reusable_by(&LaneId::new("jarvis-worker-1")));
    }
}
