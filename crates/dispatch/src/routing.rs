// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use lanectl_core::{ContextIntent, DispatchEnvelope, LaneId, Session};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("run_id {0} has already been dispatched")]
    DuplicateRunId(String),
    #[error("session {0} does not exist or is not live")]
    UnknownOrRetiredSession(String),
    #[error("session {session_id} belongs to lane {owner}, not the dispatch target {target}")]
    CrossLaneSessionReuse {
        session_id: String,
        owner: String,
        target: String,
    },
}

/// Validates the parts of a dispatch envelope that require a persistence
/// lookup: duplicate run_id detection and, for `context_intent: continue`,
/// that the named session is live and owned by the target lane.
///
/// Callers (the IPC watcher and daemon) perform the actual lookups and pass
/// the results in, keeping this crate free of any storage dependency.
pub fn validate_session_routing(
    envelope: &DispatchEnvelope,
    target_lane_id: &LaneId,
    existing_run: bool,
    session_lookup: Option<&Session>,
) -> Result<(), RoutingError> {
    if existing_run {
        return Err(RoutingError::DuplicateRunId(envelope.run_id.to_string()));
    }

    // Cross-worker session ownership applies whenever a session_id is named,
    // regardless of context_intent: a fresh dispatch naming another worker's
    // session is just as much a violation as a continue dispatch doing so.
    if let Some(session_id) = &envelope.session_id {
        match session_lookup {
            Some(session) if session.reusable_by(target_lane_id) => {}
            Some(session) => {
                return Err(RoutingError::CrossLaneSessionReuse {
                    session_id: session_id.to_string(),
                    owner: session.lane_id.to_string(),
                    target: target_lane_id.to_string(),
                });
            }
            None if envelope.context_intent == ContextIntent::Continue => {
                return Err(RoutingError::UnknownOrRetiredSession(session_id.to_string()));
            }
            None => {}
        }
    }

    Ok(())
}
