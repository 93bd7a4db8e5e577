// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch-ownership and worker-run intake classification (spec.md §4.3):
//! deciding whether a dispatch payload addressed at a worker lane may be
//! forwarded, and whether the `run_id` it carries is new, a retry, or a
//! duplicate.

use lanectl_core::{Lane, LaneKind, Status, WorkerRun};

/// Reason a dispatch payload was refused before it ever reached
/// `classify_intake` — distinct from `BlockReason` (the general
/// sender/target authorization table) because this rule is specific to
/// dispatch payloads, not all IPC traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOwnershipError {
    /// A dispatch payload targeted a worker lane but didn't come from the
    /// planner.
    NotFromPlanner,
    /// A dispatch payload looped back at the planner's own lane.
    EchoedToPlanner,
}

/// Enforces the dispatch-ownership rule ahead of structural validation: a
/// JSON dispatch payload addressed at a worker lane is only legitimate
/// coming from the planner, and a payload addressed back at the planner's
/// own lane is always refused (guards against echoing a worker dispatch
/// into the planning lane).
pub fn check_dispatch_ownership(
    source: &Lane,
    target: &Lane,
) -> Result<(), DispatchOwnershipError> {
    if matches!(target.kind(), LaneKind::Planner) {
        return Err(DispatchOwnershipError::EchoedToPlanner);
    }
    if matches!(target.kind(), LaneKind::Worker) && !matches!(source.kind(), LaneKind::Planner) {
        return Err(DispatchOwnershipError::NotFromPlanner);
    }
    Ok(())
}

/// Outcome of looking up a dispatch envelope's `run_id` against the
/// ledger before accepting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeDecision {
    /// No existing row for this `run_id`: insert and allow the send.
    New,
    /// An existing row for this `run_id` previously failed: allow the send,
    /// caller bumps the retry counter.
    Retry,
    /// An existing row is present and not in a failed terminal state:
    /// refuse with `reason_code=duplicate_run_id`.
    Duplicate,
}

/// Classify a dispatch intake given the ledger row already on file for its
/// `run_id`, if any.
pub fn classify_intake(existing: Option<&WorkerRun>) -> IntakeDecision {
    match existing {
        None => IntakeDecision::New,
        Some(run) if run.status == Status::Failed => IntakeDecision::Retry,
        Some(_) => IntakeDecision::Duplicate,
    }
}
