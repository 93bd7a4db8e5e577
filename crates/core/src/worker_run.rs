// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker-run ledger row: the supervisor's view of a single dispatched
//! run, from the moment it's queued until it reaches a terminal status.

use crate::error::CoreError;
use crate::ids::{AgentSessionId, LaneId, RunId};
use serde::{Deserialize, Serialize};

/// Coarse lifecycle phase. Finer-grained than `Status`: several phases can
/// map to the same externally-visible status (e.g. both `completion_validating`
/// and `completion_repair_active` are reported as `running`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Queued,
    Spawning,
    Active,
    CompletionValidating,
    CompletionRepairPending,
    CompletionRepairActive,
    Finalizing,
    Terminal,
}

/// Externally-visible run status, as reported back to the dispatching lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Queued,
    Running,
    ReviewRequested,
    FailedContract,
    Failed,
    Done,
}

impl Phase {
    /// The status reported to the outside world while in this phase.
    /// `Terminal` has no single status — callers read the ledger row's own
    /// `status` field, set explicitly when the phase became terminal.
    pub fn default_status(self) -> Option<Status> {
        match self {
            Phase::Queued => Some(Status::Queued),
            Phase::Spawning
            | Phase::Active
            | Phase::CompletionValidating
            | Phase::CompletionRepairPending
            | Phase::CompletionRepairActive
            | Phase::Finalizing => Some(Status::Running),
            Phase::Terminal => None,
        }
    }

    fn allowed_next(self) -> &'static [Phase] {
        use Phase::*;
        match self {
            Queued => &[Spawning, Terminal],
            Spawning => &[Active, Terminal],
            Active => &[CompletionValidating, Terminal],
            CompletionValidating => &[CompletionRepairPending, Finalizing, Terminal],
            CompletionRepairPending => &[CompletionRepairActive, Terminal],
            CompletionRepairActive => &[CompletionValidating, Terminal],
            Finalizing => &[Terminal],
            Terminal => &[],
        }
    }
}

/// Named reasons the watchdog can assign when it force-fails a stalled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogFailureReason {
    StaleWorkerRunWatchdog,
    QueuedStaleBeforeSpawn,
    RunningWithoutContainer,
    ActiveStatusWithCompletedAt,
}

/// Result of attempting to insert a new ledger row for a `run_id` that may
/// already be present (dispatch is expected to be retried by planners).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

const MAX_COMPLETION_REPAIR_ATTEMPTS: u32 = 3;

/// A single worker-run ledger row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerRun {
    pub run_id: RunId,
    pub lane_id: LaneId,
    pub phase: Phase,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<AgentSessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<RunId>,
    #[serde(default)]
    pub repair_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervisor_owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at_epoch_ms: Option<u64>,
    pub created_at_epoch_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_epoch_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<WatchdogFailureReason>,
}

impl WorkerRun {
    pub fn new(run_id: RunId, lane_id: LaneId, created_at_epoch_ms: u64) -> Self {
        Self {
            run_id,
            lane_id,
            phase: Phase::Queued,
            status: Status::Queued,
            session_id: None,
            parent_run_id: None,
            repair_attempts: 0,
            supervisor_owner: None,
            lease_expires_at_epoch_ms: None,
            created_at_epoch_ms,
            completed_at_epoch_ms: None,
            failure_reason: None,
        }
    }

    /// Moves the row to `next`, rejecting transitions the state machine
    /// doesn't allow. Does not itself set `status`/`completed_at` for
    /// terminal transitions — callers set those explicitly since a terminal
    /// phase can be reached with different final statuses (done/failed/etc).
    pub fn transition(&mut self, next: Phase) -> Result<(), CoreError> {
        if !self.phase.allowed_next().contains(&next) {
            return Err(CoreError::IllegalTransition {
                run_id: self.run_id.to_string(),
                from: phase_name(self.phase),
                to: phase_name(next),
            });
        }
        self.phase = next;
        if let Some(status) = next.default_status() {
            self.status = status;
        }
        Ok(())
    }

    /// Whether the supervisor holding `owner` may still act on this run.
    pub fn lease_held_by(&self, owner: &str, now_epoch_ms: u64) -> bool {
        match (&self.supervisor_owner, self.lease_expires_at_epoch_ms) {
            (Some(held_by), Some(expires)) => held_by == owner && now_epoch_ms < expires,
            _ => false,
        }
    }

    pub fn acquire_lease(&mut self, owner: impl Into<String>, expires_at_epoch_ms: u64) {
        self.supervisor_owner = Some(owner.into());
        self.lease_expires_at_epoch_ms = Some(expires_at_epoch_ms);
    }

    pub fn can_attempt_completion_repair(&self) -> bool {
        self.repair_attempts < MAX_COMPLETION_REPAIR_ATTEMPTS
    }

    pub fn mark_terminal(&mut self, status: Status, completed_at_epoch_ms: u64) {
        self.phase = Phase::Terminal;
        self.status = status;
        self.completed_at_epoch_ms = Some(completed_at_epoch_ms);
    }

    pub fn mark_watchdog_failed(
        &mut self,
        reason: WatchdogFailureReason,
        completed_at_epoch_ms: u64,
    ) {
        self.failure_reason = Some(reason);
        self.mark_terminal(Status::Failed, completed_at_epoch_ms);
    }
}

fn phase_name(phase: Phase) -> &'static str {
    match phase {
        Phase::Queued => "queued",
        Phase::Spawning => "spawning",
        Phase::Active => "active",
        Phase::CompletionValidating => "completion_validating",
        Phase::CompletionRepairPending => "completion_repair_pending",
        Phase::CompletionRepairActive => "completion_repair_active",
        Phase::Finalizing => "finalizing",
        Phase::Terminal => "terminal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> WorkerRun {
        WorkerRun::new(RunId::new("run-1"), LaneId::new("jarvis-worker-1"), 1_000)
    }

    #[test]
    fn new_run_starts_queued() {
        let r = run();
        assert_eq!(r.phase, Phase::Queued);
        assert_eq!(r.status, Status::Queued);
    }

    #[test]
    fn valid_transition_chain_reaches_finalizing() {
        let mut r = run();
        r.transition(Phase::Spawning).unwrap();
        r.transition(Phase::Active).unwrap();
        r.transition(Phase::CompletionValidating).unwrap();
        r.transition(Phase::Finalizing).unwrap();
        assert_eq!(r.status, Status::Running);
    }

    #[test]
    fn skipping_a_phase_is_rejected() {
        let mut r = run();
        assert!(r.transition(Phase::Active).is_err());
    }

    #[test]
    fn terminal_has_no_further_transitions() {
        let mut r = run();
        r.transition(Phase::Terminal).unwrap();
        assert!(r.transition(Phase::Spawning).is_err());
    }

    #[test]
    fn lease_expires_and_is_owner_scoped() {
        let mut r = run();
        r.acquire_lease("supervisor-a", 2_000);
        assert!(r.lease_held_by("supervisor-a", 1_500));
        assert!(!r.lease_held_by("supervisor-a", 2_500));
        assert!(!r.lease_held_by("supervisor-b", 1_500));
    }

    #[test]
    fn completion_repair_attempts_are_capped() {
        let mut r = run();
        r.repair_attempts = MAX_COMPLETION_REPAIR_ATTEMPTS;
        assert!(!r.can_attempt_completion_repair());
    }

    #[test]
    fn watchdog_failure_sets_terminal_and_reason() {
        let mut r = run();
        r.mark_watchdog_failed(WatchdogFailureReason::RunningWithoutContainer, 5_000);
        assert_eq!(r.phase, Phase::Terminal);
        assert_eq!(r.status, Status::Failed);
        assert_eq!(
            r.failure_reason,
            Some(WatchdogFailureReason::RunningWithoutContainer)
        );
    }
}
