// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state built from WAL replay.

use lanectl_core::{
    CursorTable, DispatchBlockEvent, Event, Lane, LaneId, RunId, Session, SessionState,
    WorkerRun,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Materialized state built from replaying the event log.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MaterializedState {
    pub lanes: HashMap<LaneId, Lane>,
    pub worker_runs: HashMap<RunId, WorkerRun>,
    pub sessions: HashMap<String, Session>,
    #[serde(default)]
    pub cursors: CursorTable,
    /// Bounded audit trail of authorization denials; not replayed into any
    /// other state, kept only for operator inspection.
    #[serde(default)]
    pub dispatch_blocks: Vec<DispatchBlockEvent>,
}

const MAX_DISPATCH_BLOCKS: usize = 500;

impl MaterializedState {
    /// Get a worker run by id or unique prefix (like git commit hashes).
    pub fn get_worker_run(&self, id: &str) -> Option<&WorkerRun> {
        if let Some(run) = self.worker_runs.get(&RunId::new(id)) {
            return Some(run);
        }
        let matches: Vec<_> = self
            .worker_runs
            .iter()
            .filter(|(k, _)| k.as_str().starts_with(id))
            .collect();
        if matches.len() == 1 {
            Some(matches[0].1)
        } else {
            None
        }
    }

    pub fn live_session_for_lane(&self, lane_id: &LaneId) -> Option<&Session> {
        self.sessions
            .values()
            .find(|s| s.state == SessionState::Live && &s.lane_id == lane_id)
    }

    /// Apply an event to derive state changes.
    ///
    /// State is derived entirely from events: events are facts about what
    /// happened, never instructions about what state should become. All
    /// handlers must be idempotent — the same event may be applied twice,
    /// once for immediate in-process visibility and once during WAL replay.
    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::LaneRegistered {
                lane_id,
                folder_name,
            } => {
                self.lanes.entry(lane_id.clone()).or_insert_with(|| Lane {
                    id: lane_id.clone(),
                    folder_name: folder_name.clone(),
                    display_name: folder_name.clone(),
                    trigger_pattern: String::new(),
                    container_config: None,
                    requires_trigger: true,
                });
            }

            Event::MessageProcessed {
                lane_id,
                message_id,
                epoch_ms,
            } => {
                self.cursors
                    .advance(lane_id.clone(), message_id.clone(), *epoch_ms);
            }

            Event::DispatchBlocked {
                sender_lane_id,
                target_lane_id,
                reason,
                epoch_ms,
            } => {
                self.dispatch_blocks.push(DispatchBlockEvent {
                    sender_lane_id: sender_lane_id.clone(),
                    target_lane_id: target_lane_id.clone(),
                    reason: *reason,
                    epoch_ms: *epoch_ms,
                });
                if self.dispatch_blocks.len() > MAX_DISPATCH_BLOCKS {
                    let overflow = self.dispatch_blocks.len() - MAX_DISPATCH_BLOCKS;
                    self.dispatch_blocks.drain(0..overflow);
                }
            }

            Event::WorkerRunQueued {
                run_id,
                lane_id,
                epoch_ms,
            } => {
                self.worker_runs
                    .entry(run_id.clone())
                    .or_insert_with(|| WorkerRun::new(run_id.clone(), lane_id.clone(), *epoch_ms));
            }

            Event::WorkerRunSpawning { run_id, .. } => {
                if let Some(run) = self.worker_runs.get_mut(run_id) {
                    if run.phase == lanectl_core::Phase::Queued {
                        let _ = run.transition(lanectl_core::Phase::Spawning);
                    }
                }
            }

            Event::WorkerRunActive {
                run_id,
                session_id,
                epoch_ms,
            } => {
                if let Some(run) = self.worker_runs.get_mut(run_id) {
                    if run.phase == lanectl_core::Phase::Spawning {
                        let _ = run.transition(lanectl_core::Phase::Active);
                        run.session_id = Some(session_id.clone());
                    }
                }
                self.sessions.entry(session_id.to_string()).or_insert_with(|| {
                    Session::new(
                        session_id.clone(),
                        self.worker_runs
                            .get(run_id)
                            .map(|r| r.lane_id.clone())
                            .unwrap_or_else(|| LaneId::new("")),
                        run_id.clone(),
                        *epoch_ms,
                    )
                });
            }

            Event::WorkerRunCompletionReceived { run_id, .. } => {
                if let Some(run) = self.worker_runs.get_mut(run_id) {
                    if run.phase == lanectl_core::Phase::Active {
                        let _ = run.transition(lanectl_core::Phase::CompletionValidating);
                    }
                }
            }

            Event::WorkerRunCompletionRejected { run_id, .. } => {
                if let Some(run) = self.worker_runs.get_mut(run_id) {
                    if run.phase == lanectl_core::Phase::CompletionValidating {
                        let _ = run.transition(lanectl_core::Phase::CompletionRepairPending);
                    }
                }
            }

            Event::WorkerRunRepairDispatched { run_id, attempt, .. } => {
                if let Some(run) = self.worker_runs.get_mut(run_id) {
                    if run.phase == lanectl_core::Phase::CompletionRepairPending {
                        let _ = run.transition(lanectl_core::Phase::CompletionRepairActive);
                    }
                    run.repair_attempts = *attempt;
                }
            }

            Event::WorkerRunFinished {
                run_id,
                status,
                epoch_ms,
            } => {
                if let Some(run) = self.worker_runs.get_mut(run_id) {
                    if !matches!(run.phase, lanectl_core::Phase::Terminal) {
                        run.mark_terminal(*status, *epoch_ms);
                    }
                    if let Some(session_id) = &run.session_id {
                        if let Some(session) = self.sessions.get_mut(session_id.as_str()) {
                            session.retire();
                        }
                    }
                }
            }

            Event::WorkerRunWatchdogFailed {
                run_id,
                reason,
                epoch_ms,
            } => {
                if let Some(run) = self.worker_runs.get_mut(run_id) {
                    if !matches!(run.phase, lanectl_core::Phase::Terminal) {
                        run.mark_watchdog_failed(*reason, *epoch_ms);
                    }
                }
            }

            Event::LeaseAcquired {
                run_id,
                owner,
                expires_at_epoch_ms,
            } => {
                if let Some(run) = self.worker_runs.get_mut(run_id) {
                    run.acquire_lease(owner.clone(), *expires_at_epoch_ms);
                }
            }

            Event::Custom => {}
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
