// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker-Run Supervisor (spec.md §4.5): the watchdog that walks every
//! non-terminal ledger row on each `reconcile` pass and force-fails rows
//! that have stalled. Produces `Event`s for the caller to append to the
//! WAL — the supervisor itself never mutates `MaterializedState`, matching
//! the event-sourced discipline the rest of the ledger follows.

use lanectl_adapters::ContainerDriver;
use lanectl_core::{Event, LaneId, Phase, RunId, Status, WatchdogFailureReason, WorkerRun};
use lanectl_storage::MaterializedState;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Static configuration for the watchdog (spec.md §4.5).
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub hard_timeout_ms: u64,
    pub no_container_grace_ms: u64,
    pub queued_cursor_grace_ms: u64,
    pub repair_handoff_grace_ms: u64,
    pub lease_ttl_ms: u64,
    pub process_start_at_epoch_ms: u64,
    pub restart_suppression_window_ms: u64,
    pub owner_id: String,
}

/// Ephemeral, non-ledger bookkeeping the supervisor needs between
/// `reconcile` passes. None of this is persisted — on restart it starts
/// empty and the watchdog rules tolerate that (a row with no recorded
/// `no_container_since` simply starts its grace window at the next pass).
#[derive(Default, Clone)]
struct RunBookkeeping {
    spawn_acknowledged_at_epoch_ms: Option<u64>,
    last_heartbeat_at_epoch_ms: Option<u64>,
    no_container_since_epoch_ms: Option<u64>,
}

fn in_flight_grace(phase: Phase, config: &SupervisorConfig) -> u64 {
    match phase {
        Phase::CompletionRepairPending | Phase::CompletionRepairActive => {
            config.repair_handoff_grace_ms
        }
        _ => config.no_container_grace_ms,
    }
}

fn watchdog_fail(run: &WorkerRun, reason: WatchdogFailureReason, now_epoch_ms: u64) -> Event {
    Event::WorkerRunWatchdogFailed {
        run_id: run.run_id.clone(),
        reason,
        epoch_ms: now_epoch_ms,
    }
}

pub struct WorkerRunSupervisor<D: ContainerDriver> {
    driver: D,
    config: SupervisorConfig,
    bookkeeping: Mutex<HashMap<RunId, RunBookkeeping>>,
}

impl<D: ContainerDriver> WorkerRunSupervisor<D> {
    pub fn new(driver: D, config: SupervisorConfig) -> Self {
        Self {
            driver,
            config,
            bookkeeping: Mutex::new(HashMap::new()),
        }
    }

    /// Record that a container spawn for `run_id` was acknowledged — clears
    /// the `queued_stale_before_spawn` watchdog rule for it.
    pub fn record_spawn_ack(&self, run_id: &RunId, now_epoch_ms: u64) {
        self.bookkeeping
            .lock()
            .entry(run_id.clone())
            .or_default()
            .spawn_acknowledged_at_epoch_ms = Some(now_epoch_ms);
    }

    /// A streamed result arrived: bump the heartbeat and return the
    /// `LeaseAcquired` event that extends the lease (spec.md §4.5's
    /// heartbeat contract).
    pub fn record_heartbeat(&self, run_id: &RunId, now_epoch_ms: u64) -> Event {
        let mut bookkeeping = self.bookkeeping.lock();
        let entry = bookkeeping.entry(run_id.clone()).or_default();
        entry.last_heartbeat_at_epoch_ms = Some(now_epoch_ms);
        entry.no_container_since_epoch_ms = None;
        Event::LeaseAcquired {
            run_id: run_id.clone(),
            owner: self.config.owner_id.clone(),
            expires_at_epoch_ms: now_epoch_ms + self.config.lease_ttl_ms,
        }
    }

    /// Drop bookkeeping for a run that reached a terminal state.
    pub fn forget(&self, run_id: &RunId) {
        self.bookkeeping.lock().remove(run_id);
    }

    /// One watchdog pass over every non-terminal row. `last_agent_timestamp`
    /// is the ingest cursor's most recently seen message timestamp per
    /// lane, used by the `queued_stale_before_spawn` rule.
    pub async fn reconcile(
        &self,
        state: &MaterializedState,
        now_epoch_ms: u64,
        last_agent_timestamp: &HashMap<LaneId, u64>,
    ) -> Vec<Event> {
        let mut events = Vec::new();

        for run in state.worker_runs.values() {
            if run.phase == Phase::Terminal {
                continue;
            }

            if run.status == Status::Active && run.completed_at_epoch_ms.is_some() {
                events.push(watchdog_fail(
                    run,
                    WatchdogFailureReason::ActiveStatusWithCompletedAt,
                    now_epoch_ms,
                ));
                continue;
            }

            let age_ms = now_epoch_ms.saturating_sub(run.created_at_epoch_ms);
            if age_ms > self.config.hard_timeout_ms {
                events.push(watchdog_fail(
                    run,
                    WatchdogFailureReason::StaleWorkerRunWatchdog,
                    now_epoch_ms,
                ));
                continue;
            }

            match run.phase {
                Phase::Queued => {
                    if let Some(event) =
                        self.check_queued_cursor_stale(run, now_epoch_ms, last_agent_timestamp)
                    {
                        events.push(event);
                    }
                }
                Phase::Spawning
                | Phase::Active
                | Phase::CompletionValidating
                | Phase::CompletionRepairPending
                | Phase::CompletionRepairActive => {
                    if let Some(event) = self.check_running_without_container(run, now_epoch_ms).await {
                        events.push(event);
                    }
                }
                Phase::Finalizing | Phase::Terminal => {}
            }
        }

        events
    }

    fn check_queued_cursor_stale(
        &self,
        run: &WorkerRun,
        now_epoch_ms: u64,
        last_agent_timestamp: &HashMap<LaneId, u64>,
    ) -> Option<Event> {
        let bookkeeping = self.bookkeeping.lock();
        if bookkeeping
            .get(&run.run_id)
            .and_then(|bk| bk.spawn_acknowledged_at_epoch_ms)
            .is_some()
        {
            return None;
        }
        drop(bookkeeping);

        let cursor_ts = *last_agent_timestamp.get(&run.lane_id)?;
        if cursor_ts < run.created_at_epoch_ms {
            return None;
        }

        let created_within_suppression = run
            .created_at_epoch_ms
            .saturating_sub(self.config.process_start_at_epoch_ms)
            < self.config.restart_suppression_window_ms;
        if created_within_suppression {
            return None;
        }
        let suppression_elapsed = now_epoch_ms.saturating_sub(self.config.process_start_at_epoch_ms)
            > self.config.restart_suppression_window_ms;
        if !suppression_elapsed {
            return None;
        }

        if now_epoch_ms.saturating_sub(run.created_at_epoch_ms) < self.config.queued_cursor_grace_ms {
            return None;
        }

        Some(watchdog_fail(
            run,
            WatchdogFailureReason::QueuedStaleBeforeSpawn,
            now_epoch_ms,
        ))
    }

    async fn check_running_without_container(&self, run: &WorkerRun, now_epoch_ms: u64) -> Option<Event> {
        let alive = self.driver.is_alive(&run.run_id).await;
        let mut bookkeeping = self.bookkeeping.lock();
        let entry = bookkeeping.entry(run.run_id.clone()).or_default();

        if alive {
            entry.no_container_since_epoch_ms = None;
            if run.phase == Phase::CompletionRepairPending {
                return Some(Event::WorkerRunRepairDispatched {
                    run_id: run.run_id.clone(),
                    attempt: run.repair_attempts,
                    epoch_ms: now_epoch_ms,
                });
            }
            return None;
        }

        let since = *entry.no_container_since_epoch_ms.get_or_insert(now_epoch_ms);
        let grace = in_flight_grace(run.phase, &self.config);
        let lease_expired = run
            .lease_expires_at_epoch_ms
            .map(|expires| now_epoch_ms >= expires)
            .unwrap_or(true);
        let heartbeat_stale = entry
            .last_heartbeat_at_epoch_ms
            .map(|h| now_epoch_ms.saturating_sub(h) > self.config.lease_ttl_ms)
            .unwrap_or(true);

        if now_epoch_ms.saturating_sub(since) > grace && lease_expired && heartbeat_stale {
            Some(watchdog_fail(
                run,
                WatchdogFailureReason::RunningWithoutContainer,
                now_epoch_ms,
            ))
        } else {
            None
        }
    }
}
