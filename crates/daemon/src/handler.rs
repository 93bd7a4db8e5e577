// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `DaemonHandler`: the daemon's implementation of `lanectl_ipc::IpcHandler`.
//! Owns the authorization gate, dispatch/completion contract handling, and
//! task routing (spec.md §4.3) — everything the watcher hands it is either
//! applied to `MaterializedState` and appended to the WAL, or refused with
//! a `HandlerError` that the watcher turns into an `errors/`-directory move.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use lanectl_adapters::{ChannelAdapter, ContainerDriver};
use lanectl_core::{
    authorize, BlockReason, Clock, CompletionContract, DispatchEnvelope, Event, IdGen, Lane,
    LaneId, MessageId, Phase, RunId, Status, SystemClock, UuidIdGen,
};
use lanectl_dispatch::{extract_json_block, parse_completion, parse_dispatch, validate_session_routing};
use lanectl_engine::{GroupQueue, WorkerRunSupervisor};
use lanectl_ipc::{
    check_dispatch_ownership, classify_intake, parse_message_envelope, parse_task_envelope,
    DispatchOwnershipError, HandlerError, IntakeDecision, IpcHandler, TaskEnvelope,
};
use lanectl_storage::MaterializedState;

/// A guidance message carries a resend template for recoverable mistakes
/// (bad JSON shape) but not for ones where resending the same payload would
/// just repeat the failure (duplicate run_id, authorization).
const RESEND_TEMPLATE: &str = "Resend as a dispatch JSON block: {\"run_id\":...,\"task_type\":...,\"context_intent\":...,\"input\":...}";

/// Everything a freshly queued worker run needs to actually spawn a
/// container, kept outside the persisted ledger row (`WorkerRun` carries no
/// dispatch/repo/image fields — spec.md's ledger row is a status machine,
/// not a job description). Ephemeral and rebuilt from the next dispatch if
/// the daemon restarts mid-run, mirroring `WorkerRunSupervisor`'s own
/// non-persisted bookkeeping.
#[derive(Debug, Clone)]
pub struct PendingDispatch {
    pub envelope: DispatchEnvelope,
    pub source_lane_id: LaneId,
}

pub struct DaemonHandler<D: ContainerDriver, C: ChannelAdapter, CLK: Clock = SystemClock> {
    state: Arc<Mutex<MaterializedState>>,
    event_bus: crate::event_bus::EventBus,
    queue: Arc<GroupQueue<D>>,
    supervisor: Arc<WorkerRunSupervisor<D>>,
    driver: D,
    channel: C,
    clock: CLK,
    id_gen: UuidIdGen,
    pending: Mutex<HashMap<RunId, PendingDispatch>>,
}

impl<D: ContainerDriver, C: ChannelAdapter, CLK: Clock> DaemonHandler<D, C, CLK> {
    pub fn new(
        state: Arc<Mutex<MaterializedState>>,
        event_bus: crate::event_bus::EventBus,
        queue: Arc<GroupQueue<D>>,
        supervisor: Arc<WorkerRunSupervisor<D>>,
        driver: D,
        channel: C,
        clock: CLK,
    ) -> Self {
        Self {
            state,
            event_bus,
            queue,
            supervisor,
            driver,
            channel,
            clock,
            id_gen: UuidIdGen,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn pending_dispatch(&self, run_id: &RunId) -> Option<PendingDispatch> {
        self.pending.lock().get(run_id).cloned()
    }

    pub fn forget_pending(&self, run_id: &RunId) {
        self.pending.lock().remove(run_id);
    }

    pub fn queue(&self) -> &Arc<GroupQueue<D>> {
        &self.queue
    }

    pub fn supervisor(&self) -> &Arc<WorkerRunSupervisor<D>> {
        &self.supervisor
    }

    pub fn state(&self) -> &Arc<Mutex<MaterializedState>> {
        &self.state
    }

    pub async fn driver_spawn(
        &self,
        config: lanectl_adapters::ContainerSpawnConfig,
    ) -> Result<lanectl_adapters::ContainerHandle, lanectl_adapters::ContainerError> {
        self.driver.spawn(config).await
    }

    /// Apply `event` to in-memory state immediately (so the very next
    /// lookup in this same handler call observes it) and append it to the
    /// WAL for durability. `MaterializedState::apply_event` is idempotent,
    /// so the background WAL-reapply task (see `crate::lifecycle`) safely
    /// applies it a second time once it comes back off the log.
    fn emit(&self, event: Event) {
        self.state.lock().apply_event(&event);
        if let Err(e) = self.event_bus.send(event) {
            tracing::warn!(error = %e, "failed to append event to WAL");
        }
    }

    fn now_ms(&self) -> u64 {
        self.clock.epoch_ms()
    }

    fn lookup_lane(&self, lane_id: &LaneId) -> Option<Lane> {
        self.state.lock().lanes.get(lane_id).cloned()
    }

    async fn guard_authorization(
        &self,
        source_lane_id: &LaneId,
        target_lane_id: &LaneId,
    ) -> Result<(Lane, Lane), HandlerError> {
        let source = match self.lookup_lane(source_lane_id) {
            Some(lane) => lane,
            None => {
                self.emit(Event::DispatchBlocked {
                    sender_lane_id: source_lane_id.clone(),
                    target_lane_id: target_lane_id.clone(),
                    reason: BlockReason::UnknownSenderLane,
                    epoch_ms: self.now_ms(),
                });
                return Err(HandlerError::Invalid(format!("unknown lane {source_lane_id}")));
            }
        };
        let target = match self.lookup_lane(target_lane_id) {
            Some(lane) => lane,
            None => {
                self.emit(Event::DispatchBlocked {
                    sender_lane_id: source_lane_id.clone(),
                    target_lane_id: target_lane_id.clone(),
                    reason: BlockReason::UnknownTargetLane,
                    epoch_ms: self.now_ms(),
                });
                let _ = self
                    .channel
                    .send(source_lane_id, "target lane is not registered", None)
                    .await;
                return Err(HandlerError::Invalid(format!("unknown lane {target_lane_id}")));
            }
        };

        if let Err(reason) = authorize(&source, &target) {
            self.emit(Event::DispatchBlocked {
                sender_lane_id: source_lane_id.clone(),
                target_lane_id: target_lane_id.clone(),
                reason,
                epoch_ms: self.now_ms(),
            });
            let guidance = match reason {
                BlockReason::NotAuthorized => "this lane is not authorized to message that target",
                BlockReason::UnknownSenderLane => "your lane is not registered",
                BlockReason::UnknownTargetLane => "target lane is not registered",
            };
            let _ = self.channel.send(source_lane_id, guidance, None).await;
            return Err(HandlerError::Denied(format!("{reason:?}")));
        }
        Ok((source, target))
    }

    /// Handle a worker lane's completion-contract submission (spec.md §4.5's
    /// `completion_validating` phase). Invalid completions move the run to
    /// `completion_repair_pending`, which the orchestrator later promotes by
    /// spawning a repair container against the same session.
    async fn handle_completion(
        &self,
        source_lane_id: &LaneId,
        run_id_hint: &str,
        body: &str,
    ) -> Result<(), HandlerError> {
        let now = self.now_ms();

        let run = {
            let state = self.state.lock();
            state.get_worker_run(run_id_hint).cloned()
        };
        let Some(run) = run else {
            return Err(HandlerError::Invalid(format!("unknown run_id {run_id_hint}")));
        };
        if !matches!(run.phase, Phase::Active | Phase::CompletionRepairActive) {
            return Err(HandlerError::Invalid(format!(
                "run {} is not awaiting a completion (phase={:?})",
                run.run_id, run.phase
            )));
        }

        self.emit(Event::WorkerRunCompletionReceived {
            run_id: run.run_id.clone(),
            epoch_ms: now,
        });

        // A completion must be checked against the dispatch that started this
        // run: its run_id/branch must match exactly and it must carry every
        // field that dispatch's output_contract demanded. Without the
        // original PendingDispatch (e.g. after a daemon restart mid-run) fall
        // back to trusting the completion's own branch, since there is
        // nothing to compare it against.
        let outcome = parse_completion(body)
            .map_err(|e| e.to_string())
            .and_then(|contract| {
                let pending = self.pending_dispatch(&run.run_id);
                let (expected_branch, required_fields, browser_evidence_required) = match &pending
                {
                    Some(p) => (
                        p.envelope.branch.clone(),
                        p.envelope.output_contract.required_fields.clone(),
                        p.envelope.output_contract.browser_evidence_required,
                    ),
                    None => (contract.branch.clone(), Vec::new(), false),
                };
                let result = contract.validate(
                    &run.run_id,
                    &expected_branch,
                    &required_fields,
                    browser_evidence_required,
                    false,
                );
                if result.valid {
                    Ok(contract)
                } else {
                    Err(result.missing.join(", "))
                }
            });

        match outcome {
            Ok(contract) => {
                self.accept_completion(source_lane_id, &run.run_id, contract, now)
                    .await
            }
            Err(reason) => self.reject_completion(&run.run_id, &run, reason, now).await,
        }
    }

    async fn accept_completion(
        &self,
        source_lane_id: &LaneId,
        run_id: &RunId,
        contract: CompletionContract,
        now: u64,
    ) -> Result<(), HandlerError> {
        // completion_validating -> finalizing -> terminal(review_requested); an
        // external review process is responsible for the later
        // review_requested -> done transition (spec.md §4.6).
        self.emit(Event::WorkerRunFinished {
            run_id: run_id.clone(),
            status: Status::ReviewRequested,
            epoch_ms: now,
        });
        self.supervisor.forget(run_id);
        self.queue.notify_idle(&lane_id_of(&self.state, run_id));
        self.forget_pending(run_id);

        let summary = format!(
            "{run_id} ready for review: branch {branch}, commit {sha}, risk {risk}",
            run_id = run_id,
            branch = contract.branch,
            sha = contract.commit_sha,
            risk = contract.risk,
        );
        let _ = self.channel.send(source_lane_id, &summary, None).await;
        Ok(())
    }

    async fn reject_completion(
        &self,
        run_id: &RunId,
        run: &lanectl_core::WorkerRun,
        reason: String,
        now: u64,
    ) -> Result<(), HandlerError> {
        self.emit(Event::WorkerRunCompletionRejected {
            run_id: run_id.clone(),
            reason: reason.clone(),
            epoch_ms: now,
        });

        if run.can_attempt_completion_repair() {
            // Stays queued against the same lane's container; the
            // orchestrator's reconcile pass promotes completion_repair_pending
            // rows once the supervisor confirms the container is still live.
            self.queue.enqueue_message_check(&run.lane_id);
            Ok(())
        } else {
            self.emit(Event::WorkerRunFinished {
                run_id: run_id.clone(),
                status: Status::FailedContract,
                epoch_ms: now,
            });
            self.supervisor.forget(run_id);
            self.queue.notify_idle(&run.lane_id);
            self.forget_pending(run_id);
            Err(HandlerError::Invalid(format!(
                "completion contract invalid after exhausting repairs: {reason}"
            )))
        }
    }

    async fn handle_schedule_task(
        &self,
        source_lane_id: &LaneId,
        target_lane_id: &LaneId,
        prompt_body: &str,
    ) -> Result<(), HandlerError> {
        let (source, target) = self.guard_authorization(source_lane_id, target_lane_id).await?;
        if let Err(e) = check_dispatch_ownership(&source, &target) {
            let reason = match e {
                DispatchOwnershipError::NotFromPlanner => "only the planner lane may dispatch to a worker lane",
                DispatchOwnershipError::EchoedToPlanner => "a dispatch may not target the planner lane",
            };
            let _ = self.channel.send(source_lane_id, reason, None).await;
            return Err(HandlerError::Denied(reason.to_string()));
        }

        let envelope = match parse_dispatch(prompt_body) {
            Ok(e) => e,
            Err(e) => {
                let _ = self
                    .channel
                    .send(source_lane_id, &format!("invalid dispatch payload: {e}. {RESEND_TEMPLATE}"), None)
                    .await;
                return Err(HandlerError::Invalid(e.to_string()));
            }
        };

        let existing = {
            let state = self.state.lock();
            state.get_worker_run(envelope.run_id.as_str()).cloned()
        };
        match classify_intake(existing.as_ref()) {
            IntakeDecision::Duplicate => {
                let _ = self
                    .channel
                    .send(source_lane_id, "duplicate run_id: this run has already been dispatched", None)
                    .await;
                return Err(HandlerError::Denied("duplicate_run_id".to_string()));
            }
            IntakeDecision::New | IntakeDecision::Retry => {}
        }

        let session_lookup = envelope
            .session_id
            .as_ref()
            .and_then(|sid| self.state.lock().sessions.get(sid.as_str()).cloned());
        if let Err(e) =
            validate_session_routing(&envelope, target_lane_id, false, session_lookup.as_ref())
        {
            let text = format!("context_intent=continue requires a reusable prior session: {e}");
            let _ = self.channel.send(source_lane_id, &text, None).await;
            return Err(HandlerError::Invalid(e.to_string()));
        }

        let now = self.now_ms();
        self.emit(Event::WorkerRunQueued {
            run_id: envelope.run_id.clone(),
            lane_id: target_lane_id.clone(),
            epoch_ms: now,
        });
        self.pending.lock().insert(
            envelope.run_id.clone(),
            PendingDispatch {
                envelope,
                source_lane_id: source_lane_id.clone(),
            },
        );
        self.queue.enqueue_message_check(target_lane_id);
        Ok(())
    }

    async fn handle_cancel_task(&self, target_lane_id: &LaneId) -> Result<(), HandlerError> {
        let Some(reg) = self.queue.active_registration(target_lane_id) else {
            return Ok(());
        };
        if let Err(e) = self.driver.kill(&reg.run_id).await {
            return Err(HandlerError::Internal(e.to_string()));
        }
        self.emit(Event::WorkerRunFinished {
            run_id: reg.run_id.clone(),
            status: Status::Failed,
            epoch_ms: self.now_ms(),
        });
        self.supervisor.forget(&reg.run_id);
        self.queue.notify_idle(target_lane_id);
        self.forget_pending(&reg.run_id);
        Ok(())
    }
}

fn lane_id_of(state: &Arc<Mutex<MaterializedState>>, run_id: &RunId) -> LaneId {
    state
        .lock()
        .get_worker_run(run_id.as_str())
        .map(|r| r.lane_id.clone())
        .unwrap_or_else(|| LaneId::new(""))
}


#[async_trait]
impl<D: ContainerDriver, C: ChannelAdapter, CLK: Clock> IpcHandler for DaemonHandler<D, C, CLK> {
    async fn handle_message(&self, _lane_folder: &str, body: &str) -> Result<(), HandlerError> {
        let envelope =
            parse_message_envelope(body).map_err(|e| HandlerError::Invalid(e.to_string()))?;

        let (_, _) = self
            .guard_authorization(&envelope.source_lane_id, &envelope.target_lane_id)
            .await?;

        // A worker lane reporting back to whoever dispatched it carries a
        // completion-contract JSON block; anything else is ordinary chat
        // relay. The run_id named in the JSON block (if any) tells us which
        // ledger row this completion belongs to.
        if let Some(block) = extract_json_block(&envelope.body) {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(block) {
                if let Some(run_id) = value.get("run_id").and_then(|v| v.as_str()) {
                    return self
                        .handle_completion(&envelope.source_lane_id, run_id, &envelope.body)
                        .await;
                }
            }
        }

        let now = self.now_ms();
        self.emit(Event::MessageProcessed {
            lane_id: envelope.target_lane_id.clone(),
            message_id: MessageId::new(self.id_gen.next()),
            epoch_ms: now,
        });
        self.channel
            .send(
                &envelope.target_lane_id,
                &envelope.body,
                Some(&envelope.source_lane_id),
            )
            .await
            .map_err(|e| HandlerError::Internal(e.to_string()))?;
        self.queue.enqueue_message_check(&envelope.target_lane_id);
        Ok(())
    }

    async fn handle_task(&self, _lane_folder: &str, body: &str) -> Result<(), HandlerError> {
        let task = parse_task_envelope(body).map_err(|e| HandlerError::Invalid(e.to_string()))?;

        match task {
            TaskEnvelope::ScheduleTask {
                source_lane_id,
                target_lane_id,
                prompt_body,
            } => {
                self.handle_schedule_task(&source_lane_id, &target_lane_id, &prompt_body)
                    .await
            }
            TaskEnvelope::PauseTask {
                source_lane_id,
                target_lane_id,
            } => {
                self.guard_authorization(&source_lane_id, &target_lane_id).await?;
                self.queue.close_stdin(&target_lane_id);
                Ok(())
            }
            TaskEnvelope::ResumeTask {
                source_lane_id,
                target_lane_id,
            } => {
                self.guard_authorization(&source_lane_id, &target_lane_id).await?;
                // No stdin re-piping primitive exists once a lane's container
                // has had its stdin closed (spec.md names resume as a
                // Non-goal-adjacent nicety); log and accept rather than
                // reject the envelope outright.
                tracing::warn!(lane_id = %target_lane_id, "resume_task received; no-op");
                Ok(())
            }
            TaskEnvelope::CancelTask {
                source_lane_id,
                target_lane_id,
            } => {
                self.guard_authorization(&source_lane_id, &target_lane_id).await?;
                self.handle_cancel_task(&target_lane_id).await
            }
            TaskEnvelope::RefreshGroups { source_lane_id } => {
                tracing::info!(source_lane_id = %source_lane_id, "refresh_groups received; lane registry is file-driven, nothing to refresh");
                Ok(())
            }
            TaskEnvelope::RegisterGroup {
                source_lane_id: _,
                folder_name,
            } => {
                if !lanectl_core::is_safe_folder_name(&folder_name) {
                    return Err(HandlerError::Invalid(format!(
                        "unsafe folder name: {folder_name}"
                    )));
                }
                self.emit(Event::LaneRegistered {
                    lane_id: LaneId::new(folder_name.clone()),
                    folder_name,
                });
                Ok(())
            }
        }
    }
}
