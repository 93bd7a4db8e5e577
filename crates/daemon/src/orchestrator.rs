// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic orchestration tick: drives the watchdog (`WorkerRunSupervisor`)
//! and lane scheduling (`GroupQueue`) forward. Runs alongside the IPC
//! watcher in the daemon's main loop (spec.md §4.4/§4.5) — the watcher only
//! ever queues work and applies events the handler already decided on; this
//! tick is what actually spawns containers and notices when one has stalled.

use std::collections::HashMap;
use std::sync::Arc;

use lanectl_adapters::{ChannelAdapter, ContainerDriver, ContainerSpawnConfig};
use lanectl_core::{Clock, Event, LaneId, Phase};
use lanectl_engine::{GroupQueue, WorkerRunSupervisor};
use lanectl_storage::MaterializedState;
use parking_lot::Mutex;

use crate::event_bus::EventBus;
use crate::handler::DaemonHandler;

/// One orchestration pass: watchdog reconcile, then spawn as many queued
/// lanes as the concurrency cap allows.
pub async fn tick<D, C, CLK>(
    handler: &DaemonHandler<D, C, CLK>,
    event_bus: &EventBus,
    last_agent_timestamp: &HashMap<LaneId, u64>,
) where
    D: ContainerDriver,
    C: ChannelAdapter,
    CLK: Clock,
{
    reconcile_watchdog(handler, event_bus, last_agent_timestamp).await;
    spawn_ready_lanes(handler, event_bus).await;
}

async fn reconcile_watchdog<D, C, CLK>(
    handler: &DaemonHandler<D, C, CLK>,
    event_bus: &EventBus,
    last_agent_timestamp: &HashMap<LaneId, u64>,
) where
    D: ContainerDriver,
    C: ChannelAdapter,
    CLK: Clock,
{
    let now = lanectl_core::SystemClock.epoch_ms();
    let snapshot = handler.state().lock().clone();
    let events = handler
        .supervisor()
        .reconcile(&snapshot, now, last_agent_timestamp)
        .await;

    for event in events {
        if let Event::WorkerRunWatchdogFailed { run_id, .. } = &event {
            handler.supervisor().forget(run_id);
            handler.forget_pending(run_id);
            if let Some(lane_id) = snapshot
                .get_worker_run(run_id.as_str())
                .map(|r| r.lane_id.clone())
            {
                handler.queue().notify_idle(&lane_id);
            }
        }
        apply_and_send(handler.state(), event_bus, event);
    }
}

async fn spawn_ready_lanes<D, C, CLK>(handler: &DaemonHandler<D, C, CLK>, event_bus: &EventBus)
where
    D: ContainerDriver,
    C: ChannelAdapter,
    CLK: Clock,
{
    while let Some(lane_id) = handler.queue().take_ready_lane() {
        let Some(run_id) = next_queued_run_for_lane(handler.state(), &lane_id) else {
            continue;
        };
        let Some(pending) = handler.pending_dispatch(&run_id) else {
            // Lost bookkeeping (e.g. restart mid-queue) with nothing to
            // replay from; leave the row for the watchdog's
            // queued_stale_before_spawn rule to fail it.
            continue;
        };

        let lane = handler.state().lock().lanes.get(&lane_id).cloned();
        let image = lane
            .as_ref()
            .and_then(|l| l.container_config.as_ref())
            .and_then(|c| c.image.clone())
            .unwrap_or_else(|| "lanectl/worker:latest".to_string());
        let env = lane
            .as_ref()
            .and_then(|l| l.container_config.as_ref())
            .map(|c| c.env.clone())
            .unwrap_or_default();

        let spawn_config = ContainerSpawnConfig {
            run_id: run_id.clone(),
            image,
            env,
            repo: pending.envelope.repo.clone(),
            branch: None,
            initial_input: pending.envelope.input.clone(),
        };

        let now = lanectl_core::SystemClock.epoch_ms();
        apply_and_send(
            handler.state(),
            event_bus,
            Event::WorkerRunSpawning {
                run_id: run_id.clone(),
                epoch_ms: now,
            },
        );

        match handler.driver_spawn(spawn_config).await {
            Ok(handle) => {
                let group_folder = lane
                    .as_ref()
                    .map(|l| l.folder_name.clone())
                    .unwrap_or_else(|| lane_id.as_str().to_string());
                handler.queue().register_process(
                    &lane_id,
                    run_id.clone(),
                    handle.container_name.clone(),
                    group_folder,
                );
                handler.supervisor().record_spawn_ack(&run_id, now);
                apply_and_send(
                    handler.state(),
                    event_bus,
                    Event::WorkerRunActive {
                        run_id: run_id.clone(),
                        session_id: handle.session_id,
                        epoch_ms: now,
                    },
                );
            }
            Err(e) => {
                tracing::warn!(run_id = %run_id, error = %e, "container spawn failed");
                handler.forget_pending(&run_id);
                apply_and_send(
                    handler.state(),
                    event_bus,
                    Event::WorkerRunFinished {
                        run_id: run_id.clone(),
                        status: lanectl_core::Status::Failed,
                        epoch_ms: now,
                    },
                );
            }
        }
    }
}

fn next_queued_run_for_lane(
    state: &Arc<Mutex<MaterializedState>>,
    lane_id: &LaneId,
) -> Option<lanectl_core::RunId> {
    let state = state.lock();
    state
        .worker_runs
        .values()
        .filter(|r| &r.lane_id == lane_id && r.phase == Phase::Queued)
        .min_by_key(|r| r.created_at_epoch_ms)
        .map(|r| r.run_id.clone())
}

fn apply_and_send(state: &Arc<Mutex<MaterializedState>>, event_bus: &EventBus, event: Event) {
    state.lock().apply_event(&event);
    if let Err(e) = event_bus.send(event) {
        tracing::warn!(error = %e, "failed to append event to WAL");
    }
}
