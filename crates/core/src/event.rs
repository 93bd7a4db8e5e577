// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only domain events. These are the WAL's unit of record: the
//! materialized `State` is nothing more than the fold of every `Event`
//! applied in order (see `lanectl_storage::state`).

use crate::dispatch_block::BlockReason;
use crate::ids::{AgentSessionId, LaneId, MessageId, RunId};
use crate::worker_run::{Status, WatchdogFailureReason};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "lane_registered")]
    LaneRegistered { lane_id: LaneId, folder_name: String },

    #[serde(rename = "message_processed")]
    MessageProcessed {
        lane_id: LaneId,
        message_id: MessageId,
        epoch_ms: u64,
    },

    #[serde(rename = "dispatch_blocked")]
    DispatchBlocked {
        sender_lane_id: LaneId,
        target_lane_id: LaneId,
        reason: BlockReason,
        epoch_ms: u64,
    },

    #[serde(rename = "worker_run_queued")]
    WorkerRunQueued {
        run_id: RunId,
        lane_id: LaneId,
        epoch_ms: u64,
    },

    #[serde(rename = "worker_run_spawning")]
    WorkerRunSpawning { run_id: RunId, epoch_ms: u64 },

    #[serde(rename = "worker_run_active")]
    WorkerRunActive {
        run_id: RunId,
        session_id: AgentSessionId,
        epoch_ms: u64,
    },

    #[serde(rename = "worker_run_completion_received")]
    WorkerRunCompletionReceived { run_id: RunId, epoch_ms: u64 },

    #[serde(rename = "worker_run_completion_rejected")]
    WorkerRunCompletionRejected {
        run_id: RunId,
        reason: String,
        epoch_ms: u64,
    },

    #[serde(rename = "worker_run_repair_dispatched")]
    WorkerRunRepairDispatched {
        run_id: RunId,
        attempt: u32,
        epoch_ms: u64,
    },

    #[serde(rename = "worker_run_finished")]
    WorkerRunFinished {
        run_id: RunId,
        status: Status,
        epoch_ms: u64,
    },

    #[serde(rename = "worker_run_watchdog_failed")]
    WorkerRunWatchdogFailed {
        run_id: RunId,
        reason: WatchdogFailureReason,
        epoch_ms: u64,
    },

    #[serde(rename = "lease_acquired")]
    LeaseAcquired {
        run_id: RunId,
        owner: String,
        expires_at_epoch_ms: u64,
    },

    /// Forward-compatibility catch-all: events from a future build that this
    /// build doesn't know about are preserved verbatim on replay instead of
    /// failing deserialization.
    #[serde(other, skip_serializing)]
    Custom,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::LaneRegistered { .. } => "lane_registered",
            Event::MessageProcessed { .. } => "message_processed",
            Event::DispatchBlocked { .. } => "dispatch_blocked",
            Event::WorkerRunQueued { .. } => "worker_run_queued",
            Event::WorkerRunSpawning { .. } => "worker_run_spawning",
            Event::WorkerRunActive { .. } => "worker_run_active",
            Event::WorkerRunCompletionReceived { .. } => "worker_run_completion_received",
            Event::WorkerRunCompletionRejected { .. } => "worker_run_completion_rejected",
            Event::WorkerRunRepairDispatched { .. } => "worker_run_repair_dispatched",
            Event::WorkerRunFinished { .. } => "worker_run_finished",
            Event::WorkerRunWatchdogFailed { .. } => "worker_run_watchdog_failed",
            Event::LeaseAcquired { .. } => "lease_acquired",
            Event::Custom => "custom",
        }
    }

    pub fn run_id(&self) -> Option<&RunId> {
        match self {
            Event::WorkerRunQueued { run_id, .. }
            | Event::WorkerRunSpawning { run_id, .. }
            | Event::WorkerRunActive { run_id, .. }
            | Event::WorkerRunCompletionReceived { run_id, .. }
            | Event::WorkerRunCompletionRejected { run_id, .. }
            | Event::WorkerRunRepairDispatched { run_id, .. }
            | Event::WorkerRunFinished { run_id, .. }
            | Event::WorkerRunWatchdogFailed { run_id, .. }
            | Event::LeaseAcquired { run_id, .. } => Some(run_id),
            _ => None,
        }
    }
}
