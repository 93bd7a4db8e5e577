// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-dropped IPC envelopes: the on-disk shape the watcher reads from
//! each lane's `messages/`/`tasks/` directory.

use lanectl_core::LaneId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeParseError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
}

/// A `messages/` envelope: free-form text (possibly embedding a dispatch or
/// completion JSON block) addressed from one lane to another.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub source_lane_id: LaneId,
    pub target_lane_id: LaneId,
    pub body: String,
}

/// A `tasks/` envelope, one of the six task kinds spec.md §4.3 names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskEnvelope {
    ScheduleTask {
        source_lane_id: LaneId,
        target_lane_id: LaneId,
        /// Dispatch envelope JSON, required to parse and validate when the
        /// target is a worker lane and the source is the planner.
        prompt_body: String,
    },
    PauseTask {
        source_lane_id: LaneId,
        target_lane_id: LaneId,
    },
    ResumeTask {
        source_lane_id: LaneId,
        target_lane_id: LaneId,
    },
    CancelTask {
        source_lane_id: LaneId,
        target_lane_id: LaneId,
    },
    RefreshGroups { source_lane_id: LaneId },
    RegisterGroup {
        source_lane_id: LaneId,
        folder_name: String,
    },
}

impl TaskEnvelope {
    pub fn source_lane_id(&self) -> &LaneId {
        match self {
            TaskEnvelope::ScheduleTask { source_lane_id, .. }
            | TaskEnvelope::PauseTask { source_lane_id, .. }
            | TaskEnvelope::ResumeTask { source_lane_id, .. }
            | TaskEnvelope::CancelTask { source_lane_id, .. }
            | TaskEnvelope::RefreshGroups { source_lane_id }
            | TaskEnvelope::RegisterGroup { source_lane_id, .. } => source_lane_id,
        }
    }

    /// The lane this task acts on, if it names one (`refresh_groups` and
    /// `register_group` act on the whole registry, not a single lane).
    pub fn target_lane_id(&self) -> Option<&LaneId> {
        match self {
            TaskEnvelope::ScheduleTask { target_lane_id, .. }
            | TaskEnvelope::PauseTask { target_lane_id, .. }
            | TaskEnvelope::ResumeTask { target_lane_id, .. }
            | TaskEnvelope::CancelTask { target_lane_id, .. } => Some(target_lane_id),
            TaskEnvelope::RefreshGroups { .. } | TaskEnvelope::RegisterGroup { .. } => None,
        }
    }
}

pub fn parse_message_envelope(json: &str) -> Result<MessageEnvelope, EnvelopeParseError> {
    Ok(serde_json::from_str(json)?)
}

pub fn parse_task_envelope(json: &str) -> Result<TaskEnvelope, EnvelopeParseError> {
    Ok(serde_json::from_str(json)?)
}
