// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types shared across the dispatch pipeline's domain model.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown lane: {0}")]
    UnknownLane(String),

    #[error("invalid folder name: {0}")]
    InvalidFolderName(String),

    #[error("{field} failed validation: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("worker run {run_id} already exists")]
    DuplicateRunId { run_id: String },

    #[error("worker run {run_id} not found")]
    UnknownRunId { run_id: String },

    #[error("illegal phase transition for {run_id}: {from:?} -> {to:?}")]
    IllegalTransition {
        run_id: String,
        from: &'static str,
        to: &'static str,
    },
}
