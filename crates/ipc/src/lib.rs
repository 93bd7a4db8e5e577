// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! lanectl-ipc: the IPC watcher and authorization gate (spec.md §4.3). The
//! directory-polling mechanics and envelope parsing live here; persistence
//! lookups (does a `run_id` already exist, is a session reusable) and
//! channel sends are supplied by the `IpcHandler` the daemon crate
//! implements, keeping this crate free of a storage dependency — the same
//! seam `lanectl-dispatch` uses for session routing.

mod envelope;
mod error;
mod intake;
mod watcher;

pub use envelope::{
    parse_message_envelope, parse_task_envelope, EnvelopeParseError, MessageEnvelope, TaskEnvelope,
};
pub use error::HandlerError;
pub use intake::{check_dispatch_ownership, classify_intake, DispatchOwnershipError, IntakeDecision};
pub use watcher::{poll_loop, scan_once, watch_for_changes, IpcHandler};
