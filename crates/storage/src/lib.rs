// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! lanectl-storage: the Persistence Gateway's concrete backing — a JSONL
//! event log plus periodic zstd-compressed snapshots, materialized into an
//! in-memory `MaterializedState` by WAL replay.

mod checkpoint;
mod migration;
mod snapshot;
mod state;
mod wal;

/// Current on-disk snapshot schema version, bumped whenever `MaterializedState`'s
/// shape changes in a way the migration registry needs to know about.
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

pub use checkpoint::{
    load_snapshot, CheckpointError, CheckpointHandle, CheckpointResult, CheckpointWriter,
    Checkpointer, FsCheckpointWriter,
};
pub use migration::{Migration, MigrationError, MigrationRegistry};
pub use snapshot::{Snapshot, SnapshotError};
pub use state::MaterializedState;
pub use wal::{Wal, WalEntry, WalError};
