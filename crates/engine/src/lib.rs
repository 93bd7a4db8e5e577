// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! lanectl-engine: the Group Queue (spec.md §4.4) and Worker-Run Supervisor
//! (spec.md §4.5). Both operate purely on `lanectl_core`/`lanectl_storage`
//! types and an injected `ContainerDriver`; the cooperative message-loop
//! that drives them lives in the daemon crate.

mod error;
mod queue;
mod supervisor;

pub use error::EngineError;
pub use queue::{ActiveRegistration, GroupQueue};
pub use supervisor::{SupervisorConfig, WorkerRunSupervisor};
