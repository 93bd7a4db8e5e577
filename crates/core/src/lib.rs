// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! lanectl-core: shared domain model for the dispatch pipeline.

pub mod clock;
pub mod cursor;
pub mod dispatch;
pub mod dispatch_block;
pub mod error;
pub mod event;
pub mod id;
pub mod ids;
pub mod lane;
pub mod message;
pub mod session;
pub mod worker_run;

pub use clock::{Clock, FakeClock, SystemClock};
pub use cursor::{CursorTable, LaneCursor};
pub use dispatch::{
    BrowserEvidence, CompletionContract, CompletionValidation, ContextIntent, DispatchEnvelope,
    OutputContract, TaskType,
};
pub use dispatch_block::{authorize, BlockReason, DispatchBlockEvent};
pub use error::CoreError;
pub use event::Event;
pub use id::{IdGen, ShortId, UuidIdGen};
pub use ids::{AgentSessionId, LaneId, MessageId, RunId};
pub use lane::{is_safe_folder_name, Lane, LaneContainerConfig, LaneKind};
pub use message::Message;
pub use session::{Session, SessionState};
pub use worker_run::{Phase, Status, WatchdogFailureReason, WorkerRun};
