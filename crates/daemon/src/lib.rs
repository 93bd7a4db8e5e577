// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! lanectld daemon library.
//!
//! Exposes the daemon's internals as a library so the CLI, integration
//! tests, and the `lanectld` binary itself can all depend on the same
//! types: the operator status-socket protocol, the IPC handler, the
//! orchestration tick, and the lifecycle/startup machinery.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod env;
pub mod event_bus;
pub mod handler;
pub mod lifecycle;
pub mod orchestrator;
pub mod protocol;

pub use handler::{DaemonHandler, PendingDispatch};
pub use lifecycle::{Config, DaemonState, LifecycleError, StartupResult};
pub use protocol::{
    decode, encode, read_message, read_request, write_message, write_response, ProtocolError,
    Request, Response, RunSummary, StatusSummary, DEFAULT_TIMEOUT, MAX_MESSAGE_SIZE,
    PROTOCOL_VERSION,
};
