// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
// Enable coverage(off) attribute for excluding test infrastructure
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Adapters for external I/O: the container driver that runs a worker's
//! coding agent, and the channel adapter that delivers chat traffic.

pub mod channel;
pub mod container;
mod env;
pub mod subprocess;
pub mod traced;

pub use channel::{ChannelAdapter, ChannelError, SyntheticChannelAdapter};
pub use container::{
    ContainerDriver, ContainerError, ContainerHandle, ContainerReconnectConfig,
    ContainerSpawnConfig, DockerContainerDriver,
};
pub use env::{container_ready_poll_ms, ipc_poll_ms};
pub use traced::{TracedChannel, TracedContainer};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub use channel::{ChannelCall, FakeChannelAdapter};
#[cfg(any(test, feature = "test-support"))]
pub use container::{ContainerCall, FakeContainerDriver};
