// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::channel::FakeChannelAdapter;
use crate::container::{ContainerSpawnConfig, FakeContainerDriver};
use lanectl_core::{LaneId, RunId};
use serial_test::{parallel, serial};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

/// A writer that captures log output for testing
#[derive(Clone, Default)]
struct CapturedLogs {
    logs: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    fn new() -> Self {
        Self::default()
    }

    fn contents(&self) -> String {
        let logs = self.logs.lock().unwrap();
        String::from_utf8_lossy(&logs).to_string()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.logs.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn with_tracing<F, Fut>(f: F) -> (String, Fut::Output)
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future,
{
    let logs = CapturedLogs::new();
    let logs_clone = logs.clone();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_writer(logs_clone)
        .with_ansi(false)
        .without_time()
        .finish();

    let result = tracing::subscriber::with_default(subscriber, || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(f())
    });

    (logs.contents(), result)
}

fn assert_log(logs: &str, label: &str, expected: &str) {
    assert!(logs.contains(expected), "Should log {label}. Logs:\n{logs}");
}

fn spawn_config(run_id: RunId) -> ContainerSpawnConfig {
    ContainerSpawnConfig {
        run_id,
        image: "lanectl/worker:latest".to_string(),
        env: Default::default(),
        repo: None,
        branch: None,
        initial_input: "start".to_string(),
    }
}

#[test]
#[serial(tracing)]
fn traced_container_spawn_logs_entry_and_completion() {
    let (logs, result) = with_tracing(|| async {
        let fake = FakeContainerDriver::new();
        let traced = TracedContainer::new(fake);
        traced.spawn(spawn_config(RunId::new("run-1"))).await
    });

    assert!(result.is_ok(), "spawn should succeed: {:?}", result);
    assert_log(&logs, "span name", "container.spawn");
    assert_log(&logs, "run_id", "run-1");
    assert_log(&logs, "completion", "container spawned");
    assert_log(&logs, "timing", "elapsed_ms");
}

#[test]
#[serial(tracing)]
fn traced_container_spawn_logs_error_on_failure() {
    let (logs, result) = with_tracing(|| async {
        let fake = FakeContainerDriver::new();
        fake.set_fail_spawn(true);
        let traced = TracedContainer::new(fake);
        traced.spawn(spawn_config(RunId::new("run-1"))).await
    });

    assert!(result.is_err());
    assert_log(&logs, "spawn failure", "spawn failed");
}

#[test]
#[serial(tracing)]
fn traced_container_kill_logs_operation() {
    let (logs, _) = with_tracing(|| async {
        let fake = FakeContainerDriver::new();
        let traced = TracedContainer::new(fake);
        let run_id = RunId::new("run-1");
        traced.spawn(spawn_config(run_id.clone())).await.unwrap();
        traced.kill(&run_id).await
    });

    assert_log(&logs, "kill span", "container.kill");
    assert_log(&logs, "kill completion", "killed");
}

#[tokio::test]
#[parallel(tracing)]
async fn traced_container_delegates_send_to_inner() {
    let fake = FakeContainerDriver::new();
    let traced = TracedContainer::new(fake.clone());
    let run_id = RunId::new("run-1");
    traced.spawn(spawn_config(run_id.clone())).await.unwrap();

    traced.send(&run_id, "more input").await.unwrap();

    let calls = fake.calls();
    assert!(calls
        .iter()
        .any(|c| matches!(c, crate::container::ContainerCall::Send(r, i) if r == &run_id && i == "more input")));
}

#[tokio::test]
#[parallel(tracing)]
async fn traced_container_is_alive_delegates_to_inner() {
    let fake = FakeContainerDriver::new();
    let traced = TracedContainer::new(fake);
    let run_id = RunId::new("run-1");
    assert!(!traced.is_alive(&run_id).await);
    traced.spawn(spawn_config(run_id.clone())).await.unwrap();
    assert!(traced.is_alive(&run_id).await);
}

#[test]
#[serial(tracing)]
fn traced_channel_send_logs_operation() {
    let (logs, result) = with_tracing(|| async {
        let fake = FakeChannelAdapter::new();
        let traced = TracedChannel::new(fake);
        traced.send(&LaneId::new("main"), "hi", None).await
    });

    assert!(result.is_ok());
    assert_log(&logs, "send span", "channel.send");
}

#[test]
#[serial(tracing)]
fn traced_channel_send_logs_error_on_failure() {
    let (logs, result) = with_tracing(|| async {
        let fake = FakeChannelAdapter::new();
        fake.set_fail_send(true);
        let traced = TracedChannel::new(fake);
        traced.send(&LaneId::new("main"), "hi", None).await
    });

    assert!(result.is_err());
    assert_log(&logs, "send failure", "send failed");
}

#[tokio::test]
#[parallel(tracing)]
async fn traced_channel_delegates_typing_to_inner() {
    let fake = FakeChannelAdapter::new();
    let traced = TracedChannel::new(fake.clone());
    let lane = LaneId::new("main");
    traced.typing(&lane).await.unwrap();

    let calls = fake.calls();
    assert_eq!(
        calls,
        vec![crate::channel::ChannelCall::Typing(lane)]
    );
}
