// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Group Queue (spec.md §4.4): one FIFO of pending-work tokens per lane,
//! plus at most one active container registration per lane. Different
//! lanes may run concurrently up to `max_concurrent_containers`; a single
//! lane is always served by at most one container at a time.

use lanectl_adapters::ContainerDriver;
use lanectl_core::{LaneId, RunId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

/// A live container currently bound to a lane.
#[derive(Debug, Clone)]
pub struct ActiveRegistration {
    pub run_id: RunId,
    pub container_name: String,
    pub group_folder: String,
    /// Cleared by `close_stdin`; `send_message` refuses to pipe once closed,
    /// even though the container may still be draining output.
    open: bool,
}

#[derive(Default)]
struct Inner {
    pending_order: VecDeque<LaneId>,
    pending_set: HashSet<LaneId>,
    active: HashMap<LaneId, ActiveRegistration>,
}

/// Per-lane dispatch queue, generic over the container driver so tests can
/// swap in `FakeContainerDriver`.
pub struct GroupQueue<D: ContainerDriver> {
    driver: D,
    max_concurrent_containers: usize,
    inner: Mutex<Inner>,
}

impl<D: ContainerDriver> GroupQueue<D> {
    pub fn new(driver: D, max_concurrent_containers: usize) -> Self {
        Self {
            driver,
            max_concurrent_containers,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Schedule a fresh pass for `lane`. Returns `true` if this call created
    /// a new pending entry, `false` if an existing one absorbed it.
    pub fn enqueue_message_check(&self, lane: &LaneId) -> bool {
        let mut inner = self.inner.lock();
        if inner.pending_set.contains(lane) {
            return false;
        }
        inner.pending_set.insert(lane.clone());
        inner.pending_order.push_back(lane.clone());
        true
    }

    /// Pipe `text` into the lane's live container, if any. Worker lanes
    /// never have a piped container (spec.md §4.4's "no stdin piping"
    /// invariant) — callers are expected to enqueue a fresh dispatch for
    /// them instead of calling this.
    pub async fn send_message(&self, lane: &LaneId, text: &str) -> Result<bool, crate::EngineError> {
        let run_id = {
            let inner = self.inner.lock();
            match inner.active.get(lane) {
                Some(reg) if reg.open => reg.run_id.clone(),
                _ => return Ok(false),
            }
        };
        self.driver.send(&run_id, text).await?;
        Ok(true)
    }

    /// Associate a freshly spawned container with `lane`. Also clears the
    /// lane's pending entry, since the scheduling pass that spawned it has
    /// now been served.
    pub fn register_process(&self, lane: &LaneId, run_id: RunId, container_name: String, group_folder: String) {
        let mut inner = self.inner.lock();
        inner.pending_set.remove(lane);
        inner.pending_order.retain(|l| l != lane);
        inner.active.insert(
            lane.clone(),
            ActiveRegistration {
                run_id,
                container_name,
                group_folder,
                open: true,
            },
        );
    }

    /// Cooperative termination on idle: stop piping further input, without
    /// tearing the container down immediately.
    pub fn close_stdin(&self, lane: &LaneId) {
        if let Some(reg) = self.inner.lock().active.get_mut(lane) {
            reg.open = false;
        }
    }

    /// A `status=success` event freed this lane's container; release the
    /// slot so the next queued lane (if any) can be served.
    pub fn notify_idle(&self, lane: &LaneId) -> Option<ActiveRegistration> {
        self.inner.lock().active.remove(lane)
    }

    /// The next lane ready to be served, honoring the concurrency cap.
    /// Callers are expected to spawn a container and then call
    /// `register_process` for the returned lane.
    pub fn take_ready_lane(&self) -> Option<LaneId> {
        let mut inner = self.inner.lock();
        if inner.active.len() >= self.max_concurrent_containers {
            return None;
        }
        let lane = inner.pending_order.pop_front()?;
        inner.pending_set.remove(&lane);
        Some(lane)
    }

    pub fn active_registration(&self, lane: &LaneId) -> Option<ActiveRegistration> {
        self.inner.lock().active.get(lane).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    /// Close all open stdins, give containers `timeout` to exit on their
    /// own, then force-kill whatever remains.
    pub async fn shutdown(&self, timeout: Duration) {
        let lanes: Vec<LaneId> = {
            let mut inner = self.inner.lock();
            for reg in inner.active.values_mut() {
                reg.open = false;
            }
            inner.active.keys().cloned().collect()
        };

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining: Vec<RunId> = {
                let inner = self.inner.lock();
                lanes
                    .iter()
                    .filter_map(|l| inner.active.get(l).map(|r| r.run_id.clone()))
                    .collect()
            };
            if remaining.is_empty() || tokio::time::Instant::now() >= deadline {
                break;
            }
            let mut all_dead = true;
            for run_id in &remaining {
                if self.driver.is_alive(run_id).await {
                    all_dead = false;
                }
            }
            if all_dead {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let mut inner = self.inner.lock();
        let survivors: Vec<RunId> = lanes
            .iter()
            .filter_map(|l| inner.active.remove(l).map(|r| r.run_id))
            .collect();
        drop(inner);
        for run_id in survivors {
            if let Err(e) = self.driver.kill(&run_id).await {
                tracing::warn!(run_id = %run_id, error = %e, "shutdown: force-kill failed");
            }
        }
    }
}
