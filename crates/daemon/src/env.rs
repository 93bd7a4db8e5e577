// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleError;

/// Resolve state directory: LANECTL_STATE_DIR > XDG_STATE_HOME/lanectl > ~/.local/state/lanectl
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("LANECTL_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("lanectl"));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/lanectl"))
}

/// Timer check interval override.
pub fn timer_check_ms() -> Option<Duration> {
    std::env::var("LANECTL_TIMER_CHECK_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Override for the operator-configurable cross-lane concurrency cap
/// (spec.md §4.4/§4.6); falls back to `Config::DEFAULT_MAX_CONCURRENT_CONTAINERS`.
pub fn max_concurrent_containers() -> Option<usize> {
    std::env::var("LANECTL_MAX_CONCURRENT_CONTAINERS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
}

/// How often the poll-loop fallback rescans the IPC root when native
/// filesystem events aren't relied upon exclusively.
pub fn ipc_scan_interval() -> Duration {
    std::env::var("LANECTL_IPC_SCAN_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_secs(5))
}
