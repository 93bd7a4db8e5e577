// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the adapters crate.

use std::time::Duration;

fn parse_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// IPC directory watcher fallback poll interval (default: 5000ms), used
/// when the `notify` crate's native file events aren't available.
pub fn ipc_poll_ms() -> Duration {
    parse_duration_ms("LANECTL_IPC_POLL_MS").unwrap_or(Duration::from_secs(5))
}

/// Container readiness poll interval after `docker run` (default: 100ms).
pub fn container_ready_poll_ms() -> Duration {
    parse_duration_ms("LANECTL_CONTAINER_READY_POLL_MS").unwrap_or(Duration::from_millis(100))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_unset() {
        std::env::remove_var("LANECTL_IPC_POLL_MS");
        std::env::remove_var("LANECTL_CONTAINER_READY_POLL_MS");
        assert_eq!(ipc_poll_ms(), Duration::from_secs(5));
        assert_eq!(container_ready_poll_ms(), Duration::from_millis(100));
    }
}
