// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Directory watcher: polls each lane's `messages/`/`tasks/` folders under
//! the IPC root, parses whatever envelopes it finds, and hands them to an
//! injected `IpcHandler`. Grounded on the teacher's `adapters::notify::bus`
//! dual-mode design (native `notify` events with a polling fallback) and on
//! `daemon::listener::mutations`'s "parse file, call handler, delete or
//! move to errors/" shape — generalized from beads mutation commands to
//! lane message/task envelopes.

use crate::envelope::{parse_message_envelope, parse_task_envelope};
use crate::error::HandlerError;
use async_trait::async_trait;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Handles envelopes the watcher has already read off disk. Implemented by
/// the daemon crate, which owns the persistence/channel lookups this
/// crate is deliberately kept free of.
#[async_trait]
pub trait IpcHandler: Send + Sync {
    async fn handle_message(&self, lane_folder: &str, body: &str) -> Result<(), HandlerError>;
    async fn handle_task(&self, lane_folder: &str, body: &str) -> Result<(), HandlerError>;
}

/// One pass over every lane directory under `root`, processing any files
/// found in `messages/` and `tasks/`. Each file is deleted on success, or
/// moved to `<root>/<lane>/errors/<source-lane-prefix>-<name>` on failure —
/// the watcher itself never retries a failed envelope.
pub async fn scan_once(root: &Path, handler: &dyn IpcHandler) -> std::io::Result<()> {
    let mut lane_dirs = tokio::fs::read_dir(root).await?;
    while let Some(lane_entry) = lane_dirs.next_entry().await? {
        if !lane_entry.file_type().await?.is_dir() {
            continue;
        }
        let lane_folder = lane_entry.file_name().to_string_lossy().to_string();
        let lane_path = lane_entry.path();

        process_subdir(&lane_path, &lane_folder, "messages", handler, Kind::Message).await?;
        process_subdir(&lane_path, &lane_folder, "tasks", handler, Kind::Task).await?;
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum Kind {
    Message,
    Task,
}

async fn process_subdir(
    lane_path: &Path,
    lane_folder: &str,
    subdir: &str,
    handler: &dyn IpcHandler,
    kind: Kind,
) -> std::io::Result<()> {
    let dir = lane_path.join(subdir);
    let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
        return Ok(());
    };
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        let body = match tokio::fs::read_to_string(&path).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read envelope file");
                continue;
            }
        };

        let result = match kind {
            Kind::Message => match parse_message_envelope(&body) {
                Ok(_) => handler.handle_message(lane_folder, &body).await,
                Err(e) => Err(HandlerError::Invalid(e.to_string())),
            },
            Kind::Task => match parse_task_envelope(&body) {
                Ok(_) => handler.handle_task(lane_folder, &body).await,
                Err(e) => Err(HandlerError::Invalid(e.to_string())),
            },
        };

        match result {
            Ok(()) => {
                tokio::fs::remove_file(&path).await?;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "envelope handling failed");
                move_to_errors(lane_path, lane_folder, &path).await?;
            }
        }
    }
    Ok(())
}

async fn move_to_errors(lane_path: &Path, lane_folder: &str, path: &Path) -> std::io::Result<()> {
    let errors_dir = lane_path.join("errors");
    tokio::fs::create_dir_all(&errors_dir).await?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "envelope".to_string());
    let dest = errors_dir.join(format!("{lane_folder}-{file_name}"));
    tokio::fs::rename(path, dest).await
}

/// Poll `root` every `interval` until cancelled, calling `scan_once` each
/// tick. `notify`-driven push wakeups are left to the daemon crate, which
/// owns the event loop select(); this is the polling-fallback half of the
/// teacher's dual-mode design.
pub async fn poll_loop(
    root: PathBuf,
    handler: std::sync::Arc<dyn IpcHandler>,
    interval: Duration,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = scan_once(&root, handler.as_ref()).await {
                    tracing::warn!(error = %e, "ipc scan failed");
                }
            }
            _ = &mut shutdown => {
                tracing::info!("ipc poll loop shutting down");
                return;
            }
        }
    }
}

/// Watch `root` for filesystem changes using the platform-native backend
/// (push mode), sending a wakeup on every event. The returned
/// `RecommendedWatcher` must be kept alive for as long as pushes are
/// wanted; `poll_loop`'s interval tick remains the fallback for backends
/// (or filesystems) where native events are unreliable, matching the
/// teacher's `notify::bus` dual-mode design.
pub fn watch_for_changes(
    root: &Path,
) -> notify::Result<(RecommendedWatcher, tokio::sync::mpsc::UnboundedReceiver<()>)> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if res.is_ok() {
                let _ = tx.send(());
            }
        },
        notify::Config::default(),
    )?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok((watcher, rx))
}
