// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lane registration (`RegisteredGroup` in the spec's vocabulary).

use crate::ids::LaneId;
use serde::{Deserialize, Serialize};

/// Folder names are used to build on-disk paths (state snapshots, IPC
/// mailboxes, container mounts) so they're restricted to a safe shape:
/// lowercase alphanumerics, `-`, and `_`, starting with an alphanumeric.
pub fn is_safe_folder_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 64 {
        return false;
    }
    let mut chars = name.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    first_ok
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Per-lane container configuration overrides. Left intentionally thin —
/// the container runtime's own config surface is out of scope (spec.md §1).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaneContainerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub env: std::collections::BTreeMap<String, String>,
}

/// A registered execution lane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lane {
    pub id: LaneId,
    pub folder_name: String,
    pub display_name: String,
    pub trigger_pattern: String,
    #[serde(default)]
    pub container_config: Option<LaneContainerConfig>,
    /// `false` only for the main lane: it processes every message regardless
    /// of trigger match.
    #[serde(default = "default_requires_trigger")]
    pub requires_trigger: bool,
}

fn default_requires_trigger() -> bool {
    true
}

/// Lane kind, derived from folder-name convention, used by the
/// authorization table (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneKind {
    Main,
    Planner,
    Worker,
    Other,
}

/// Folder-name prefix that marks a lane as a worker lane.
pub const WORKER_FOLDER_PREFIX: &str = "jarvis-worker-";
/// Folder name of the single planner lane.
pub const PLANNER_FOLDER_NAME: &str = "andy-developer";
/// Folder name of the main lane.
pub const MAIN_FOLDER_NAME: &str = "main";

impl Lane {
    pub fn kind(&self) -> LaneKind {
        if self.folder_name == MAIN_FOLDER_NAME {
            LaneKind::Main
        } else if self.folder_name == PLANNER_FOLDER_NAME {
            LaneKind::Planner
        } else if self.folder_name.starts_with(WORKER_FOLDER_PREFIX) {
            LaneKind::Worker
        } else {
            LaneKind::Other
        }
    }

    pub fn is_worker(&self) -> bool {
        matches!(self.kind(), LaneKind::Worker)
    }
}
