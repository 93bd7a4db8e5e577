// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Errors a handler can return from processing a single IPC envelope. The
/// watcher turns any `Err` into an `errors/`-directory move rather than
/// propagating it — one bad envelope must never stop the poll loop.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("authorization denied: {0}")]
    Denied(String),
    #[error("invalid envelope: {0}")]
    Invalid(String),
    #[error("internal error: {0}")]
    Internal(String),
}
