// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use lanectl_adapters::ContainerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("lane {0} has no active container")]
    NoActiveContainer(String),
    #[error(transparent)]
    Container(#[from] ContainerError),
}
