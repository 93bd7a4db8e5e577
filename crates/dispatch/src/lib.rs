// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! lanectl-dispatch: parsing and structural validation of the dispatch and
//! completion JSON contracts. Deliberately stateless — session-routing
//! validity (does a reused `session_id` actually belong to a reachable
//! worker lane) requires a persistence lookup the caller must supply.

mod envelope;
mod routing;

pub use envelope::{extract_json_block, parse_completion, parse_dispatch, DispatchParseError};
pub use routing::{validate_session_routing, RoutingError};
