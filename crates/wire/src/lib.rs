// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC protocol for daemon communication.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod request;
mod response;
mod types;
mod wire;

pub use request::Request;
pub use response::Response;
pub use types::{HealthSummary, ProcessEntry, StepEntry, WorkflowStatusEntry};
pub use wire::{decode, encode, read_message, write_message, ProtocolError};
pub use wire::{read_request, write_response};

/// Bumped on breaking protocol changes; checked in the Hello handshake.
pub const PROTOCOL_VERSION: u32 = 1;
