// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clier_core::ProcessConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Request from CLI to daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    /// Health check ping
    Ping,

    /// Version handshake
    Hello { version: u32 },

    /// Get daemon status
    Status,

    /// Extended status with memory usage and sub-checks
    Health,

    /// List managed processes
    ProcessList,

    /// Stop a process (SIGTERM, then SIGKILL; `force` skips straight to SIGKILL)
    ProcessStop {
        name: String,
        #[serde(default)]
        force: bool,
    },

    /// Restart a process
    ProcessRestart {
        name: String,
        #[serde(default)]
        force: bool,
    },

    /// Register and start an ad-hoc process
    ProcessAdd { config: ProcessConfig },

    /// Stop and remove a process
    ProcessDelete { name: String },

    /// Query buffered logs. `lines` (default 100) and `since_ms` are
    /// mutually exclusive; `since_ms` wins when both are present.
    LogsQuery {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lines: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        since_ms: Option<u64>,
    },

    /// Clear buffered logs; no name clears every process.
    LogsClear {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// Query recent events.
    EventsQuery {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        process_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lines: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        since_ms: Option<u64>,
    },

    /// Reload the flattened config from disk.
    ConfigReload { config_path: PathBuf },

    /// Start a workflow (non-blocking; poll WorkflowStatus for progress).
    WorkflowStart { name: String },

    /// Cancel an active workflow run.
    WorkflowCancel { name: String },

    /// List workflow names.
    WorkflowList,

    /// Status of one workflow, or all of them.
    WorkflowStatus {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// Authoring-time stage grouping.
    StagesMap,

    /// Request daemon shutdown
    Shutdown,
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
