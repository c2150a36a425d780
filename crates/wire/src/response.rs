// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{HealthSummary, ProcessEntry, WorkflowStatusEntry};
use clier_core::{Event, LogEntry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Response from daemon to CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Response {
    /// Generic success
    Ok,

    /// Health check response
    Pong,

    /// Version handshake response
    Hello { version: u32 },

    /// Daemon is shutting down
    ShuttingDown,

    /// Daemon status
    Status {
        pid: u32,
        uptime_ms: u64,
        process_count: usize,
        config_path: PathBuf,
    },

    /// Extended health report
    Health { health: HealthSummary },

    /// Managed processes
    Processes { processes: Vec<ProcessEntry> },

    /// Buffered log entries
    Logs { entries: Vec<LogEntry> },

    /// Cleared log names
    Cleared { cleared: Vec<String> },

    /// Recent events
    Events { events: Vec<Event> },

    /// Workflow names
    Workflows { names: Vec<String> },

    /// Status of one workflow run
    Workflow {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workflow: Option<Box<WorkflowStatusEntry>>,
    },

    /// Status of every workflow run
    WorkflowStatuses { workflows: Vec<WorkflowStatusEntry> },

    /// Stage grouping from the authored config
    Stages { stages: HashMap<String, Vec<String>> },

    /// Error response
    Error { message: String },
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;
