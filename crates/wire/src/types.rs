// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Summary shapes the daemon reports over IPC.

use clier_core::{ProcessKind, ProcessStatus};
use serde::{Deserialize, Serialize};

/// One managed process, as reported by `process.list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProcessKind,
    pub status: ProcessStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    pub restarts: u32,
}

/// One step of a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepEntry {
    pub action: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Latest run of one workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStatusEntry {
    pub name: String,
    pub status: String,
    pub current_step: usize,
    pub steps: Vec<StepEntry>,
    pub started_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
}

/// Extended `daemon.health` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSummary {
    pub pid: u32,
    pub uptime_ms: u64,
    pub process_count: usize,
    pub memory_rss_bytes: u64,
    pub process_manager: bool,
    pub event_handler: bool,
    pub orchestrator: bool,
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
