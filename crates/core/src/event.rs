// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The normalized event every component speaks.
//!
//! Raw process signals (spawn, stream lines, exit) are translated into this
//! shape by the event bus; pattern matches, workflow emits, and system
//! notices re-enter the bus already in it.

use serde::{Deserialize, Serialize};

/// Classification of a normalized event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Stdout,
    Stderr,
    Success,
    Error,
    Crashed,
    Custom,
}

/// A normalized event on the bus.
///
/// `name` is what subscribers match on. For raw stream events the name is
/// the process name itself; everything else carries a `domain:verb`-style
/// name (`db:ready`, `process:exit`, `deploy:completed`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    /// The process (or `"workflow"` / `"system"`) the event originated from.
    pub process_name: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp_ms: u64,
}

impl Event {
    /// A raw stdout line from a process.
    pub fn stdout(process: &str, line: &str, timestamp_ms: u64) -> Self {
        Self {
            name: process.to_string(),
            process_name: process.to_string(),
            kind: EventKind::Stdout,
            data: Some(serde_json::Value::String(line.to_string())),
            timestamp_ms,
        }
    }

    /// A raw stderr line from a process.
    pub fn stderr(process: &str, line: &str, timestamp_ms: u64) -> Self {
        Self {
            name: process.to_string(),
            process_name: process.to_string(),
            kind: EventKind::Stderr,
            data: Some(serde_json::Value::String(line.to_string())),
            timestamp_ms,
        }
    }

    /// `process:start` with the child's pid.
    pub fn process_start(process: &str, pid: u32, timestamp_ms: u64) -> Self {
        Self {
            name: "process:start".to_string(),
            process_name: process.to_string(),
            kind: EventKind::Custom,
            data: Some(serde_json::json!({ "pid": pid })),
            timestamp_ms,
        }
    }

    /// `process:exit` with the full captured output.
    pub fn process_exit(
        process: &str,
        code: Option<i32>,
        signal: Option<i32>,
        stdout: Vec<String>,
        stderr: Vec<String>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            name: "process:exit".to_string(),
            process_name: process.to_string(),
            kind: EventKind::Custom,
            data: Some(serde_json::json!({
                "code": code,
                "signal": signal,
                "stdout": stdout,
                "stderr": stderr,
            })),
            timestamp_ms,
        }
    }

    /// `process:restart` with the attempt number.
    pub fn process_restart(process: &str, attempt: u32, timestamp_ms: u64) -> Self {
        Self {
            name: "process:restart".to_string(),
            process_name: process.to_string(),
            kind: EventKind::Custom,
            data: Some(serde_json::json!({ "attempt": attempt })),
            timestamp_ms,
        }
    }

    /// `process:error` for spawn failures and exhausted restarts.
    pub fn process_error(process: &str, message: &str, timestamp_ms: u64) -> Self {
        Self {
            name: "process:error".to_string(),
            process_name: process.to_string(),
            kind: EventKind::Error,
            data: Some(serde_json::json!({ "message": message })),
            timestamp_ms,
        }
    }

    /// An arbitrary named event.
    pub fn custom(
        name: impl Into<String>,
        process: impl Into<String>,
        data: Option<serde_json::Value>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            name: name.into(),
            process_name: process.into(),
            kind: EventKind::Custom,
            data,
            timestamp_ms,
        }
    }

    /// Whether this is a raw stream event (stdout/stderr line).
    pub fn is_raw_stream(&self) -> bool {
        matches!(self.kind, EventKind::Stdout | EventKind::Stderr)
    }

    /// The stream line carried by a raw stream event.
    pub fn line(&self) -> Option<&str> {
        if !self.is_raw_stream() {
            return None;
        }
        self.data.as_ref().and_then(|d| d.as_str())
    }

    /// The kind serialized as its wire string (`stdout`, `custom`, ...).
    pub fn kind_str(&self) -> &'static str {
        match self.kind {
            EventKind::Stdout => "stdout",
            EventKind::Stderr => "stderr",
            EventKind::Success => "success",
            EventKind::Error => "error",
            EventKind::Crashed => "crashed",
            EventKind::Custom => "custom",
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
