// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log entry types shared between the engine's buffer and the IPC surface.

use serde::{Deserialize, Serialize};

/// Which stream a buffered log entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
    /// Lifecycle notices (spawn, stop, restart) recorded alongside output.
    Command,
}

impl LogStream {
    /// Three-letter tag used in on-disk log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            LogStream::Stdout => "OUT",
            LogStream::Stderr => "ERR",
            LogStream::Command => "CMD",
        }
    }
}

/// One captured line for a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp_ms: u64,
    pub stream: LogStream,
    pub data: String,
}

/// Replace any character outside `[A-Za-z0-9._-]` so process names are
/// safe as file names.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
#[path = "log_entry_tests.rs"]
mod tests;
