// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment contract between the CLI and the daemon entrypoint.

use std::path::PathBuf;

/// Set to `1` when the entrypoint was forked as the detached daemon.
pub const DAEMON_MODE: &str = "CLIER_DAEMON_MODE";

/// Path to the validated, flattened config file. Mandatory in daemon mode.
pub const CONFIG_PATH: &str = "CLIER_CONFIG_PATH";

/// Project root the daemon serves. Mandatory in daemon mode.
pub const PROJECT_ROOT: &str = "CLIER_PROJECT_ROOT";

/// Whether this process was launched as the daemon.
pub fn daemon_mode() -> bool {
    std::env::var(DAEMON_MODE).map(|v| v == "1").unwrap_or(false)
}

/// A mandatory path variable, or a readable error naming it.
pub fn required_path(name: &str) -> Result<PathBuf, String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(PathBuf::from(value)),
        _ => Err(format!("{name} must be set in daemon mode")),
    }
}
