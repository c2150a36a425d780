// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, shutdown, state persistence.

use clier_core::Config;
use clier_engine::{DaemonSupervisor, SupervisorError, SupervisorOptions};
use fs2::FileExt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::UnixListener;
use tracing::{info, warn};

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// On-disk layout under the project's `.clier/` directory.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Project root the daemon serves (also the default cwd of children).
    pub project_root: PathBuf,
    /// State directory: `<root>/.clier`
    pub clier_dir: PathBuf,
    /// IPC socket file
    pub socket_path: PathBuf,
    /// Decimal PID of the running daemon; removed on clean shutdown
    pub pid_path: PathBuf,
    /// Last-known running-process snapshot
    pub state_path: PathBuf,
    /// Per-process rotated log files
    pub logs_dir: PathBuf,
    /// The daemon's own tracing output
    pub daemon_log_path: PathBuf,
}

impl Paths {
    pub fn for_project(root: &Path) -> Self {
        let clier_dir = root.join(".clier");
        Self {
            project_root: root.to_path_buf(),
            socket_path: clier_dir.join("daemon.sock"),
            pid_path: clier_dir.join("daemon.pid"),
            state_path: clier_dir.join("daemon-state.json"),
            logs_dir: clier_dir.join("logs"),
            daemon_log_path: clier_dir.join("daemon.log"),
            clier_dir,
        }
    }
}

/// Live daemon state handed to the listener and the shutdown path.
pub struct DaemonState {
    pub paths: Paths,
    // NOTE(lifetime): held to maintain the exclusive pid-file lock;
    // released on drop.
    #[allow(dead_code)]
    lock_file: File,
    pub supervisor: Arc<DaemonSupervisor>,
    pub start_time: Instant,
    pub config_path: PathBuf,
}

impl std::fmt::Debug for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonState")
            .field("paths", &self.paths)
            .field("config_path", &self.config_path)
            .finish_non_exhaustive()
    }
}

/// Start the daemon: lock, build, bind, load.
pub async fn startup(
    paths: Paths,
    config: Config,
    config_path: PathBuf,
) -> Result<(DaemonState, UnixListener), LifecycleError> {
    match startup_inner(paths.clone(), config, config_path).await {
        Ok(result) => Ok(result),
        Err(e) => {
            // Lock failure means the files belong to the running daemon;
            // everything else is ours to clean up.
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(&paths);
            }
            Err(e)
        }
    }
}

async fn startup_inner(
    paths: Paths,
    config: Config,
    config_path: PathBuf,
) -> Result<(DaemonState, UnixListener), LifecycleError> {
    std::fs::create_dir_all(&paths.clier_dir)?;
    std::fs::create_dir_all(&paths.logs_dir)?;

    // Acquire the pid-file lock first; prevents double daemons. Open
    // without truncating so a losing race does not wipe the winner's pid.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&paths.pid_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    let supervisor = DaemonSupervisor::build(
        config,
        SupervisorOptions {
            test_mode: false,
            log_dir: Some(paths.logs_dir.clone()),
            log_capacity: None,
        },
        clier_core::SystemClock,
    )?;

    // Remove a stale socket and bind last, after everything else passed.
    if paths.socket_path.exists() {
        std::fs::remove_file(&paths.socket_path)?;
    }
    let listener = UnixListener::bind(&paths.socket_path)
        .map_err(|e| LifecycleError::BindFailed(paths.socket_path.clone(), e))?;

    // Cycle detection happens here; a bad pipeline is fatal at startup.
    supervisor.start()?;

    let state = DaemonState {
        paths,
        lock_file,
        supervisor,
        start_time: Instant::now(),
        config_path,
    };
    state.save_state();
    info!("Daemon started");
    Ok((state, listener))
}

impl DaemonState {
    /// Write `daemon-state.json` with the currently running processes.
    pub fn save_state(&self) {
        let state = serde_json::json!({
            "pid": std::process::id(),
            "running_processes": self.supervisor.running_processes(),
            "saved_at": std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        });
        if let Err(e) = std::fs::write(
            &self.paths.state_path,
            serde_json::to_vec_pretty(&state).unwrap_or_default(),
        ) {
            warn!("Failed to save daemon state: {}", e);
        }
    }

    /// Resident set size of this process, in bytes (0 when unavailable).
    pub fn memory_rss_bytes(&self) -> u64 {
        read_rss_bytes().unwrap_or(0)
    }
}

/// Shutdown the daemon gracefully: stop the supervisor tree, persist the
/// final state, release the socket and pid files.
pub async fn shutdown(state: &DaemonState) {
    info!("Shutting down daemon...");

    let report = state.supervisor.shutdown().await;
    if !report.failed.is_empty() {
        warn!(failed = ?report.failed, "some processes failed to stop");
    }
    state.save_state();

    if state.paths.socket_path.exists() {
        if let Err(e) = std::fs::remove_file(&state.paths.socket_path) {
            warn!("Failed to remove socket file: {}", e);
        }
    }
    if state.paths.pid_path.exists() {
        if let Err(e) = std::fs::remove_file(&state.paths.pid_path) {
            warn!("Failed to remove PID file: {}", e);
        }
    }
    // The pid-file lock itself releases when `state.lock_file` drops.

    info!("Daemon shutdown complete");
}

fn cleanup_on_failure(paths: &Paths) {
    if paths.socket_path.exists() {
        let _ = std::fs::remove_file(&paths.socket_path);
    }
    if paths.pid_path.exists() {
        let _ = std::fs::remove_file(&paths.pid_path);
    }
}

#[cfg(target_os = "linux")]
fn read_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * 4096)
}

#[cfg(not(target_os = "linux"))]
fn read_rss_bytes() -> Option<u64> {
    None
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
