// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry of managed processes, keyed by name.
//!
//! The manager owns the only mutable handle to the registry; everything
//! else reads through its API or the aggregated signal stream.

use crate::process::{ProcessInner, ProcessSignal};
use async_trait::async_trait;
use clier_core::{Clock, ProcessConfig, ProcessKind, ProcessStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("process already running: {0}")]
    AlreadyRunning(String),

    #[error("unknown process: {0}")]
    NotFound(String),
}

/// Read-only view of one registry entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub name: String,
    pub kind: ProcessKind,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub started_at_ms: Option<u64>,
    pub restarts: u32,
}

/// Result of an ordered shutdown; individual failures never abort it.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ShutdownReport {
    pub stopped: Vec<String>,
    pub failed: Vec<String>,
}

/// Start/stop/status surface consumed by the orchestrator and workflow
/// engine. Keeping them behind this trait breaks the ownership cycle:
/// only the supervisor holds the concrete manager.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    fn start_process(&self, cfg: ProcessConfig) -> Result<(), ProcessError>;
    async fn stop_process(
        &self,
        name: &str,
        force: bool,
        timeout_ms: Option<u64>,
    ) -> Result<(), ProcessError>;
    async fn restart_process(&self, name: &str, force: bool) -> Result<(), ProcessError>;
    fn process_status(&self, name: &str) -> Option<ProcessStatus>;
    fn is_running(&self, name: &str) -> bool;
}

/// Collection of [`ProcessInner`]s sharing one signal channel.
pub struct ProcessManager<C: Clock> {
    clock: C,
    test_mode: bool,
    signal_tx: mpsc::UnboundedSender<ProcessSignal>,
    procs: Mutex<HashMap<String, Arc<ProcessInner<C>>>>,
}

impl<C: Clock> ProcessManager<C> {
    /// Create a manager and the receiving end of its aggregated stream.
    pub fn new(clock: C, test_mode: bool) -> (Self, mpsc::UnboundedReceiver<ProcessSignal>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        (
            Self {
                clock,
                test_mode,
                signal_tx,
                procs: Mutex::new(HashMap::new()),
            },
            signal_rx,
        )
    }

    fn get(&self, name: &str) -> Result<Arc<ProcessInner<C>>, ProcessError> {
        self.procs
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| ProcessError::NotFound(name.to_string()))
    }

    /// Stop and remove a process. Unknown names are an error; stopped
    /// entries are removed silently.
    pub async fn delete_process(&self, name: &str) -> Result<(), ProcessError> {
        let proc = self.get(name)?;
        proc.stop(false, Duration::from_millis(proc.cfg.stop_timeout_ms))
            .await;
        self.procs.lock().remove(name);
        Ok(())
    }

    pub fn info(&self, name: &str) -> Option<ProcessInfo> {
        let proc = self.procs.lock().get(name).cloned()?;
        let (status, pid, started_at_ms, restarts) = proc.info();
        Some(ProcessInfo {
            name: proc.cfg.name.clone(),
            kind: proc.cfg.kind,
            status,
            pid,
            started_at_ms,
            restarts,
        })
    }

    /// Snapshot of every registry entry, sorted by name.
    pub fn list_processes(&self) -> Vec<ProcessInfo> {
        let procs: Vec<Arc<ProcessInner<C>>> = self.procs.lock().values().cloned().collect();
        let mut out: Vec<ProcessInfo> = procs
            .iter()
            .map(|p| {
                let (status, pid, started_at_ms, restarts) = p.info();
                ProcessInfo {
                    name: p.cfg.name.clone(),
                    kind: p.cfg.kind,
                    status,
                    pid,
                    started_at_ms,
                    restarts,
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Names of processes currently up (starting or running).
    pub fn running_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .procs
            .lock()
            .values()
            .filter(|p| p.is_running())
            .map(|p| p.cfg.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Stop everything: `stop_order` names first, sequentially, then the
    /// rest in parallel. Per-process failures are recorded, never raised.
    pub async fn shutdown(&self, timeout_ms: u64, stop_order: &[String]) -> ShutdownReport {
        let timeout = Duration::from_millis(timeout_ms);
        let mut report = ShutdownReport::default();

        for name in stop_order {
            let Ok(proc) = self.get(name) else {
                continue;
            };
            proc.stop(false, timeout).await;
            report.stopped.push(name.clone());
        }

        let remaining: Vec<Arc<ProcessInner<C>>> = {
            let procs = self.procs.lock();
            procs
                .values()
                .filter(|p| !stop_order.contains(&p.cfg.name))
                .cloned()
                .collect()
        };

        let mut set = JoinSet::new();
        for proc in remaining {
            set.spawn(async move {
                let name = proc.cfg.name.clone();
                proc.stop(false, timeout).await;
                name
            });
        }
        while let Some(result) = set.join_next().await {
            match result {
                Ok(name) => report.stopped.push(name),
                Err(e) => {
                    tracing::warn!(error = %e, "shutdown stop task failed");
                    report.failed.push(e.to_string());
                }
            }
        }

        report.stopped.sort();
        report
    }
}

#[async_trait]
impl<C: Clock> ProcessControl for ProcessManager<C> {
    /// Register and spawn. Rejects a running entry under the same name;
    /// a stopped entry is replaced with a fresh one.
    fn start_process(&self, cfg: ProcessConfig) -> Result<(), ProcessError> {
        let proc = {
            let mut procs = self.procs.lock();
            if let Some(existing) = procs.get(&cfg.name) {
                if existing.is_running() {
                    return Err(ProcessError::AlreadyRunning(cfg.name.clone()));
                }
            }
            let proc = Arc::new(ProcessInner::new(
                cfg,
                self.clock.clone(),
                self.test_mode,
                self.signal_tx.clone(),
            ));
            procs.insert(proc.cfg.name.clone(), Arc::clone(&proc));
            proc
        };
        proc.start()
    }

    async fn stop_process(
        &self,
        name: &str,
        force: bool,
        timeout_ms: Option<u64>,
    ) -> Result<(), ProcessError> {
        let proc = self.get(name)?;
        let timeout = Duration::from_millis(timeout_ms.unwrap_or(proc.cfg.stop_timeout_ms));
        proc.stop(force, timeout).await;
        Ok(())
    }

    async fn restart_process(&self, name: &str, force: bool) -> Result<(), ProcessError> {
        let proc = self.get(name)?;
        proc.restart(force).await
    }

    fn process_status(&self, name: &str) -> Option<ProcessStatus> {
        self.procs.lock().get(name).map(|p| p.status())
    }

    fn is_running(&self, name: &str) -> bool {
        self.procs
            .lock()
            .get(name)
            .is_some_and(|p| p.is_running())
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
