// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level wiring: builds every component leaves-first and connects
//! the event paths.
//!
//! Raw stream events feed the log buffer and pattern router; derived and
//! custom events reach the orchestrator through the safety chain
//! (debounce → rate limit → circuit breaker) and the workflow engine in
//! parallel, unguarded. The supervisor is the only layer that catches
//! and logs instead of propagating — and only for events, not for
//! caller-initiated operations.

use crate::breaker::{BreakerNotice, BreakerState, CircuitBreaker};
use crate::bus::{EventBus, EventFilter, Subscription};
use crate::debounce::Debouncer;
use crate::log_buffer::{FileSinkConfig, LogBuffer, LogBufferConfig};
use crate::manager::{ProcessControl, ProcessError, ProcessInfo, ProcessManager, ShutdownReport};
use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::rate_limit::{RateLimitError, RateLimiter};
use crate::router::PatternRouter;
use crate::workflow::{WorkflowEngine, WorkflowError, WorkflowStatus};
use clier_core::{
    Clock, Config, ConfigError, Event, LogEntry, LogStream, PatternError, ProcessConfig,
    SystemClock,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Shutdown budget for the process tree, in milliseconds.
const SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

/// Sub-checks reported by `daemon.health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthChecks {
    pub process_manager: bool,
    pub event_handler: bool,
    pub orchestrator: bool,
}

/// Construction knobs that are not part of the user config.
#[derive(Debug, Clone, Default)]
pub struct SupervisorOptions {
    /// Spawn children without their own process group (test isolation).
    pub test_mode: bool,
    /// Enable the rotating file sink under this directory.
    pub log_dir: Option<PathBuf>,
    /// Override the per-process ring capacity.
    pub log_capacity: Option<usize>,
}

/// The assembled daemon core.
pub struct Supervisor<C: Clock> {
    clock: C,
    config: Mutex<Config>,
    bus: Arc<EventBus>,
    manager: Arc<ProcessManager<C>>,
    logs: Arc<LogBuffer>,
    router: Arc<PatternRouter>,
    orchestrator: Arc<Orchestrator>,
    workflows: Arc<WorkflowEngine<C>>,
    debouncer: Arc<Debouncer>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker<C>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// The production instantiation.
pub type DaemonSupervisor = Supervisor<SystemClock>;

impl<C: Clock> Supervisor<C> {
    /// Build all components. Must run inside a tokio runtime (the bus
    /// pump and log sink spawn tasks).
    pub fn build(
        config: Config,
        options: SupervisorOptions,
        clock: C,
    ) -> Result<Arc<Self>, SupervisorError> {
        config.check_unique_names()?;

        let limiter = Arc::new(RateLimiter::new(config.safety.max_ops_per_minute)?);
        let debouncer = Arc::new(Debouncer::new(config.safety.debounce_ms));
        let breaker = Arc::new(CircuitBreaker::new(
            config.safety.circuit_breaker.clone().unwrap_or_default(),
            clock.clone(),
        ));

        let logs = Arc::new(LogBuffer::new(LogBufferConfig {
            capacity: options.log_capacity,
            sink: options.log_dir.clone().map(FileSinkConfig::new),
        }));

        let (manager, signal_rx) = ProcessManager::new(clock.clone(), options.test_mode);
        let manager = Arc::new(manager);
        let bus = Arc::new(EventBus::new());
        bus.connect(signal_rx);

        let router = Arc::new(PatternRouter::new());
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&manager) as Arc<dyn ProcessControl>,
            &config.project_name,
            config.global_env,
        ));
        let workflows = Arc::new(WorkflowEngine::new(
            Arc::clone(&bus),
            Arc::clone(&orchestrator),
            Arc::clone(&manager) as Arc<dyn ProcessControl>,
            clock.clone(),
        ));

        let supervisor = Arc::new(Self {
            clock,
            config: Mutex::new(config),
            bus,
            manager,
            logs,
            router,
            orchestrator,
            workflows,
            debouncer,
            limiter,
            breaker,
            subscriptions: Mutex::new(Vec::new()),
        });
        supervisor.wire();
        Ok(supervisor)
    }

    /// Load the pipeline and workflows, then start every entry point.
    /// Cycle detection failures surface here and are fatal.
    pub fn start(&self) -> Result<(), SupervisorError> {
        let config = self.config.lock().clone();
        self.router.load(&config.pipeline)?;
        self.orchestrator.load_pipeline(config.pipeline.clone())?;
        self.workflows.load_workflows(config.workflows.clone());
        self.orchestrator.start()?;
        Ok(())
    }

    /// Swap in a new validated config. Definitions are replaced; already
    /// running processes are left alone, and new entry points start on
    /// the next `start`.
    pub fn reload(&self, config: Config) -> Result<(), SupervisorError> {
        config.check_unique_names()?;
        self.router.load(&config.pipeline)?;
        self.orchestrator.load_pipeline(config.pipeline.clone())?;
        self.workflows.load_workflows(config.workflows.clone());
        *self.config.lock() = config;
        Ok(())
    }

    /// Orderly teardown: disarm timers, stop intake, stop children,
    /// flush logs.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.debouncer.cancel_all();
        self.limiter.stop(true);
        self.breaker.shutdown();
        self.workflows.shutdown();
        self.bus.disconnect();
        self.bus.remove_all_listeners();
        let report = self.manager.shutdown(SHUTDOWN_TIMEOUT_MS, &[]).await;
        self.logs.flush().await;
        report
    }

    fn wire(self: &Arc<Self>) {
        let mut subs = self.subscriptions.lock();

        // Raw stdout/stderr: ring buffer + pattern matching.
        for (filter, stream) in [
            (EventFilter::Stdout, LogStream::Stdout),
            (EventFilter::Stderr, LogStream::Stderr),
        ] {
            let weak = Arc::downgrade(self);
            subs.push(self.bus.on(filter, move |event| {
                if let Some(supervisor) = weak.upgrade() {
                    supervisor.on_stream_event(event, stream);
                }
            }));
        }

        // Exit events: built-in crash/success/failure mapping.
        {
            let weak = Arc::downgrade(self);
            subs.push(self.bus.on(
                EventFilter::Name("process:exit".to_string()),
                move |event| {
                    if let Some(supervisor) = weak.upgrade() {
                        supervisor.reemit(supervisor.router.route(event));
                    }
                },
            ));
        }

        // Everything non-raw: workflows in parallel, orchestrator through
        // the safety chain.
        {
            let weak = Arc::downgrade(self);
            subs.push(self.bus.on(EventFilter::Any, move |event| {
                if let Some(supervisor) = weak.upgrade() {
                    supervisor.on_routed_event(event);
                }
            }));
        }

        // Breaker opening is user-visible as a system event.
        {
            let weak = Arc::downgrade(self);
            self.breaker.on_notice(move |notice| {
                if notice != BreakerNotice::Opened {
                    return;
                }
                if let Some(supervisor) = weak.upgrade() {
                    tracing::warn!("circuit breaker opened; orchestrator events are dropped");
                    let event = Event::custom(
                        "circuit-breaker:triggered",
                        "system",
                        None,
                        supervisor.clock.epoch_ms(),
                    );
                    supervisor.bus.emit(&event);
                }
            });
        }
    }

    fn on_stream_event(&self, event: &Event, stream: LogStream) {
        if let Some(line) = event.line() {
            self.logs
                .add(&event.process_name, stream, line, event.timestamp_ms);
        }
        self.reemit(self.router.route(event));
    }

    fn reemit(&self, events: Vec<Event>) {
        for event in events {
            self.bus.emit(&event);
        }
    }

    fn on_routed_event(self: &Arc<Self>, event: &Event) {
        if event.is_raw_stream() {
            return;
        }
        if event.name == "process:start" {
            self.logs.add(
                &event.process_name,
                LogStream::Command,
                "process started",
                event.timestamp_ms,
            );
        }

        // Workflows see every event directly, outside the guards.
        self.workflows.handle_event(event);

        let key = format!("{}:{}", event.process_name, event.name);
        let limiter = Arc::clone(&self.limiter);
        let breaker = Arc::clone(&self.breaker);
        let orchestrator = Arc::clone(&self.orchestrator);
        let event = event.clone();
        self.debouncer.debounce(&key, move || {
            tokio::spawn(async move {
                let result = limiter
                    .schedule(|| breaker.call(|| async { orchestrator.handle_event(&event) }))
                    .await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(crate::BreakerError::Open)) => {
                        tracing::warn!(event = %event.name, "event dropped: circuit open");
                    }
                    Ok(Err(e)) => {
                        tracing::error!(event = %event.name, error = %e, "orchestration failed");
                    }
                    Err(e) => {
                        tracing::warn!(event = %event.name, error = %e, "event dropped: {e}");
                    }
                }
            });
        });
    }

    // -- query surface for the IPC listener --

    pub fn project_name(&self) -> String {
        self.config.lock().project_name.clone()
    }

    pub fn process_count(&self) -> usize {
        self.manager.list_processes().len()
    }

    pub fn health(&self) -> HealthChecks {
        HealthChecks {
            process_manager: true,
            event_handler: self.breaker.state() != BreakerState::Open
                && !self.limiter.is_stopped(),
            orchestrator: !self.orchestrator.item_names().is_empty(),
        }
    }

    pub fn list_processes(&self) -> Vec<ProcessInfo> {
        self.manager.list_processes()
    }

    pub fn process_add(&self, cfg: ProcessConfig) -> Result<(), SupervisorError> {
        self.manager.start_process(cfg)?;
        Ok(())
    }

    pub async fn process_stop(&self, name: &str, force: bool) -> Result<(), SupervisorError> {
        self.manager.stop_process(name, force, None).await?;
        Ok(())
    }

    pub async fn process_restart(&self, name: &str, force: bool) -> Result<(), SupervisorError> {
        self.manager.restart_process(name, force).await?;
        Ok(())
    }

    pub async fn process_delete(&self, name: &str) -> Result<(), SupervisorError> {
        self.manager.delete_process(name).await?;
        Ok(())
    }

    pub fn logs_query(
        &self,
        name: &str,
        lines: Option<usize>,
        since_ms: Option<u64>,
    ) -> Vec<LogEntry> {
        match since_ms {
            Some(since) => self.logs.get_since(name, since),
            None => self.logs.get_last_n(name, lines.unwrap_or(100)),
        }
    }

    /// Clear rings and delete the files for one process, or all of them.
    pub fn logs_clear(&self, name: Option<&str>) -> Vec<String> {
        let cleared = self.logs.clear(name);
        self.logs.delete_files(name);
        cleared
    }

    pub fn events_query(
        &self,
        process_name: Option<&str>,
        event_type: Option<&str>,
        name: Option<&str>,
        since_ms: Option<u64>,
        lines: Option<usize>,
    ) -> Vec<Event> {
        self.bus.recent(process_name, event_type, name, since_ms, lines)
    }

    pub fn workflow_start(self: &Arc<Self>, name: &str) -> Result<(), SupervisorError> {
        self.workflows.trigger_workflow(name, None)?;
        Ok(())
    }

    pub fn workflow_cancel(&self, name: &str) -> Result<(), SupervisorError> {
        self.workflows.cancel_workflow(name)?;
        Ok(())
    }

    pub fn workflow_names(&self) -> Vec<String> {
        self.workflows.names()
    }

    pub fn workflow_status(&self, name: &str) -> Option<WorkflowStatus> {
        self.workflows.status(name)
    }

    pub fn workflow_statuses(&self) -> Vec<WorkflowStatus> {
        self.workflows.statuses()
    }

    pub fn stages_map(&self) -> HashMap<String, Vec<String>> {
        self.config.lock().stages.clone()
    }

    pub fn running_processes(&self) -> Vec<String> {
        self.manager.running_names()
    }

    // -- component access (tests and the listener) --

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn workflows(&self) -> &Arc<WorkflowEngine<C>> {
        &self.workflows
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
