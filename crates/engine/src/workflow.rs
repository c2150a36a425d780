// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow engine: sequential step runner over the pipeline.
//!
//! Each run executes on its own task with a cancellation token and a
//! run-level deadline. Step outcomes are explicit values carried through
//! the loop; failure policies decide what a failed step does to the rest.

use crate::bus::EventBus;
use crate::manager::ProcessControl;
use crate::orchestrator::Orchestrator;
use clier_core::{
    AwaitStepSpec, Clock, Condition, Event, OnFailure, ProcessKind, ProcessStatus,
    ProcessStepSpec, StopStepSpec, WorkflowItem, WorkflowStep,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("unknown workflow: {0}")]
    Unknown(String),

    #[error("workflow already running: {0}")]
    AlreadyRunning(String),

    #[error("workflow not running: {0}")]
    NotRunning(String),
}

/// Terminal and in-flight run states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Running => "running",
            StepState::Completed => "completed",
            StepState::Failed => "failed",
            StepState::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub action: String,
    pub state: StepState,
    pub started_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
    pub error: Option<String>,
}

/// Queryable snapshot of one run (the latest per workflow name).
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStatus {
    pub name: String,
    pub state: RunState,
    pub current_step: usize,
    pub steps: Vec<StepRecord>,
    pub started_at_ms: u64,
    pub completed_at_ms: Option<u64>,
    pub error: Option<String>,
    pub triggered_by: Option<String>,
}

/// How one step ended; cancellation is a value, not an exception.
enum StepOutcome {
    Ok,
    Failed(String),
    Cancelled,
}

/// How the step loop ended.
enum RunOutcome {
    Completed,
    Failed(String),
    SkippedRest,
    Cancelled,
    TimedOut,
}

struct EngineState {
    defs: IndexMap<String, WorkflowItem>,
    /// Per triggered workflow: trigger events observed so far.
    received: HashMap<String, HashSet<String>>,
    /// Cancellation tokens of active runs; at most one per name.
    active: HashMap<String, CancellationToken>,
    statuses: HashMap<String, Arc<Mutex<WorkflowStatus>>>,
}

/// Holds workflow definitions and at most one active run per name.
pub struct WorkflowEngine<C: Clock> {
    bus: Arc<EventBus>,
    orchestrator: Arc<Orchestrator>,
    control: Arc<dyn ProcessControl>,
    clock: C,
    state: Mutex<EngineState>,
}

impl<C: Clock> WorkflowEngine<C> {
    pub fn new(
        bus: Arc<EventBus>,
        orchestrator: Arc<Orchestrator>,
        control: Arc<dyn ProcessControl>,
        clock: C,
    ) -> Self {
        Self {
            bus,
            orchestrator,
            control,
            clock,
            state: Mutex::new(EngineState {
                defs: IndexMap::new(),
                received: HashMap::new(),
                active: HashMap::new(),
                statuses: HashMap::new(),
            }),
        }
    }

    /// Replace definitions; trigger accumulators reset with them.
    pub fn load_workflows(&self, defs: Vec<WorkflowItem>) {
        let mut state = self.state.lock();
        state.defs = defs.into_iter().map(|d| (d.name.clone(), d)).collect();
        state.received.clear();
    }

    /// Accumulate trigger events; a workflow whose whole `trigger_on` set
    /// has been observed (AND semantics) starts, unless already running.
    pub fn handle_event(self: &Arc<Self>, event: &Event) {
        let to_trigger: Vec<String> = {
            let mut state = self.state.lock();
            let candidates: Vec<(String, Vec<String>)> = state
                .defs
                .values()
                .filter(|d| d.is_triggered() && d.trigger_on.contains(&event.name))
                .map(|d| (d.name.clone(), d.trigger_on.clone()))
                .collect();

            let mut ready = Vec::new();
            for (name, trigger_on) in candidates {
                let received = state.received.entry(name.clone()).or_default();
                received.insert(event.name.clone());
                let satisfied = trigger_on.iter().all(|t| received.contains(t));
                if satisfied && !state.active.contains_key(&name) {
                    state.received.remove(&name);
                    ready.push(name);
                }
            }
            ready
        };

        for name in to_trigger {
            if let Err(e) = self.trigger_workflow(&name, Some(event.name.clone())) {
                tracing::warn!(workflow = %name, error = %e, "event trigger failed");
            }
        }
    }

    /// Start a run. Rejects unknown names and a second concurrent run of
    /// the same workflow.
    pub fn trigger_workflow(
        self: &Arc<Self>,
        name: &str,
        triggered_by: Option<String>,
    ) -> Result<(), WorkflowError> {
        let (def, token, status) = {
            let mut state = self.state.lock();
            let def = state
                .defs
                .get(name)
                .cloned()
                .ok_or_else(|| WorkflowError::Unknown(name.to_string()))?;
            if state.active.contains_key(name) {
                return Err(WorkflowError::AlreadyRunning(name.to_string()));
            }
            let status = Arc::new(Mutex::new(WorkflowStatus {
                name: name.to_string(),
                state: RunState::Running,
                current_step: 0,
                steps: def
                    .steps
                    .iter()
                    .map(|s| StepRecord {
                        action: s.action().to_string(),
                        state: StepState::Pending,
                        started_at_ms: None,
                        completed_at_ms: None,
                        error: None,
                    })
                    .collect(),
                started_at_ms: self.clock.epoch_ms(),
                completed_at_ms: None,
                error: None,
                triggered_by,
            }));
            let token = CancellationToken::new();
            state.active.insert(name.to_string(), token.clone());
            state.statuses.insert(name.to_string(), Arc::clone(&status));
            (def, token, status)
        };

        self.emit_marker(name, "started");
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run(def, status, token).await });
        Ok(())
    }

    /// Cancel an active run; its `await` rejects at the next poll.
    pub fn cancel_workflow(&self, name: &str) -> Result<(), WorkflowError> {
        let token = self
            .state
            .lock()
            .active
            .get(name)
            .cloned()
            .ok_or_else(|| WorkflowError::NotRunning(name.to_string()))?;
        token.cancel();
        Ok(())
    }

    /// Latest run snapshot for one workflow.
    pub fn status(&self, name: &str) -> Option<WorkflowStatus> {
        self.state
            .lock()
            .statuses
            .get(name)
            .map(|s| s.lock().clone())
    }

    /// Latest run snapshot per workflow, sorted by name; workflows that
    /// never ran are omitted.
    pub fn statuses(&self) -> Vec<WorkflowStatus> {
        let mut out: Vec<WorkflowStatus> = self
            .state
            .lock()
            .statuses
            .values()
            .map(|s| s.lock().clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// All loaded workflow names, in definition order.
    pub fn names(&self) -> Vec<String> {
        self.state.lock().defs.keys().cloned().collect()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.state.lock().active.contains_key(name)
    }

    /// Cancel every active run.
    pub fn shutdown(&self) {
        let tokens: Vec<CancellationToken> =
            self.state.lock().active.values().cloned().collect();
        for token in tokens {
            token.cancel();
        }
    }

    fn emit_marker(&self, name: &str, suffix: &str) {
        let event = Event::custom(
            format!("{name}:{suffix}"),
            "workflow",
            None,
            self.clock.epoch_ms(),
        );
        self.bus.emit(&event);
    }

    async fn run(
        self: Arc<Self>,
        def: WorkflowItem,
        status: Arc<Mutex<WorkflowStatus>>,
        token: CancellationToken,
    ) {
        let deadline = Duration::from_millis(def.timeout_ms);
        let outcome = tokio::select! {
            outcome = self.run_steps(&def, &status, &token) => outcome,
            _ = tokio::time::sleep(deadline) => RunOutcome::TimedOut,
            _ = token.cancelled() => RunOutcome::Cancelled,
        };

        let suffix = {
            let mut st = status.lock();
            // Whatever the loop left pending (abort, timeout, cancel)
            // is skipped, never silently dropped.
            for step in &mut st.steps {
                if matches!(step.state, StepState::Pending | StepState::Running) {
                    step.state = StepState::Skipped;
                }
            }
            st.completed_at_ms = Some(self.clock.epoch_ms());
            match outcome {
                RunOutcome::Completed | RunOutcome::SkippedRest => {
                    st.state = RunState::Completed;
                    "completed"
                }
                RunOutcome::Failed(error) => {
                    st.state = RunState::Failed;
                    st.error = Some(error);
                    "failed"
                }
                RunOutcome::TimedOut => {
                    st.state = RunState::Failed;
                    st.error = Some("Workflow timed out".to_string());
                    "failed"
                }
                RunOutcome::Cancelled => {
                    st.state = RunState::Cancelled;
                    "cancelled"
                }
            }
        };

        self.state.lock().active.remove(&def.name);
        self.emit_marker(&def.name, suffix);
    }

    async fn run_steps(
        &self,
        def: &WorkflowItem,
        status: &Arc<Mutex<WorkflowStatus>>,
        token: &CancellationToken,
    ) -> RunOutcome {
        for (index, step) in def.steps.iter().enumerate() {
            if token.is_cancelled() {
                return RunOutcome::Cancelled;
            }

            if let Some(condition) = step.condition() {
                if !self.eval_condition(condition) {
                    status.lock().steps[index].state = StepState::Skipped;
                    continue;
                }
            }

            {
                let mut st = status.lock();
                st.current_step = index;
                st.steps[index].state = StepState::Running;
                st.steps[index].started_at_ms = Some(self.clock.epoch_ms());
            }

            let outcome = self.exec_step(step, token).await;
            match outcome {
                StepOutcome::Ok => {
                    let mut st = status.lock();
                    st.steps[index].state = StepState::Completed;
                    st.steps[index].completed_at_ms = Some(self.clock.epoch_ms());
                }
                StepOutcome::Cancelled => {
                    status.lock().steps[index].state = StepState::Skipped;
                    return RunOutcome::Cancelled;
                }
                StepOutcome::Failed(error) => {
                    {
                        let mut st = status.lock();
                        st.steps[index].state = StepState::Failed;
                        st.steps[index].completed_at_ms = Some(self.clock.epoch_ms());
                        st.steps[index].error = Some(error.clone());
                    }
                    match step.on_failure().unwrap_or(def.on_failure) {
                        OnFailure::Abort => return RunOutcome::Failed(error),
                        OnFailure::Continue => {}
                        OnFailure::SkipRest => return RunOutcome::SkippedRest,
                    }
                }
            }
        }
        RunOutcome::Completed
    }

    async fn exec_step(&self, step: &WorkflowStep, token: &CancellationToken) -> StepOutcome {
        match step {
            WorkflowStep::Run(spec) => self.exec_process_step(spec, true, token).await,
            WorkflowStep::Start(spec) => self.exec_process_step(spec, false, token).await,
            WorkflowStep::Restart(spec) => {
                if let Err(e) = self.control.restart_process(&spec.process, false).await {
                    return StepOutcome::Failed(e.to_string());
                }
                match &spec.await_event {
                    Some(event) => self.await_event(event, spec.timeout_ms, token).await,
                    None => StepOutcome::Ok,
                }
            }
            WorkflowStep::Stop(spec) => self.exec_stop(spec).await,
            WorkflowStep::Await(spec) => self.exec_await(spec, token).await,
            WorkflowStep::Emit(spec) => {
                let event = Event::custom(
                    spec.event.clone(),
                    "workflow",
                    spec.data.clone(),
                    self.clock.epoch_ms(),
                );
                self.bus.emit(&event);
                StepOutcome::Ok
            }
        }
    }

    /// `run` and `start` both dispatch through the orchestrator so env
    /// merging and templates apply; `run` additionally awaits task
    /// success by default.
    async fn exec_process_step(
        &self,
        spec: &ProcessStepSpec,
        default_await: bool,
        token: &CancellationToken,
    ) -> StepOutcome {
        if let Err(e) = self.orchestrator.trigger_stage(&spec.process, None) {
            return StepOutcome::Failed(e.to_string());
        }
        let await_event = spec.await_event.clone().or_else(|| {
            if default_await && self.orchestrator.item_kind(&spec.process) == Some(ProcessKind::Task)
            {
                Some(format!("{}:success", spec.process))
            } else {
                None
            }
        });
        match await_event {
            Some(event) => self.await_event(&event, spec.timeout_ms, token).await,
            None => StepOutcome::Ok,
        }
    }

    async fn exec_stop(&self, spec: &StopStepSpec) -> StepOutcome {
        match self.control.stop_process(&spec.process, false, None).await {
            Ok(()) => StepOutcome::Ok,
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    async fn exec_await(&self, spec: &AwaitStepSpec, token: &CancellationToken) -> StepOutcome {
        self.await_event(&spec.event, spec.timeout_ms, token).await
    }

    /// One-shot bus subscription with optional timeout. The guard
    /// unregisters the handler on every exit path, including the whole
    /// run future being dropped by a workflow-level timeout or cancel.
    async fn await_event(
        &self,
        name: &str,
        timeout_ms: Option<u64>,
        token: &CancellationToken,
    ) -> StepOutcome {
        let (sub, rx) = self.bus.once_name(name);
        let _guard = SubscriptionGuard {
            bus: &self.bus,
            sub,
        };
        match timeout_ms {
            Some(ms) => {
                tokio::select! {
                    received = rx => match received {
                        Ok(_) => StepOutcome::Ok,
                        Err(_) => StepOutcome::Failed("event channel closed".to_string()),
                    },
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => StepOutcome::Failed(
                        format!("Timeout waiting for event '{name}' after {ms}ms"),
                    ),
                    _ = token.cancelled() => StepOutcome::Cancelled,
                }
            }
            None => {
                tokio::select! {
                    received = rx => match received {
                        Ok(_) => StepOutcome::Ok,
                        Err(_) => StepOutcome::Failed("event channel closed".to_string()),
                    },
                    _ = token.cancelled() => StepOutcome::Cancelled,
                }
            }
        }
    }

    /// Conditions compare live process status; unknown processes count
    /// as stopped.
    fn eval_condition(&self, condition: &Condition) -> bool {
        match condition {
            Condition::Is { process, is } => {
                self.control
                    .process_status(process)
                    .unwrap_or(ProcessStatus::Stopped)
                    == *is
            }
            Condition::Not { not } => !self.eval_condition(not),
            Condition::All { all } => all.iter().all(|c| self.eval_condition(c)),
            Condition::Any { any } => any.iter().any(|c| self.eval_condition(c)),
        }
    }
}

/// Removes a bus subscription on drop, surviving future cancellation.
struct SubscriptionGuard<'a> {
    bus: &'a Arc<EventBus>,
    sub: crate::bus::Subscription,
}

impl Drop for SubscriptionGuard<'_> {
    fn drop(&mut self) {
        self.bus.off(self.sub);
    }
}

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod tests;
