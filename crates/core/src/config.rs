// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Validated pipeline configuration.
//!
//! The daemon consumes an already-flattened configuration object: the CLI
//! validator has resolved stages into plain pipeline items, applied schema
//! defaults, and rejected duplicate names before this file is ever written.
//! `Config::from_json_file` only deserializes and re-checks the invariants
//! the core depends on.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading a flattened configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("duplicate name in pipeline/workflows: {0}")]
    DuplicateName(String),
}

/// The flattened configuration the core consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub project_name: String,
    /// Inherit the daemon's environment into every spawned process.
    #[serde(default)]
    pub global_env: bool,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub pipeline: Vec<PipelineItem>,
    #[serde(default)]
    pub workflows: Vec<WorkflowItem>,
    /// Echo of the authoring-time stage grouping, kept for `stages.map`.
    #[serde(default)]
    pub stages: HashMap<String, Vec<String>>,
}

impl Config {
    /// Load a flattened config from the JSON file the validator wrote.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.check_unique_names()?;
        Ok(config)
    }

    /// Reject duplicate names across pipeline items and workflows.
    ///
    /// The validator already enforces this; re-checking here keeps the
    /// orchestrator's name-keyed maps sound even for hand-written files.
    pub fn check_unique_names(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for item in &self.pipeline {
            if !seen.insert(item.name.as_str()) {
                return Err(ConfigError::DuplicateName(item.name.clone()));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for wf in &self.workflows {
            if !seen.insert(wf.name.as_str()) {
                return Err(ConfigError::DuplicateName(wf.name.clone()));
            }
        }
        Ok(())
    }
}

/// Safety-chain tuning for orchestrator event handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_max_ops")]
    pub max_ops_per_minute: u32,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

fn default_max_ops() -> u32 {
    60
}

fn default_debounce_ms() -> u64 {
    300
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_ops_per_minute: default_max_ops(),
            debounce_ms: default_debounce_ms(),
            circuit_breaker: None,
        }
    }
}

/// Circuit-breaker tuning; absent sections fall back to these defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_breaker_timeout")]
    pub timeout_ms: u64,
    /// Error percentage (0-100) at which the breaker opens.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u8,
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_ms: u64,
    /// Minimum calls in the rolling window before the ratio is consulted.
    #[serde(default = "default_volume_threshold")]
    pub volume_threshold: u32,
}

fn default_breaker_timeout() -> u64 {
    10_000
}

fn default_error_threshold() -> u8 {
    50
}

fn default_reset_timeout() -> u64 {
    30_000
}

fn default_volume_threshold() -> u32 {
    5
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_breaker_timeout(),
            error_threshold: default_error_threshold(),
            reset_timeout_ms: default_reset_timeout(),
            volume_threshold: default_volume_threshold(),
        }
    }
}

/// What kind of child a pipeline item runs.
///
/// Services stay up and may auto-restart; tasks run to completion and
/// report success or failure exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    Service,
    Task,
}

/// Observed lifecycle state of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessStatus::Idle => "idle",
            ProcessStatus::Starting => "starting",
            ProcessStatus::Running => "running",
            ProcessStatus::Stopping => "stopping",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// One declared pipeline entry (stages are pre-flattened into these).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineItem {
    pub name: String,
    pub command: String,
    #[serde(rename = "type")]
    pub kind: ProcessKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Event names that must all be observed before this item starts.
    #[serde(default)]
    pub trigger_on: Vec<String>,
    /// Manual items are never auto-started by the orchestrator.
    #[serde(default)]
    pub manual: bool,
    #[serde(default)]
    pub continue_on_failure: bool,
    /// Allow `{{event.*}}` substitution into command and env at trigger time.
    #[serde(default)]
    pub enable_event_templates: bool,
    /// Per-item override of the config-level `global_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_env: Option<bool>,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<RestartPolicy>,
}

impl PipelineItem {
    /// Entry points are items with no triggers that are not manual.
    pub fn is_entry_point(&self) -> bool {
        self.trigger_on.is_empty() && !self.manual
    }

    /// Every event name this item can emit, for the cycle check.
    pub fn emitted_events(&self) -> Vec<String> {
        let mut out: Vec<String> =
            self.events.on_stdout.iter().map(|r| r.emit.clone()).collect();
        out.push(format!("process:exit:{}", self.name));
        if self.events.on_stderr {
            out.push(format!("{}:stderr", self.name));
        }
        if self.events.on_crash {
            out.push(format!("{}:crashed", self.name));
        }
        if self.kind == ProcessKind::Task {
            out.push(format!("{}:success", self.name));
        }
        if self.continue_on_failure {
            out.push(format!("{}:failure", self.name));
        }
        out
    }
}

/// Stream-to-event wiring for one pipeline item.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default)]
    pub on_stdout: Vec<StdoutRule>,
    #[serde(default)]
    pub on_stderr: bool,
    #[serde(default)]
    pub on_crash: bool,
}

/// A named regex rule over stdout lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StdoutRule {
    pub pattern: String,
    pub emit: String,
}

/// Crash-restart policy for services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub enabled: bool,
    #[serde(default = "default_restart_delay")]
    pub delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_restart_delay() -> u64 {
    1_000
}

fn default_max_retries() -> u32 {
    3
}

/// Effective spawn configuration handed to the process manager.
///
/// Built by the orchestrator from a `PipelineItem`: env merged, templates
/// substituted, per-item overrides resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub name: String,
    pub command: String,
    pub kind: ProcessKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Inherit the daemon's environment (item env overlays it).
    #[serde(default)]
    pub inherit_env: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<RestartPolicy>,
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,
}

fn default_stop_timeout() -> u64 {
    5_000
}

impl ProcessConfig {
    /// Minimal config for a command with no declared pipeline entry.
    pub fn shell(name: impl Into<String>, command: impl Into<String>, kind: ProcessKind) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            kind,
            cwd: None,
            env: HashMap::new(),
            inherit_env: true,
            restart: None,
            stop_timeout_ms: default_stop_timeout(),
        }
    }
}

/// A named, ordered list of steps over the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowItem {
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    /// Absent/empty means the workflow only runs when started explicitly.
    #[serde(default)]
    pub trigger_on: Vec<String>,
    #[serde(default)]
    pub manual: bool,
    #[serde(default)]
    pub on_failure: OnFailure,
    #[serde(default = "default_workflow_timeout")]
    pub timeout_ms: u64,
}

fn default_workflow_timeout() -> u64 {
    600_000
}

impl WorkflowItem {
    /// Event-triggered workflows have triggers and are not marked manual.
    pub fn is_triggered(&self) -> bool {
        !self.manual && !self.trigger_on.is_empty()
    }
}

/// What to do when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    #[default]
    Abort,
    Continue,
    SkipRest,
}

/// One workflow step, discriminated by `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WorkflowStep {
    Run(ProcessStepSpec),
    Start(ProcessStepSpec),
    Restart(ProcessStepSpec),
    Stop(StopStepSpec),
    Await(AwaitStepSpec),
    Emit(EmitStepSpec),
}

impl WorkflowStep {
    pub fn action(&self) -> &'static str {
        match self {
            WorkflowStep::Run(_) => "run",
            WorkflowStep::Start(_) => "start",
            WorkflowStep::Restart(_) => "restart",
            WorkflowStep::Stop(_) => "stop",
            WorkflowStep::Await(_) => "await",
            WorkflowStep::Emit(_) => "emit",
        }
    }

    pub fn condition(&self) -> Option<&Condition> {
        match self {
            WorkflowStep::Run(s) | WorkflowStep::Start(s) | WorkflowStep::Restart(s) => {
                s.condition.as_ref()
            }
            WorkflowStep::Stop(s) => s.condition.as_ref(),
            WorkflowStep::Await(s) => s.condition.as_ref(),
            WorkflowStep::Emit(s) => s.condition.as_ref(),
        }
    }

    pub fn on_failure(&self) -> Option<OnFailure> {
        match self {
            WorkflowStep::Run(s) | WorkflowStep::Start(s) | WorkflowStep::Restart(s) => {
                s.on_failure
            }
            WorkflowStep::Stop(s) => s.on_failure,
            WorkflowStep::Await(s) => s.on_failure,
            WorkflowStep::Emit(s) => s.on_failure,
        }
    }
}

/// Spec for `run`/`start`/`restart` steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStepSpec {
    pub process: String,
    /// Event to wait for after acting; overrides the task-success default.
    #[serde(default, rename = "await", skip_serializing_if = "Option::is_none")]
    pub await_event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<OnFailure>,
}

/// Spec for `stop` steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopStepSpec {
    pub process: String,
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<OnFailure>,
}

/// Spec for `await` steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwaitStepSpec {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<OnFailure>,
}

/// Spec for `emit` steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitStepSpec {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<OnFailure>,
}

/// Step guard evaluated against live process state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Not { not: Box<Condition> },
    All { all: Vec<Condition> },
    Any { any: Vec<Condition> },
    Is { process: String, is: ProcessStatus },
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
