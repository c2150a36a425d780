// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Trigger DAG over the pipeline: entry points, pending trigger sets,
//! event-template substitution, cascade.

use crate::manager::{ProcessControl, ProcessError};
use clier_core::{expand_os_env, expand_tokens, Event, PipelineItem, ProcessConfig, TemplateContext};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("circular trigger dependency: {0}")]
    Cycle(String),

    #[error("unknown process: {0}")]
    UnknownProcess(String),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

#[derive(Default)]
struct DagState {
    items: IndexMap<String, PipelineItem>,
    /// trigger event name → names of items waiting on it.
    dependents: HashMap<String, Vec<String>>,
    /// item name → triggers not yet observed.
    pending: HashMap<String, HashSet<String>>,
    /// Items already dispatched; suppresses double starts on repeats.
    started: HashSet<String>,
    /// Last trigger event seen per item, kept for template substitution.
    causes: HashMap<String, Event>,
}

/// Drives the pipeline's dependency graph off bus events.
///
/// Holds no process-manager reference beyond the [`ProcessControl`] trait;
/// the supervisor owns both concrete halves.
pub struct Orchestrator {
    control: Arc<dyn ProcessControl>,
    project_name: String,
    global_env: bool,
    dag: Mutex<DagState>,
}

impl Orchestrator {
    pub fn new(control: Arc<dyn ProcessControl>, project_name: &str, global_env: bool) -> Self {
        Self {
            control,
            project_name: project_name.to_string(),
            global_env,
            dag: Mutex::new(DagState::default()),
        }
    }

    /// Load (or replace) the pipeline: build the dependents index and
    /// pending sets, rejecting cyclic trigger graphs.
    pub fn load_pipeline(&self, items: Vec<PipelineItem>) -> Result<(), OrchestratorError> {
        check_cycles(&items)?;

        let mut dag = DagState::default();
        for item in items {
            for trigger in &item.trigger_on {
                dag.dependents
                    .entry(trigger.clone())
                    .or_default()
                    .push(item.name.clone());
            }
            if !item.trigger_on.is_empty() {
                dag.pending
                    .insert(item.name.clone(), item.trigger_on.iter().cloned().collect());
            }
            dag.items.insert(item.name.clone(), item);
        }
        *self.dag.lock() = dag;
        Ok(())
    }

    /// Start every entry point (no triggers, not manual).
    pub fn start(&self) -> Result<(), OrchestratorError> {
        for name in self.entry_points() {
            self.trigger_stage(&name, None)?;
        }
        Ok(())
    }

    /// Account one observed event: decrement matching pending sets and
    /// start any dependent whose set just emptied.
    ///
    /// A triggered item that exits re-arms: its pending set resets to the
    /// full trigger list, so the next complete round of triggers starts
    /// it again.
    pub fn handle_event(&self, event: &Event) -> Result<(), OrchestratorError> {
        let ready: Vec<String> = {
            let mut dag = self.dag.lock();
            if event.name == "process:exit" {
                let name = event.process_name.clone();
                if dag.started.contains(&name) {
                    if let Some(triggers) = dag
                        .items
                        .get(&name)
                        .filter(|i| !i.trigger_on.is_empty())
                        .map(|i| i.trigger_on.iter().cloned().collect::<HashSet<_>>())
                    {
                        dag.started.remove(&name);
                        dag.pending.insert(name, triggers);
                    }
                }
            }
            let Some(dependents) = dag.dependents.get(&event.name).cloned() else {
                return Ok(());
            };
            let mut ready = Vec::new();
            for name in dependents {
                if dag.started.contains(&name) {
                    continue;
                }
                let satisfied = match dag.pending.get_mut(&name) {
                    Some(pending) => {
                        pending.remove(&event.name);
                        pending.is_empty()
                    }
                    None => false,
                };
                dag.causes.insert(name.clone(), event.clone());
                if satisfied {
                    ready.push(name);
                }
            }
            ready
        };

        for name in ready {
            self.trigger_stage(&name, Some(event))?;
        }
        Ok(())
    }

    /// Compute the effective spawn config for `name` and start it.
    ///
    /// The item is marked started *before* the manager call so repeated
    /// trigger events stay idempotent.
    pub fn trigger_stage(&self, name: &str, cause: Option<&Event>) -> Result<(), OrchestratorError> {
        let cfg = {
            let mut dag = self.dag.lock();
            let Some(item) = dag.items.get(name) else {
                return Err(OrchestratorError::UnknownProcess(name.to_string()));
            };
            let cause = cause.or_else(|| dag.causes.get(name)).cloned();
            let cfg = build_config(item, cause.as_ref(), &self.project_name, self.global_env);
            dag.started.insert(name.to_string());
            cfg
        };

        tracing::info!(process = %name, command = %cfg.command, "starting pipeline item");
        if let Err(e) = self.control.start_process(cfg) {
            // The item never started; leave it eligible for the next
            // trigger round instead of wedged in the started set.
            self.dag.lock().started.remove(name);
            return Err(e.into());
        }
        Ok(())
    }

    /// Items with empty trigger sets and `manual != true`.
    pub fn entry_points(&self) -> Vec<String> {
        self.dag
            .lock()
            .items
            .values()
            .filter(|i| i.is_entry_point())
            .map(|i| i.name.clone())
            .collect()
    }

    /// Snapshot of items still waiting, with their unmet triggers.
    pub fn waiting_processes(&self) -> Vec<(String, Vec<String>)> {
        let dag = self.dag.lock();
        dag.items
            .values()
            .filter(|i| !dag.started.contains(&i.name) && !i.trigger_on.is_empty())
            .map(|i| {
                let mut unmet: Vec<String> = dag
                    .pending
                    .get(&i.name)
                    .map(|p| p.iter().cloned().collect())
                    .unwrap_or_default();
                unmet.sort();
                (i.name.clone(), unmet)
            })
            .collect()
    }

    /// Whether an item has been dispatched since load.
    pub fn is_started(&self, name: &str) -> bool {
        self.dag.lock().started.contains(name)
    }

    /// Declared kind of a pipeline item, if it exists.
    pub fn item_kind(&self, name: &str) -> Option<clier_core::ProcessKind> {
        self.dag.lock().items.get(name).map(|i| i.kind)
    }

    /// Names of every loaded item, in pipeline order.
    pub fn item_names(&self) -> Vec<String> {
        self.dag.lock().items.keys().cloned().collect()
    }
}

/// Merge env and apply templates per the item's flags.
fn build_config(
    item: &PipelineItem,
    cause: Option<&Event>,
    project_name: &str,
    global_env: bool,
) -> ProcessConfig {
    let inherit_env = item.global_env.unwrap_or(global_env);

    let substitute = item.enable_event_templates && cause.is_some();
    let ctx = TemplateContext {
        event: cause,
        process_name: &item.name,
        process_kind: item.kind,
        project: project_name,
    };

    let apply = |value: &str| -> String {
        let expanded = expand_os_env(value);
        if substitute {
            expand_tokens(&expanded, &ctx)
        } else {
            expanded
        }
    };

    let command = apply(&item.command);
    let env = item
        .env
        .iter()
        .map(|(k, v)| (k.clone(), apply(v)))
        .collect();

    ProcessConfig {
        name: item.name.clone(),
        command,
        kind: item.kind,
        cwd: item.cwd.clone(),
        env,
        inherit_env,
        restart: item.restart.clone(),
        stop_timeout_ms: 5_000,
    }
}

/// DFS over the trigger graph. An edge runs from `a` to `b` when any
/// event `b` can emit appears in `a.trigger_on`; a back edge is a cycle,
/// reported with its full node path.
fn check_cycles(items: &[PipelineItem]) -> Result<(), OrchestratorError> {
    // emitted event name → emitting items (several items may share one).
    let mut emitters: HashMap<String, Vec<String>> = HashMap::new();
    for item in items {
        for event in item.emitted_events() {
            emitters.entry(event).or_default().push(item.name.clone());
        }
    }

    let by_name: HashMap<&str, &PipelineItem> =
        items.iter().map(|i| (i.name.as_str(), i)).collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }
    let mut marks: HashMap<String, Mark> = HashMap::new();

    fn visit(
        name: &str,
        by_name: &HashMap<&str, &PipelineItem>,
        emitters: &HashMap<String, Vec<String>>,
        marks: &mut HashMap<String, Mark>,
        path: &mut Vec<String>,
    ) -> Result<(), OrchestratorError> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                let start = path.iter().position(|n| n == name).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].to_vec();
                cycle.push(name.to_string());
                return Err(OrchestratorError::Cycle(cycle.join(" -> ")));
            }
            None => {}
        }
        marks.insert(name.to_string(), Mark::InProgress);
        path.push(name.to_string());

        if let Some(item) = by_name.get(name) {
            for trigger in &item.trigger_on {
                for emitter in emitters.get(trigger).into_iter().flatten() {
                    visit(emitter, by_name, emitters, marks, path)?;
                }
            }
        }

        path.pop();
        marks.insert(name.to_string(), Mark::Done);
        Ok(())
    }

    let mut path = Vec::new();
    for item in items {
        visit(&item.name, &by_name, &emitters, &mut marks, &mut path)?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
