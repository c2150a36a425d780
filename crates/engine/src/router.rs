// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Turns raw stream/exit events into the pipeline's named events.
//!
//! The router is pure: `route` returns the derived events and the
//! supervisor re-emits them, so the router never holds a bus reference.

use clier_core::{Event, EventKind, PatternError, PatternMatcher, PipelineItem, ProcessKind};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Clone)]
struct RouteRules {
    kind: ProcessKind,
    on_stderr: bool,
    on_crash: bool,
    continue_on_failure: bool,
}

/// Per-item stream-to-event rules plus the built-in exit mapping.
#[derive(Default)]
pub struct PatternRouter {
    matcher: Mutex<PatternMatcher>,
    rules: Mutex<HashMap<String, RouteRules>>,
}

impl PatternRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all rules with the given pipeline's. Malformed patterns
    /// are rejected before anything is swapped in.
    pub fn load(&self, items: &[PipelineItem]) -> Result<(), PatternError> {
        let mut matcher = PatternMatcher::new();
        let mut rules = HashMap::new();
        for item in items {
            for rule in &item.events.on_stdout {
                matcher.add_pattern(&item.name, &rule.pattern, &rule.emit)?;
            }
            rules.insert(
                item.name.clone(),
                RouteRules {
                    kind: item.kind,
                    on_stderr: item.events.on_stderr,
                    on_crash: item.events.on_crash,
                    continue_on_failure: item.continue_on_failure,
                },
            );
        }
        *self.matcher.lock() = matcher;
        *self.rules.lock() = rules;
        Ok(())
    }

    /// Derive events from a raw stream line or a `process:exit`.
    /// Everything else routes to nothing.
    pub fn route(&self, event: &Event) -> Vec<Event> {
        match event.kind {
            EventKind::Stdout => self.route_stdout(event),
            EventKind::Stderr => self.route_stderr(event),
            EventKind::Custom if event.name == "process:exit" => self.route_exit(event),
            _ => vec![],
        }
    }

    fn route_stdout(&self, event: &Event) -> Vec<Event> {
        let Some(line) = event.line() else {
            return vec![];
        };
        self.matcher
            .lock()
            .match_for(&event.process_name, line)
            .into_iter()
            .map(|emit| {
                Event::custom(
                    emit,
                    event.process_name.clone(),
                    Some(serde_json::json!({ "line": line })),
                    event.timestamp_ms,
                )
            })
            .collect()
    }

    fn route_stderr(&self, event: &Event) -> Vec<Event> {
        let process = &event.process_name;
        let enabled = self
            .rules
            .lock()
            .get(process)
            .is_some_and(|r| r.on_stderr);
        if !enabled {
            return vec![];
        }
        let Some(line) = event.line() else {
            return vec![];
        };
        vec![Event {
            name: format!("{process}:stderr"),
            process_name: process.clone(),
            kind: EventKind::Custom,
            data: Some(serde_json::json!({ "line": line })),
            timestamp_ms: event.timestamp_ms,
        }]
    }

    fn route_exit(&self, event: &Event) -> Vec<Event> {
        let process = &event.process_name;
        let rules = self.rules.lock().get(process).cloned();
        let data = event.data.clone();
        let code = data
            .as_ref()
            .and_then(|d| d.get("code"))
            .and_then(|c| c.as_i64());
        let signal = data
            .as_ref()
            .and_then(|d| d.get("signal"))
            .and_then(|s| s.as_i64());
        // A missing exit code (spawn failure) counts as a crash.
        let crashed = code != Some(0) || signal.is_some();

        let mut out = vec![Event {
            name: format!("process:exit:{process}"),
            process_name: process.clone(),
            kind: EventKind::Custom,
            data: data.clone(),
            timestamp_ms: event.timestamp_ms,
        }];

        let Some(rules) = rules else {
            return out;
        };
        if crashed && rules.on_crash {
            out.push(Event {
                name: format!("{process}:crashed"),
                process_name: process.clone(),
                kind: EventKind::Crashed,
                data: data.clone(),
                timestamp_ms: event.timestamp_ms,
            });
        }
        if !crashed && rules.kind == ProcessKind::Task {
            out.push(Event {
                name: format!("{process}:success"),
                process_name: process.clone(),
                kind: EventKind::Success,
                data: data.clone(),
                timestamp_ms: event.timestamp_ms,
            });
        }
        if crashed && rules.continue_on_failure {
            out.push(Event {
                name: format!("{process}:failure"),
                process_name: process.clone(),
                kind: EventKind::Custom,
                data,
                timestamp_ms: event.timestamp_ms,
            });
        }
        out
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
