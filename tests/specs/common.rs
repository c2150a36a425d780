// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared scenario helpers.

use clier_core::{
    Config, EventsConfig, PipelineItem, ProcessKind, SafetyConfig, StdoutRule, SystemClock,
};
use clier_engine::{Supervisor, SupervisorOptions};
use std::sync::Arc;
use std::time::Duration;

pub fn item(name: &str, command: &str, kind: ProcessKind) -> PipelineItem {
    PipelineItem {
        name: name.to_string(),
        command: command.to_string(),
        kind,
        cwd: None,
        env: Default::default(),
        trigger_on: vec![],
        manual: false,
        continue_on_failure: false,
        enable_event_templates: false,
        global_env: None,
        events: EventsConfig::default(),
        restart: None,
    }
}

pub fn emit_on(item: &mut PipelineItem, pattern: &str, emit: &str) {
    item.events.on_stdout.push(StdoutRule {
        pattern: pattern.to_string(),
        emit: emit.to_string(),
    });
}

pub fn config(pipeline: Vec<PipelineItem>) -> Config {
    Config {
        project_name: "specs".to_string(),
        global_env: true,
        safety: SafetyConfig {
            max_ops_per_minute: 600,
            debounce_ms: 10,
            circuit_breaker: None,
        },
        pipeline,
        workflows: vec![],
        stages: Default::default(),
    }
}

pub fn build(config: Config) -> Arc<Supervisor<SystemClock>> {
    build_with(config, true)
}

pub fn build_with(config: Config, test_mode: bool) -> Arc<Supervisor<SystemClock>> {
    Supervisor::build(
        config,
        SupervisorOptions {
            test_mode,
            log_dir: None,
            log_capacity: None,
        },
        SystemClock,
    )
    .expect("supervisor build failed")
}

pub async fn wait_until(what: &str, mut probe: impl FnMut() -> bool) {
    let deadline = std::time::Instant::now() + Duration::from_secs(15);
    while !probe() {
        assert!(
            std::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub async fn expect_event(
    rx: tokio::sync::oneshot::Receiver<clier_core::Event>,
    what: &str,
) -> clier_core::Event {
    tokio::time::timeout(Duration::from_secs(15), rx)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .expect("event bus dropped")
}
