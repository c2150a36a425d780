// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow scenarios: conditions, awaits, cancellation.

use crate::common::*;
use clier_core::{
    AwaitStepSpec, Condition, OnFailure, ProcessKind, ProcessStatus, ProcessStepSpec,
    StopStepSpec, WorkflowItem, WorkflowStep,
};

fn wf(name: &str, steps: Vec<WorkflowStep>) -> WorkflowItem {
    WorkflowItem {
        name: name.to_string(),
        steps,
        trigger_on: vec![],
        manual: false,
        on_failure: OnFailure::Abort,
        timeout_ms: 60_000,
    }
}

#[tokio::test]
async fn deploy_workflow_stops_and_restarts_a_running_service() {
    let mut api = item("api", "echo READY; sleep 30", ProcessKind::Service);
    emit_on(&mut api, "READY", "api:ready");

    let mut cfg = config(vec![api]);
    cfg.workflows = vec![wf(
        "deploy",
        vec![
            WorkflowStep::Stop(StopStepSpec {
                process: "api".to_string(),
                condition: Some(Condition::Is {
                    process: "api".to_string(),
                    is: ProcessStatus::Running,
                }),
                on_failure: None,
            }),
            WorkflowStep::Start(ProcessStepSpec {
                process: "api".to_string(),
                await_event: Some("api:ready".to_string()),
                timeout_ms: Some(10_000),
                condition: None,
                on_failure: None,
            }),
        ],
    )];

    let supervisor = build(cfg);
    let (_s, first_ready) = supervisor.bus().once_name("api:ready");
    supervisor.start().unwrap();
    expect_event(first_ready, "api up before deploy").await;
    wait_until("api running", || {
        supervisor
            .list_processes()
            .iter()
            .any(|p| p.name == "api" && p.status == ProcessStatus::Running)
    })
    .await;

    let (_s2, done) = supervisor.bus().once_name("deploy:completed");
    supervisor.workflow_start("deploy").unwrap();
    expect_event(done, "deploy completion").await;

    let status = supervisor.workflow_status("deploy").unwrap();
    assert_eq!(status.state, clier_engine::RunState::Completed);
    assert!(status
        .steps
        .iter()
        .all(|s| s.state == clier_engine::StepState::Completed));
    supervisor.shutdown().await;
}

#[tokio::test]
async fn skipped_stop_when_the_service_is_down() {
    let mut cfg = config(vec![item("api", "sleep 30", ProcessKind::Service)]);
    // api is declared manual so nothing starts it.
    cfg.pipeline[0].manual = true;
    cfg.workflows = vec![wf(
        "tidy",
        vec![WorkflowStep::Stop(StopStepSpec {
            process: "api".to_string(),
            condition: Some(Condition::Is {
                process: "api".to_string(),
                is: ProcessStatus::Running,
            }),
            on_failure: None,
        })],
    )];

    let supervisor = build(cfg);
    supervisor.start().unwrap();
    let (_s, done) = supervisor.bus().once_name("tidy:completed");
    supervisor.workflow_start("tidy").unwrap();
    expect_event(done, "tidy completion").await;

    let status = supervisor.workflow_status("tidy").unwrap();
    assert_eq!(status.steps[0].state, clier_engine::StepState::Skipped);
    supervisor.shutdown().await;
}

#[tokio::test]
async fn cancellation_resolves_a_pending_await() {
    let mut cfg = config(vec![]);
    cfg.workflows = vec![wf(
        "waiter",
        vec![WorkflowStep::Await(AwaitStepSpec {
            event: "never".to_string(),
            timeout_ms: None,
            condition: None,
            on_failure: None,
        })],
    )];

    let supervisor = build(cfg);
    supervisor.start().unwrap();
    let (_s, cancelled) = supervisor.bus().once_name("waiter:cancelled");
    supervisor.workflow_start("waiter").unwrap();

    wait_until("workflow active", || {
        supervisor.workflow_status("waiter").is_some()
    })
    .await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    supervisor.workflow_cancel("waiter").unwrap();

    expect_event(cancelled, "waiter cancellation").await;
    let status = supervisor.workflow_status("waiter").unwrap();
    assert_eq!(status.state, clier_engine::RunState::Cancelled);
    assert_eq!(status.steps[0].state, clier_engine::StepState::Skipped);
    supervisor.shutdown().await;
}

#[tokio::test]
async fn run_step_awaits_task_success_end_to_end() {
    let migrate = item("migrate", "echo migrating; true", ProcessKind::Task);
    let mut cfg = config(vec![{
        let mut m = migrate;
        m.manual = true;
        m
    }]);
    cfg.workflows = vec![wf(
        "release",
        vec![WorkflowStep::Run(ProcessStepSpec {
            process: "migrate".to_string(),
            await_event: None,
            timeout_ms: Some(10_000),
            condition: None,
            on_failure: None,
        })],
    )];

    let supervisor = build(cfg);
    supervisor.start().unwrap();
    let (_s, done) = supervisor.bus().once_name("release:completed");
    supervisor.workflow_start("release").unwrap();
    expect_event(done, "release completion").await;
    supervisor.shutdown().await;
}

#[tokio::test]
async fn workflow_triggered_by_pipeline_events() {
    let mut build_task = item("build", "echo BUILT", ProcessKind::Task);
    emit_on(&mut build_task, "BUILT", "build:done");

    let mut cfg = config(vec![build_task]);
    let mut notify = wf(
        "notify",
        vec![WorkflowStep::Emit(clier_core::EmitStepSpec {
            event: "team:notified".to_string(),
            data: Some(serde_json::json!({"channel": "#deploys"})),
            condition: None,
            on_failure: None,
        })],
    );
    notify.trigger_on = vec!["build:done".to_string()];
    cfg.workflows = vec![notify];

    let supervisor = build(cfg);
    let (_s, notified) = supervisor.bus().once_name("team:notified");
    supervisor.start().unwrap();

    let event = expect_event(notified, "workflow emit").await;
    assert_eq!(event.process_name, "workflow");
    assert_eq!(event.data.unwrap()["channel"], "#deploys");
    supervisor.shutdown().await;
}
