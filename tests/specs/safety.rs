// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Safety-chain scenarios: the breaker opening is observable and
//! actionable from a workflow.

use crate::common::*;
use clier_core::{
    CircuitBreakerConfig, OnFailure, ProcessConfig, ProcessKind, ProcessStepSpec, WorkflowItem,
    WorkflowStep,
};

#[tokio::test]
#[serial_test::serial]
async fn breaker_trip_starts_the_monitor_exactly_once() {
    let mut ticker = item(
        "ticker",
        "for i in 1 2 3 4 5; do echo TICK; sleep 0.15; done; sleep 30",
        ProcessKind::Service,
    );
    emit_on(&mut ticker, "TICK", "tick");
    let mut dup = item("dup", "sleep 30", ProcessKind::Service);
    dup.trigger_on = vec!["tick".to_string()];
    let mut monitor = item("monitor", "sleep 30", ProcessKind::Service);
    monitor.manual = true;

    let mut cfg = config(vec![ticker, dup, monitor]);
    cfg.safety.debounce_ms = 30;
    cfg.safety.circuit_breaker = Some(CircuitBreakerConfig {
        timeout_ms: 2_000,
        error_threshold: 50,
        reset_timeout_ms: 60_000,
        volume_threshold: 2,
    });
    cfg.workflows = vec![WorkflowItem {
        name: "watch".to_string(),
        steps: vec![WorkflowStep::Start(ProcessStepSpec {
            process: "monitor".to_string(),
            await_event: None,
            timeout_ms: None,
            condition: None,
            on_failure: None,
        })],
        trigger_on: vec!["circuit-breaker:triggered".to_string()],
        manual: false,
        on_failure: OnFailure::Abort,
        timeout_ms: 30_000,
    }];

    let supervisor = build(cfg);
    let (_s, tripped) = supervisor.bus().once_name("circuit-breaker:triggered");
    // Occupy dup's name outside the orchestrator: every trigger round is
    // then a start failure, and repeated failures open the breaker.
    supervisor
        .process_add(ProcessConfig::shell("dup", "sleep 30", ProcessKind::Service))
        .unwrap();
    supervisor.start().unwrap();

    expect_event(tripped, "breaker to open").await;
    wait_until("monitor running", || {
        supervisor
            .list_processes()
            .iter()
            .any(|p| p.name == "monitor" && p.status == clier_core::ProcessStatus::Running)
    })
    .await;

    // Give later ticks time to arrive; the monitor must not restart.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    let monitors: Vec<_> = supervisor
        .list_processes()
        .into_iter()
        .filter(|p| p.name == "monitor")
        .collect();
    assert_eq!(monitors.len(), 1);
    assert_eq!(monitors[0].restarts, 0, "monitor started exactly once");

    supervisor.shutdown().await;
}

#[tokio::test]
async fn crashing_service_exhausts_retries_and_stays_down() {
    let mut crasher = item("crasher", "exit 1", ProcessKind::Service);
    crasher.restart = Some(clier_core::RestartPolicy {
        enabled: true,
        delay_ms: 30,
        max_retries: 3,
    });

    let supervisor = build(config(vec![crasher]));
    let (_s, gave_up) = supervisor.bus().once_name("process:error");
    supervisor.start().unwrap();

    let event = expect_event(gave_up, "max retries error").await;
    assert_eq!(
        event.data.unwrap()["message"].as_str().unwrap(),
        "max retries exceeded"
    );
    wait_until("crasher down", || {
        !supervisor
            .list_processes()
            .iter()
            .any(|p| p.name == "crasher" && p.status == clier_core::ProcessStatus::Running)
    })
    .await;
    let info = supervisor
        .list_processes()
        .into_iter()
        .find(|p| p.name == "crasher")
        .unwrap();
    assert_eq!(info.restarts, 3);
    supervisor.shutdown().await;
}
