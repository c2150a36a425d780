// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Trigger-DAG scenarios over real child processes.

use crate::common::*;
use clier_core::{ProcessKind, ProcessStatus};

#[tokio::test]
async fn three_stage_pipeline_reaches_a_running_service() {
    let mut a = item("a", "echo OK1", ProcessKind::Task);
    emit_on(&mut a, "OK1", "a:ok");
    let mut b = item("b", "echo OK2", ProcessKind::Task);
    b.trigger_on = vec!["a:ok".to_string()];
    emit_on(&mut b, "OK2", "b:ok");
    let mut c = item("c", "echo READY; sleep 30", ProcessKind::Service);
    c.trigger_on = vec!["b:ok".to_string()];
    emit_on(&mut c, "READY", "c:ready");

    let supervisor = build(config(vec![a, b, c]));
    let (_s, ready) = supervisor.bus().once_name("c:ready");
    supervisor.start().unwrap();

    expect_event(ready, "c:ready").await;
    wait_until("c running", || {
        supervisor
            .list_processes()
            .iter()
            .any(|p| p.name == "c" && p.status == ProcessStatus::Running)
    })
    .await;
    supervisor.shutdown().await;
}

#[tokio::test]
async fn partially_satisfied_and_trigger_keeps_waiting() {
    let mut emitter = item("cache", "echo DOWN", ProcessKind::Task);
    emit_on(&mut emitter, "DOWN", "cache:failed");
    let mut app = item("app", "echo nope", ProcessKind::Task);
    app.trigger_on = vec!["cache:ready".to_string(), "db:ready".to_string()];

    let supervisor = build(config(vec![emitter, app]));
    let (_s, cache_exit) = supervisor.bus().once_name("process:exit:cache");
    supervisor.start().unwrap();
    expect_event(cache_exit, "cache exit").await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    assert!(!supervisor.orchestrator().is_started("app"));
    let waiting = supervisor.orchestrator().waiting_processes();
    let app_waiting = waiting.iter().find(|(name, _)| name == "app");
    assert!(app_waiting.is_some(), "app absent from waiting set: {waiting:?}");
    supervisor.shutdown().await;
}

#[tokio::test]
async fn crash_with_continue_on_failure_starts_the_dependent() {
    let mut x = item("x", "echo BOOM; exit 1", ProcessKind::Task);
    x.continue_on_failure = true;
    emit_on(&mut x, "BOOM", "x:boom");
    let mut y = item("y", "echo healed", ProcessKind::Task);
    y.trigger_on = vec!["x:failure".to_string()];

    let supervisor = build(config(vec![x, y]));
    let (_s, y_exit) = supervisor.bus().once_name("process:exit:y");
    supervisor.start().unwrap();

    let event = expect_event(y_exit, "y to run after x:failure").await;
    let data = event.data.unwrap();
    assert_eq!(data["code"], 0);
    supervisor.shutdown().await;
}

#[tokio::test]
async fn exit_event_carries_every_stdout_line_in_order() {
    let gen = item(
        "gen",
        "for i in $(seq 1 50); do echo line-$i; done",
        ProcessKind::Task,
    );
    let supervisor = build(config(vec![gen]));
    let (_s, exited) = supervisor.bus().once_name("process:exit:gen");
    supervisor.start().unwrap();

    let event = expect_event(exited, "gen exit").await;
    let data = event.data.unwrap();
    let stdout = data["stdout"].as_array().unwrap();
    assert_eq!(stdout.len(), 50);
    for (i, line) in stdout.iter().enumerate() {
        assert_eq!(line.as_str().unwrap(), format!("line-{}", i + 1));
    }
    supervisor.shutdown().await;
}

#[tokio::test]
#[serial_test::serial]
async fn stopping_a_shell_kills_its_descendants() {
    // Needs real process groups, so no test-mode spawn here.
    let mut tree = item("tree", "sleep 30 & echo CHILD:$!; wait", ProcessKind::Service);
    emit_on(&mut tree, "CHILD:", "tree:child");

    let supervisor = build_with(config(vec![tree]), false);
    let (_s, child) = supervisor.bus().once_name("tree:child");
    supervisor.start().unwrap();

    let event = expect_event(child, "child pid line").await;
    let line = event.data.unwrap()["line"].as_str().unwrap().to_string();
    let child_pid: u32 = line.trim_start_matches("CHILD:").trim().parse().unwrap();
    assert!(
        std::path::Path::new(&format!("/proc/{child_pid}")).exists(),
        "grandchild alive before stop"
    );

    supervisor.process_stop("tree", false).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    assert!(
        !std::path::Path::new(&format!("/proc/{child_pid}")).exists(),
        "grandchild survived the group kill"
    );
    supervisor.shutdown().await;
}

#[tokio::test]
async fn spawn_failure_still_fires_exit_dependents() {
    let mut lost = item("lost", "echo unreachable", ProcessKind::Task);
    lost.cwd = Some("/definitely/not/here".into());
    lost.events.on_crash = true;
    let mut fallback = item("fallback", "echo rescued", ProcessKind::Task);
    fallback.trigger_on = vec!["lost:crashed".to_string()];

    let supervisor = build(config(vec![lost, fallback]));
    let (_s, rescued) = supervisor.bus().once_name("process:exit:fallback");
    supervisor.start().unwrap();

    expect_event(rescued, "fallback after spawn failure").await;
    supervisor.shutdown().await;
}
