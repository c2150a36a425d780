// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn stdout_event_is_named_after_the_process() {
    let ev = Event::stdout("db", "listening on 5432", 42);
    assert_eq!(ev.name, "db");
    assert_eq!(ev.process_name, "db");
    assert_eq!(ev.kind, EventKind::Stdout);
    assert_eq!(ev.line(), Some("listening on 5432"));
}

#[test]
fn exit_event_carries_complete_output() {
    let ev = Event::process_exit(
        "build",
        Some(0),
        None,
        vec!["compiling".to_string(), "done".to_string()],
        vec![],
        100,
    );
    assert_eq!(ev.name, "process:exit");
    let data = ev.data.unwrap();
    assert_eq!(data["code"], 0);
    assert!(data["signal"].is_null());
    assert_eq!(data["stdout"].as_array().unwrap().len(), 2);
}

#[test]
fn line_is_none_for_non_stream_events() {
    let ev = Event::custom("db:ready", "db", Some(serde_json::json!("text")), 1);
    assert_eq!(ev.line(), None);
}

#[test]
fn kind_serializes_lowercase_under_type_key() {
    let ev = Event::process_error("api", "binary not found", 7);
    let json = serde_json::to_value(&ev).unwrap();
    assert_eq!(json["type"], "error");
    assert_eq!(json["name"], "process:error");
    assert_eq!(json["data"]["message"], "binary not found");
}

#[test]
fn event_round_trips_through_json() {
    let ev = Event::process_restart("worker", 3, 9_999);
    let json = serde_json::to_string(&ev).unwrap();
    let back: Event = serde_json::from_str(&json).unwrap();
    assert_eq!(back, ev);
}
