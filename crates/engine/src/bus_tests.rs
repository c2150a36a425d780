// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn custom(name: &str, process: &str, ts: u64) -> Event {
    Event::custom(name, process, None, ts)
}

#[test]
fn handlers_run_in_registration_order() {
    let bus = EventBus::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    for tag in ["first", "second", "third"] {
        let order = Arc::clone(&order);
        bus.on(EventFilter::Name("go".to_string()), move |_| {
            order.lock().push(tag);
        });
    }

    bus.emit(&custom("go", "test", 1));
    assert_eq!(*order.lock(), vec!["first", "second", "third"]);
}

#[test]
fn name_filter_only_sees_its_event() {
    let bus = EventBus::new();
    let hits = Arc::new(Mutex::new(0));
    {
        let hits = Arc::clone(&hits);
        bus.on(EventFilter::Name("db:ready".to_string()), move |_| {
            *hits.lock() += 1;
        });
    }

    bus.emit(&custom("db:ready", "db", 1));
    bus.emit(&custom("api:ready", "api", 2));
    assert_eq!(*hits.lock(), 1);
}

#[test]
fn stream_filters_match_by_kind_not_name() {
    let bus = EventBus::new();
    let lines = Arc::new(Mutex::new(Vec::new()));
    {
        let lines = Arc::clone(&lines);
        bus.on(EventFilter::Stdout, move |event| {
            lines.lock().push(event.line().unwrap_or_default().to_string());
        });
    }

    bus.emit(&Event::stdout("a", "from a", 1));
    bus.emit(&Event::stdout("b", "from b", 2));
    bus.emit(&Event::stderr("a", "not stdout", 3));
    assert_eq!(*lines.lock(), vec!["from a", "from b"]);
}

#[test]
fn off_removes_the_subscription() {
    let bus = EventBus::new();
    let hits = Arc::new(Mutex::new(0));
    let sub = {
        let hits = Arc::clone(&hits);
        bus.on(EventFilter::Any, move |_| *hits.lock() += 1)
    };

    bus.emit(&custom("x", "p", 1));
    bus.off(sub);
    bus.emit(&custom("x", "p", 2));
    assert_eq!(*hits.lock(), 1);
}

#[test]
fn once_name_resolves_on_first_match_only() {
    let bus = EventBus::new();
    let (sub, mut rx) = bus.once_name("build:done");

    bus.emit(&custom("build:done", "build", 1));
    bus.emit(&custom("build:done", "build", 2));

    let event = rx.try_recv().unwrap();
    assert_eq!(event.timestamp_ms, 1);
    bus.off(sub);
}

#[test]
fn handlers_may_reenter_emit() {
    let bus = Arc::new(EventBus::new());
    let seen = Arc::new(Mutex::new(Vec::new()));

    {
        let bus2 = Arc::downgrade(&bus);
        bus.on(EventFilter::Name("outer".to_string()), move |_| {
            if let Some(bus) = bus2.upgrade() {
                bus.emit(&custom("inner", "test", 2));
            }
        });
    }
    {
        let seen = Arc::clone(&seen);
        bus.on(EventFilter::Name("inner".to_string()), move |event| {
            seen.lock().push(event.name.clone());
        });
    }

    bus.emit(&custom("outer", "test", 1));
    assert_eq!(*seen.lock(), vec!["inner"]);
}

#[tokio::test]
async fn connect_normalizes_signals_per_the_table() {
    let bus = Arc::new(EventBus::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    {
        let events = Arc::clone(&events);
        bus.on(EventFilter::Any, move |event| {
            events.lock().push(event.clone());
        });
    }

    let (tx, rx) = mpsc::unbounded_channel();
    bus.connect(rx);

    tx.send(ProcessSignal::Started {
        name: "db".to_string(),
        pid: 42,
        at_ms: 1,
    })
    .unwrap();
    tx.send(ProcessSignal::Stdout {
        name: "db".to_string(),
        line: "ready".to_string(),
        at_ms: 2,
    })
    .unwrap();
    tx.send(ProcessSignal::Exited {
        name: "db".to_string(),
        code: Some(0),
        signal: None,
        stdout: vec!["ready".to_string()],
        stderr: vec![],
        at_ms: 3,
    })
    .unwrap();

    // Let the pump task drain the channel.
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            if events.lock().len() == 3 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let events = events.lock();
    assert_eq!(events[0].name, "process:start");
    assert_eq!(events[0].data.as_ref().unwrap()["pid"], 42);
    assert_eq!(events[1].name, "db");
    assert_eq!(events[1].kind, EventKind::Stdout);
    assert_eq!(events[2].name, "process:exit");
    assert_eq!(events[2].data.as_ref().unwrap()["code"], 0);
    bus.disconnect();
}

#[test]
fn recent_filters_and_limits() {
    let bus = EventBus::new();
    bus.emit(&custom("a:ready", "a", 10));
    bus.emit(&custom("b:ready", "b", 20));
    bus.emit(&Event::stdout("a", "line", 30));

    let all = bus.recent(None, None, None, None, None);
    assert_eq!(all.len(), 3);

    let only_a = bus.recent(Some("a"), None, None, None, None);
    assert_eq!(only_a.len(), 2);

    let customs = bus.recent(None, Some("custom"), None, None, None);
    assert_eq!(customs.len(), 2);

    let since = bus.recent(None, None, None, Some(20), None);
    assert_eq!(since.len(), 2);

    let limited = bus.recent(None, None, None, None, Some(1));
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].timestamp_ms, 30, "limit keeps the newest");
}
