// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The single fan-out point for every typed event.
//!
//! Normalizes raw process signals into [`Event`]s and dispatches each
//! emitted event synchronously to matching subscribers, in registration
//! order. A bounded ring of recent events backs `events.query`.

use crate::process::ProcessSignal;
use clier_core::{Event, EventKind};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// How many emitted events the query ring retains.
const EVENT_LOG_CAPACITY: usize = 1000;

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle for removing a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventFilter {
    /// Exact event name (`db:ready`, `process:exit`, ...).
    Name(String),
    /// Every raw stdout line, regardless of process.
    Stdout,
    /// Every raw stderr line, regardless of process.
    Stderr,
    /// Everything.
    Any,
}

impl EventFilter {
    fn matches(&self, event: &Event) -> bool {
        match self {
            EventFilter::Name(name) => event.name == *name,
            EventFilter::Stdout => event.kind == EventKind::Stdout,
            EventFilter::Stderr => event.kind == EventKind::Stderr,
            EventFilter::Any => true,
        }
    }
}

struct Entry {
    id: u64,
    filter: EventFilter,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Entry>,
}

/// The event bus. Cheap to share; all methods take `&self`.
pub struct EventBus {
    registry: Mutex<Registry>,
    log: Mutex<VecDeque<Event>>,
    pump: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            log: Mutex::new(VecDeque::with_capacity(EVENT_LOG_CAPACITY)),
            pump: Mutex::new(None),
        }
    }

    /// Subscribe a handler; it runs synchronously inside `emit`.
    pub fn on<F>(&self, filter: EventFilter, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut reg = self.registry.lock();
        reg.next_id += 1;
        let id = reg.next_id;
        reg.entries.push(Entry {
            id,
            filter,
            handler: Arc::new(handler),
        });
        Subscription(id)
    }

    /// One-shot subscription to a named event. The receiver resolves with
    /// the first matching event; drop the [`Subscription`] via [`off`]
    /// (always, even on timeout) to avoid a stale entry.
    ///
    /// [`off`]: Self::off
    pub fn once_name(&self, name: &str) -> (Subscription, oneshot::Receiver<Event>) {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let sub = self.on(EventFilter::Name(name.to_string()), move |event| {
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(event.clone());
            }
        });
        (sub, rx)
    }

    /// Remove one subscription; unknown handles are ignored.
    pub fn off(&self, sub: Subscription) {
        self.registry.lock().entries.retain(|e| e.id != sub.0);
    }

    /// Drop every subscription.
    pub fn remove_all_listeners(&self) {
        self.registry.lock().entries.clear();
    }

    /// Dispatch an event: record it, then call each matching handler in
    /// registration order. Handlers may re-enter `emit`.
    pub fn emit(&self, event: &Event) {
        {
            let mut log = self.log.lock();
            if log.len() == EVENT_LOG_CAPACITY {
                log.pop_front();
            }
            log.push_back(event.clone());
        }

        let handlers: Vec<Handler> = {
            let reg = self.registry.lock();
            reg.entries
                .iter()
                .filter(|e| e.filter.matches(event))
                .map(|e| Arc::clone(&e.handler))
                .collect()
        };
        for handler in handlers {
            handler(event);
        }
    }

    /// Attach to a process manager's signal stream; each signal is
    /// normalized and emitted. Idempotent: a second connect replaces the
    /// previous pump task.
    pub fn connect(self: &Arc<Self>, mut signals: mpsc::UnboundedReceiver<ProcessSignal>) {
        let bus = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                let event = normalize(signal);
                bus.emit(&event);
            }
        });
        if let Some(previous) = self.pump.lock().replace(task) {
            previous.abort();
        }
    }

    /// Detach from the process manager. Idempotent.
    pub fn disconnect(&self) {
        if let Some(task) = self.pump.lock().take() {
            task.abort();
        }
    }

    /// Recent events, oldest first, filtered.
    pub fn recent(
        &self,
        process_name: Option<&str>,
        event_type: Option<&str>,
        name: Option<&str>,
        since_ms: Option<u64>,
        limit: Option<usize>,
    ) -> Vec<Event> {
        let log = self.log.lock();
        let filtered: Vec<Event> = log
            .iter()
            .filter(|e| process_name.is_none_or(|p| e.process_name == p))
            .filter(|e| event_type.is_none_or(|t| e.kind_str() == t))
            .filter(|e| name.is_none_or(|n| e.name == n))
            .filter(|e| since_ms.is_none_or(|s| e.timestamp_ms >= s))
            .cloned()
            .collect();
        match limit {
            Some(limit) if filtered.len() > limit => {
                filtered[filtered.len() - limit..].to_vec()
            }
            _ => filtered,
        }
    }
}

/// Translate a raw process signal into its normalized event shape.
fn normalize(signal: ProcessSignal) -> Event {
    match signal {
        ProcessSignal::Stdout { name, line, at_ms } => Event::stdout(&name, &line, at_ms),
        ProcessSignal::Stderr { name, line, at_ms } => Event::stderr(&name, &line, at_ms),
        ProcessSignal::Started { name, pid, at_ms } => Event::process_start(&name, pid, at_ms),
        ProcessSignal::Exited {
            name,
            code,
            signal,
            stdout,
            stderr,
            at_ms,
        } => Event::process_exit(&name, code, signal, stdout, stderr, at_ms),
        ProcessSignal::Restarting {
            name,
            attempt,
            at_ms,
        } => Event::process_restart(&name, attempt, at_ms),
        ProcessSignal::Failed {
            name,
            reason,
            at_ms,
        } => Event::process_error(&name, &reason, at_ms),
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
