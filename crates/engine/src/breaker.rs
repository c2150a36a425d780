// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Circuit breaker around the orchestrator's event handling.
//!
//! Closed passes calls through and counts outcomes over a rolling window;
//! too many failures opens the circuit, which fails fast until the reset
//! timeout elapses. Half-open admits a single probe: success closes the
//! circuit, failure reopens it.

use clier_core::{CircuitBreakerConfig, Clock};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Outcomes older than this fall out of the error-rate window.
const ROLLING_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// State-change and outcome notifications for listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerNotice {
    Success,
    Failure,
    Timeout,
    Opened,
    HalfOpened,
    Closed,
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit open")]
    Open,

    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    #[error(transparent)]
    Inner(E),
}

struct Core {
    state: BreakerState,
    opened_at: Option<Instant>,
    /// (when, failed) outcomes within the rolling window.
    outcomes: VecDeque<(Instant, bool)>,
    probe_in_flight: bool,
}

type Listener = Arc<dyn Fn(BreakerNotice) + Send + Sync>;

/// Wraps async operations with timeout + error-rate circuit breaking.
pub struct CircuitBreaker<C: Clock> {
    cfg: CircuitBreakerConfig,
    clock: C,
    core: Mutex<Core>,
    listeners: Mutex<Vec<Listener>>,
}

impl<C: Clock> CircuitBreaker<C> {
    pub fn new(cfg: CircuitBreakerConfig, clock: C) -> Self {
        Self {
            cfg,
            clock,
            core: Mutex::new(Core {
                state: BreakerState::Closed,
                opened_at: None,
                outcomes: VecDeque::new(),
                probe_in_flight: false,
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a notification listener (state changes and outcomes).
    pub fn on_notice<F>(&self, listener: F)
    where
        F: Fn(BreakerNotice) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// Disarm: drop all listeners. Open/half-open transitions are computed
    /// lazily, so there are no timers to cancel.
    pub fn shutdown(&self) {
        self.listeners.lock().clear();
    }

    fn notify(&self, notice: BreakerNotice) {
        let listeners: Vec<Listener> = self.listeners.lock().clone();
        for listener in listeners {
            listener(notice);
        }
    }

    /// Current state, accounting for an elapsed reset timeout.
    pub fn state(&self) -> BreakerState {
        let (state, half_opened) = {
            let mut core = self.core.lock();
            let half_opened = self.refresh(&mut core);
            (core.state, half_opened)
        };
        if half_opened {
            self.notify(BreakerNotice::HalfOpened);
        }
        state
    }

    /// Open → HalfOpen once the reset timeout has elapsed. Returns whether
    /// the transition happened; listeners are notified by the caller, off
    /// the core lock.
    fn refresh(&self, core: &mut Core) -> bool {
        if core.state == BreakerState::Open {
            let elapsed = core
                .opened_at
                .map(|at| self.clock.now().duration_since(at))
                .unwrap_or_default();
            if elapsed >= Duration::from_millis(self.cfg.reset_timeout_ms) {
                core.state = BreakerState::HalfOpen;
                core.probe_in_flight = false;
                return true;
            }
        }
        false
    }

    /// Run `op` under the breaker's admission control and timeout.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let (admitted, half_opened) = {
            let mut core = self.core.lock();
            let half_opened = self.refresh(&mut core);
            let admitted = match core.state {
                BreakerState::Open => false,
                BreakerState::HalfOpen => {
                    if core.probe_in_flight {
                        false
                    } else {
                        core.probe_in_flight = true;
                        true
                    }
                }
                BreakerState::Closed => true,
            };
            (admitted, half_opened)
        };
        if half_opened {
            self.notify(BreakerNotice::HalfOpened);
        }
        if !admitted {
            return Err(BreakerError::Open);
        }

        let timeout = Duration::from_millis(self.cfg.timeout_ms);
        match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => {
                self.record(false, BreakerNotice::Success);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record(true, BreakerNotice::Failure);
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                self.record(true, BreakerNotice::Timeout);
                Err(BreakerError::Timeout(self.cfg.timeout_ms))
            }
        }
    }

    fn record(&self, failed: bool, notice: BreakerNotice) {
        let transition = {
            let mut core = self.core.lock();
            match core.state {
                BreakerState::HalfOpen => {
                    core.probe_in_flight = false;
                    if failed {
                        core.state = BreakerState::Open;
                        core.opened_at = Some(self.clock.now());
                        Some(BreakerNotice::Opened)
                    } else {
                        core.state = BreakerState::Closed;
                        core.outcomes.clear();
                        Some(BreakerNotice::Closed)
                    }
                }
                BreakerState::Closed => {
                    let now = self.clock.now();
                    core.outcomes.push_back((now, failed));
                    while core
                        .outcomes
                        .front()
                        .is_some_and(|(at, _)| now.duration_since(*at) >= ROLLING_WINDOW)
                    {
                        core.outcomes.pop_front();
                    }
                    let total = core.outcomes.len() as u32;
                    let failures = core.outcomes.iter().filter(|(_, f)| *f).count() as u32;
                    if total >= self.cfg.volume_threshold
                        && failures * 100 >= u32::from(self.cfg.error_threshold) * total
                    {
                        core.state = BreakerState::Open;
                        core.opened_at = Some(self.clock.now());
                        Some(BreakerNotice::Opened)
                    } else {
                        None
                    }
                }
                // A late completion after someone else opened the circuit.
                BreakerState::Open => None,
            }
        };

        self.notify(notice);
        if let Some(transition) = transition {
            self.notify(transition);
        }
    }
}

#[cfg(test)]
#[path = "breaker_tests.rs"]
mod tests;
