// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sliding-window rate limiter with FIFO admission.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};

/// The rolling window the cap applies to.
const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Error, PartialEq)]
pub enum RateLimitError {
    #[error("max ops per minute must be positive")]
    InvalidLimit,

    #[error("rate limiter stopped")]
    Stopped,
}

#[derive(Debug)]
struct Shared {
    /// Admission timestamps within the last window. Guarded by the tokio
    /// mutex so waiters are admitted strictly FIFO.
    window: tokio::sync::Mutex<VecDeque<Instant>>,
    max_per_minute: AtomicU32,
    stopped: AtomicBool,
    drop_waiting: AtomicBool,
    stop_notify: Notify,
}

/// Caps scheduled operations to N per rolling minute.
///
/// `schedule` admits callers in submission order (the fair queue of the
/// internal mutex) and returns the operation's own output unchanged.
#[derive(Debug)]
pub struct RateLimiter {
    shared: Arc<Shared>,
}

impl RateLimiter {
    /// Rejects a non-positive cap synchronously.
    pub fn new(max_ops_per_minute: u32) -> Result<Self, RateLimitError> {
        if max_ops_per_minute == 0 {
            return Err(RateLimitError::InvalidLimit);
        }
        Ok(Self {
            shared: Arc::new(Shared {
                window: tokio::sync::Mutex::new(VecDeque::new()),
                max_per_minute: AtomicU32::new(max_ops_per_minute),
                stopped: AtomicBool::new(false),
                drop_waiting: AtomicBool::new(false),
                stop_notify: Notify::new(),
            }),
        })
    }

    /// Retune the cap at runtime; takes effect for the next admission.
    pub fn update_max_ops_per_minute(&self, max: u32) -> Result<(), RateLimitError> {
        if max == 0 {
            return Err(RateLimitError::InvalidLimit);
        }
        self.shared.max_per_minute.store(max, Ordering::SeqCst);
        Ok(())
    }

    /// Refuse new submissions. With `drop_waiting`, callers queued for a
    /// slot are rejected too; otherwise they drain normally.
    pub fn stop(&self, drop_waiting: bool) {
        self.shared.drop_waiting.store(drop_waiting, Ordering::SeqCst);
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.shared.stop_notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Run `op` once a slot in the rolling window frees up. FIFO across
    /// all `schedule` calls; the op itself runs outside the queue.
    pub async fn schedule<F, Fut, T>(&self, op: F) -> Result<T, RateLimitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let shared = &self.shared;
        if shared.stopped.load(Ordering::SeqCst) {
            return Err(RateLimitError::Stopped);
        }

        {
            // Fair mutex: waiters are admitted in submission order. The
            // guard is held across the in-window sleep on purpose; that
            // sleep IS the FIFO queue's head-of-line wait.
            let mut window = shared.window.lock().await;
            loop {
                if shared.stopped.load(Ordering::SeqCst)
                    && shared.drop_waiting.load(Ordering::SeqCst)
                {
                    return Err(RateLimitError::Stopped);
                }
                let now = Instant::now();
                while window.front().is_some_and(|t| now.duration_since(*t) >= WINDOW) {
                    window.pop_front();
                }
                let max = shared.max_per_minute.load(Ordering::SeqCst) as usize;
                if window.len() < max {
                    window.push_back(now);
                    break;
                }
                let free_at = match window.front() {
                    Some(oldest) => *oldest + WINDOW,
                    None => now,
                };
                tokio::select! {
                    _ = tokio::time::sleep_until(free_at) => {}
                    _ = shared.stop_notify.notified() => {}
                }
            }
        }

        Ok(op().await)
    }
}

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod tests;
