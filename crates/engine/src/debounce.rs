// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coalesce bursts of keyed operations into one trailing call.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct Pending {
    generation: u64,
    timer: tokio::task::JoinHandle<()>,
}

/// Keyed trailing-edge debouncer.
///
/// `debounce(key, op)` arms (or re-arms) a quiet-window timer for the key;
/// when it fires, the most recently supplied `op` runs. At most one
/// operation is ever pending per key.
pub struct Debouncer {
    delay: Duration,
    pending: Arc<Mutex<HashMap<String, Pending>>>,
    generation: Arc<Mutex<u64>>,
}

impl Debouncer {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(Mutex::new(0)),
        }
    }

    /// Schedule `op` to run after the quiet window; an earlier pending op
    /// under the same key is discarded and its timer reset.
    pub fn debounce<F>(&self, key: &str, op: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = {
            let mut counter = self.generation.lock();
            *counter += 1;
            *counter
        };

        let pending = Arc::clone(&self.pending);
        let timer_key = key.to_string();
        let delay = self.delay;
        // Hold the map lock across spawn + insert so a zero-delay timer
        // cannot observe the map before its own entry lands.
        let mut map = self.pending.lock();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let still_current = {
                let mut map = pending.lock();
                match map.get(&timer_key) {
                    Some(entry) if entry.generation == generation => {
                        map.remove(&timer_key);
                        true
                    }
                    _ => false,
                }
            };
            // The op runs outside the lock; it may re-enter the debouncer.
            if still_current {
                op();
            }
        });

        if let Some(previous) = map.insert(
            key.to_string(),
            Pending {
                generation,
                timer,
            },
        ) {
            previous.timer.abort();
        }
    }

    /// Drop the pending op for `key` without running it.
    pub fn cancel(&self, key: &str) {
        if let Some(entry) = self.pending.lock().remove(key) {
            entry.timer.abort();
        }
    }

    /// Drop every pending op.
    pub fn cancel_all(&self) {
        let mut map = self.pending.lock();
        for (_, entry) in map.drain() {
            entry.timer.abort();
        }
    }

    /// Number of keys with an armed timer.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
#[path = "debounce_tests.rs"]
mod tests;
