//! Per-key debounce timers.
//!
//! One slot per `(path, op)` key. Each slot is an abortable sleep task;
//! re-scheduling a key replaces the slot, so the last raw event observed
//! within the window wins. The map has its own mutex, separate from the
//! registry's, and entries remove themselves before dispatching.

use super::raw::{OpMask, RawEvent};
use super::registry::Registry;
use crate::config::{SLOW_WAIT_MS, WAIT_FOR_MS};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

pub(crate) struct Debouncer {
    timers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    wait_for: Duration,
    slow_wait: Duration,
}

impl Debouncer {
    pub fn new() -> Self {
        Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            wait_for: Duration::from_millis(WAIT_FOR_MS),
            // Rename halves need the extra window to pair up.
            slow_wait: Duration::from_millis(SLOW_WAIT_MS),
        }
    }

    /// Upsert the slot for this event's key and (re)start its timer.
    pub fn schedule(&self, registry: Arc<Registry>, raw: RawEvent) {
        let key = raw.key();
        let delay = if raw.mask.has(OpMask::RENAME) {
            self.slow_wait
        } else {
            self.wait_for
        };
        let timers = Arc::clone(&self.timers);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            timers.lock().unwrap().remove(&task_key);
            registry.fire(raw);
        });
        if let Some(previous) = self.timers.lock().unwrap().insert(key, handle) {
            previous.abort();
        }
    }

    /// Drop a pending slot without firing it.
    pub fn cancel(&self, key: &str) {
        if let Some(handle) = self.timers.lock().unwrap().remove(key) {
            handle.abort();
        }
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.timers.lock().unwrap().len()
    }
}
