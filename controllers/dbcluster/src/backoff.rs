//! # Requeue Backoff
//!
//! Failed reconciles are requeued on a Fibonacci schedule per cluster, so a
//! cluster stuck on an API error backs off without delaying healthy ones.
//! Sequence in seconds with the defaults: 5, 5, 10, 15, 25, 40, 65, ... capped at 300.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Fibonacci sequence of delays, capped at a maximum.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    unit: Duration,
    max: Duration,
    prev: u32,
    current: u32,
}

impl FibonacciBackoff {
    /// `unit` is the first (and second) delay; every delay is a Fibonacci multiple of it.
    #[must_use]
    pub fn new(unit: Duration, max: Duration) -> Self {
        Self {
            unit,
            max,
            prev: 0,
            current: 1,
        }
    }

    /// Return the next delay and advance the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.unit.saturating_mul(self.current).min(self.max);
        if delay < self.max {
            let next = self.prev.saturating_add(self.current);
            self.prev = self.current;
            self.current = next;
        }
        delay
    }

    pub fn reset(&mut self) {
        self.prev = 0;
        self.current = 1;
    }
}

/// Per-cluster backoff state, keyed by `namespace/name`.
#[derive(Debug)]
pub struct BackoffTracker {
    unit: Duration,
    max: Duration,
    states: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl BackoffTracker {
    pub fn new(unit: Duration, max: Duration) -> Self {
        Self {
            unit,
            max,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Delay before retrying a failed reconcile of `key`.
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states
            .entry(key.to_string())
            .or_insert_with(|| FibonacciBackoff::new(self.unit, self.max))
            .next_delay()
    }

    /// Forget the failure history of `key` after a successful reconcile.
    pub fn reset(&self, key: &str) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.remove(key);
    }
}

impl Default for BackoffTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(300))
    }
}
