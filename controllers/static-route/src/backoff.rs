//! # Fibonacci Backoff
//!
//! Progressive retry delays that grow more slowly than exponential backoff.
//! Used by the reconcile error policy (per-resource) and the node-eviction
//! retry loop. Sequence for the default 60s/600s bounds:
//! 60s, 60s, 120s, 180s, 300s, 480s, 600s (max).

use std::time::Duration;

/// Fibonacci backoff calculator. Each delay is the sum of the previous two,
/// capped at the configured maximum.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_seconds: u64,
    previous_seconds: u64,
    current_seconds: u64,
    max_seconds: u64,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            previous_seconds: 0,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Current delay in seconds; advances the sequence.
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_seconds;
        let next = self.previous_seconds + self.current_seconds;
        self.previous_seconds = self.current_seconds;
        self.current_seconds = next.min(self.max_seconds);
        result
    }

    /// Current delay as a `Duration`; advances the sequence.
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Restart from the minimum after a success.
    pub fn reset(&mut self) {
        self.previous_seconds = 0;
        self.current_seconds = self.min_seconds;
    }
}
