//! Inter-sweep pause with exponential backoff after failed sweeps.

use chainevents_core::backoff_delay;
use std::time::Duration;

/// Stateful sweep pacer.
///
/// A healthy sweep waits `interval`. Each consecutive failed sweep waits
/// `initial * 2^(n-1)`, capped at `max`. The next healthy sweep resets it.
#[derive(Debug, Clone)]
pub struct Backoff {
    interval: Duration,
    initial: Duration,
    max: Duration,
    multiplier: f64,
    failures: u32,
}

impl Backoff {
    pub fn new(interval: Duration, initial: Duration, max: Duration) -> Self {
        Self {
            interval,
            initial,
            max,
            multiplier: 2.0,
            failures: 0,
        }
    }

    /// Delay before the `attempt`-th consecutive failed retry (1-based).
    pub fn failure_delay(&self, attempt: u32) -> Duration {
        backoff_delay(self.initial, self.multiplier, attempt, self.max)
    }

    pub fn on_success(&mut self) -> Duration {
        self.failures = 0;
        self.interval
    }

    pub fn on_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.failure_delay(self.failures)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }
}
