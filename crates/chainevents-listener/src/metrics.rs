//! Listener counters.

use serde::Serialize;

/// Cumulative counters for an [`EventListener`](crate::EventListener).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListenerMetrics {
    pub sweeps: u64,
    pub logs_received: u64,
    pub events_published: u64,
    pub decode_errors: u64,
    pub poll_errors: u64,
    pub subscription_errors: u64,
    pub timestamp_errors: u64,
    pub handler_failures: u64,
    pub resubscriptions: u64,
}

/// Outcome of one pass over the active filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub filters_polled: usize,
    pub filters_failed: usize,
    pub logs: usize,
    pub published: usize,
    pub decode_errors: usize,
    pub removed_skipped: usize,
}

impl SweepReport {
    /// Every polled filter failed. An empty sweep is not a failure.
    pub fn all_failed(&self) -> bool {
        self.filters_polled > 0 && self.filters_failed == self.filters_polled
    }

    pub(crate) fn apply_to(&self, m: &mut ListenerMetrics) {
        m.sweeps += 1;
        m.logs_received += self.logs as u64;
        m.events_published += self.published as u64;
        m.decode_errors += self.decode_errors as u64;
        m.poll_errors += self.filters_failed as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_failed_requires_polls() {
        assert!(!SweepReport::default().all_failed());
        let r = SweepReport {
            filters_polled: 2,
            filters_failed: 2,
            ..Default::default()
        };
        assert!(r.all_failed());
        let r = SweepReport {
            filters_polled: 3,
            filters_failed: 1,
            ..Default::default()
        };
        assert!(!r.all_failed());
    }
}
