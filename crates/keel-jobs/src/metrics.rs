//! In-process outcome counters.

use std::sync::atomic::{AtomicU64, Ordering};

use keel_core::MetricsSink;

/// Default [`MetricsSink`]: two monotonically increasing counters.
#[derive(Debug, Default)]
pub struct JobCounters {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`JobCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub succeeded: u64,
    pub failed: u64,
}

impl JobCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSink for JobCounters {
    fn job_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    fn job_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        assert_eq!(JobCounters::new().snapshot(), CountersSnapshot::default());
    }

    #[test]
    fn test_counters_increment() {
        let counters = JobCounters::new();
        counters.job_succeeded();
        counters.job_succeeded();
        counters.job_failed();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.succeeded, 2);
        assert_eq!(snapshot.failed, 1);
    }
}
