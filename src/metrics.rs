//! Pipeline counters and timers
//!
//! Lock-free atomics; `snapshot()` gives a consistent-enough copy for
//! dashboards and tests.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters for one pipeline instance
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    sink_failures: AtomicU64,
    processing_nanos: AtomicU64,
    max_processing_nanos: AtomicU64,
}

/// Point-in-time copy of `PipelineMetrics`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retries: u64,
    pub sink_failures: u64,
    pub total_processing_time: Duration,
    pub max_processing_time: Duration,
}

impl MetricsSnapshot {
    /// Mean time per processed event
    pub fn mean_processing_time(&self) -> Duration {
        if self.processed == 0 {
            return Duration::ZERO;
        }
        self.total_processing_time / u32::try_from(self.processed).unwrap_or(u32::MAX)
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the duration of one `process` call
    pub fn record_processing_time(&self, elapsed: Duration) {
        let nanos = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.processing_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_processing_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            total_processing_time: Duration::from_nanos(
                self.processing_nanos.load(Ordering::Relaxed),
            ),
            max_processing_time: Duration::from_nanos(
                self.max_processing_nanos.load(Ordering::Relaxed),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = PipelineMetrics::new();
        metrics.record_success();
        metrics.record_success();
        metrics.record_failure();
        metrics.record_retry();
        metrics.record_sink_failure();

        let snap = metrics.snapshot();
        assert_eq!(snap.succeeded, 2);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.retries, 1);
        assert_eq!(snap.sink_failures, 1);
    }

    #[test]
    fn test_timer() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.snapshot().mean_processing_time(), Duration::ZERO);

        metrics.record_processing_time(Duration::from_millis(10));
        metrics.record_processing_time(Duration::from_millis(30));

        let snap = metrics.snapshot();
        assert_eq!(snap.processed, 2);
        assert_eq!(snap.total_processing_time, Duration::from_millis(40));
        assert_eq!(snap.max_processing_time, Duration::from_millis(30));
        assert_eq!(snap.mean_processing_time(), Duration::from_millis(20));
    }
}
