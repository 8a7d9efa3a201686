//! Request metrics counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Monotonic request counters kept by the fetcher.
///
/// Counters only ever increase; readers take a [`MetricsSnapshot`] rather
/// than observing the atomics directly.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    cached: AtomicU64,
    retry_attempts: AtomicU64,
    total_time_us: AtomicU64,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request answered from the network.
    pub fn record_success(&self, elapsed: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.successful.fetch_add(1, Ordering::Relaxed);
        self.add_time(elapsed);
    }

    /// Record a request answered from the cache.
    pub fn record_cached(&self, elapsed: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.successful.fetch_add(1, Ordering::Relaxed);
        self.cached.fetch_add(1, Ordering::Relaxed);
        self.add_time(elapsed);
    }

    /// Record a request that failed after all attempts.
    pub fn record_failure(&self, elapsed: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.add_time(elapsed);
    }

    /// Record one retry of an in-flight request.
    pub fn record_retry(&self) {
        self.retry_attempts.fetch_add(1, Ordering::Relaxed);
    }

    fn add_time(&self, elapsed: Duration) {
        self.total_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Take a consistent-enough point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let total_time_us = self.total_time_us.load(Ordering::Relaxed);
        MetricsSnapshot {
            total,
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cached: self.cached.load(Ordering::Relaxed),
            retry_attempts: self.retry_attempts.load(Ordering::Relaxed),
            total_time_secs: total_time_us as f64 / 1_000_000.0,
            avg_time_secs: if total > 0 {
                total_time_us as f64 / 1_000_000.0 / total as f64
            } else {
                0.0
            },
        }
    }
}

/// Plain-value copy of the metrics, suitable for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub cached: u64,
    pub retry_attempts: u64,
    pub total_time_secs: f64,
    pub avg_time_secs: f64,
}
