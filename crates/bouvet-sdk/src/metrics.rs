//! Client-side request metrics.
//!
//! Counters are plain atomics so parallel fork branches and `parallel_map`
//! workers can record into the same [`ClientMetrics`] without a lock. Rates
//! are derived on read and are `0.0` until the first request.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Rolling counters for one client instance.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    /// Logical requests issued (one per `execute`, not per attempt).
    total_requests: AtomicU64,
    /// Results counted as cache hits.
    cache_hits: AtomicU64,
    /// Sum of measured latencies, in microseconds.
    total_latency_us: AtomicU64,
    /// Requests that ended in an error.
    errors: AtomicU64,
}

impl ClientMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed request.
    pub(crate) fn record_success(&self, latency: Duration, cache_hit: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.add_latency(latency);
        if cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a failed request.
    pub(crate) fn record_error(&self, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.add_latency(latency);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn add_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.total_latency_us.fetch_add(micros, Ordering::Relaxed);
    }

    /// Get the number of requests.
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Get the number of cache hits.
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Get the number of failed requests.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Get the accumulated latency.
    pub fn total_latency(&self) -> Duration {
        Duration::from_micros(self.total_latency_us.load(Ordering::Relaxed))
    }

    /// Fraction of requests served from cache.
    pub fn cache_hit_rate(&self) -> f64 {
        ratio(self.cache_hits(), self.total_requests())
    }

    /// Fraction of requests that failed.
    pub fn error_rate(&self) -> f64 {
        ratio(self.errors(), self.total_requests())
    }

    /// Mean latency per request.
    pub fn average_latency(&self) -> Duration {
        match self.total_requests() {
            0 => Duration::ZERO,
            n => Duration::from_micros(self.total_latency_us.load(Ordering::Relaxed) / n),
        }
    }

    /// Copy the counters and derived rates into a plain report.
    pub fn snapshot(&self) -> MetricsReport {
        let total_requests = self.total_requests();
        let cache_hits = self.cache_hits();
        let errors = self.errors();
        let total_latency = self.total_latency();
        MetricsReport {
            total_requests,
            cache_hits,
            errors,
            total_latency_ms: total_latency.as_secs_f64() * 1000.0,
            cache_hit_rate: ratio(cache_hits, total_requests),
            error_rate: ratio(errors, total_requests),
            average_latency_ms: match total_requests {
                0 => 0.0,
                n => total_latency.as_secs_f64() * 1000.0 / n as f64,
            },
        }
    }

    /// Zero every counter.
    ///
    /// Not atomic across counters: requests finishing during a reset may be
    /// partially recorded.
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.total_latency_us.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// Point-in-time copy of [`ClientMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsReport {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub errors: u64,
    pub total_latency_ms: f64,
    pub cache_hit_rate: f64,
    pub error_rate: f64,
    pub average_latency_ms: f64,
}
