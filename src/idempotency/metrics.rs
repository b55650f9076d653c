//! Idempotency coordinator counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time coordinator metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdempotencyMetrics {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub storage_errors: u64,
    pub expired_cleanups: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    storage_errors: AtomicU64,
    expired_cleanups: AtomicU64,
}

impl Counters {
    pub(crate) fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_storage_error(&self) {
        self.storage_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expired_cleanup(&self) {
        self.expired_cleanups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> IdempotencyMetrics {
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = cache_hits + cache_misses;

        IdempotencyMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                cache_hits as f64 / lookups as f64
            },
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            expired_cleanups: self.expired_cleanups.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_hit_rate() {
        let counters = Counters::default();
        assert_eq!(counters.snapshot().hit_rate, 0.0);

        counters.record_request();
        counters.record_hit();
        counters.record_request();
        counters.record_miss();
        counters.record_storage_error();

        let metrics = counters.snapshot();
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.hit_rate, 0.5);
        assert_eq!(metrics.storage_errors, 1);
        assert_eq!(metrics.expired_cleanups, 0);
    }
}
