//! Cache Metrics Module
//!
//! Tracks hits, misses, evictions, sets, errors, and per-shard lock
//! contention. Counters are relaxed atomics so recording never contends
//! with the shard locks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

// == Per-Shard Lock Stats ==
#[derive(Debug, Default)]
struct ShardLockStats {
    acquisitions: AtomicU64,
    contentions: AtomicU64,
    wait_nanos: AtomicU64,
}

/// Point-in-time view of one shard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShardMetrics {
    pub index: usize,
    pub entries: usize,
    pub acquisitions: u64,
    pub contentions: u64,
    /// Mean wait per acquisition in microseconds, 0 when never acquired
    pub avg_acquisition_micros: f64,
}

/// Aggregated engine metrics.
///
/// Best-effort snapshot: counters are read one at a time while other tasks
/// may still be writing.
#[derive(Debug, Clone, Serialize)]
pub struct DetailedMetrics {
    pub total_entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub errors: u64,
    pub hit_rate: f64,
    pub uptime_secs: f64,
    pub requests_per_second: f64,
    pub efficiency_score: f64,
    pub shards: Vec<ShardMetrics>,
}

// == Metrics Collector ==
/// Thread-safe counters shared by every shard of one engine.
#[derive(Debug)]
pub struct MetricsCollector {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    shards: Vec<ShardLockStats>,
    started: Mutex<Instant>,
}

impl MetricsCollector {
    // == Constructor ==
    /// Creates a collector with zeroed counters for `shard_count` shards.
    pub fn new(shard_count: usize) -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            shards: (0..shard_count).map(|_| ShardLockStats::default()).collect(),
            started: Mutex::new(Instant::now()),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    // == Lock Contention ==
    /// Records one acquisition of shard `index`'s lock.
    ///
    /// `contended` is true when the lock was already held and the caller had
    /// to wait for `wait`.
    pub fn record_lock_acquisition(&self, index: usize, contended: bool, wait: Duration) {
        if let Some(stats) = self.shards.get(index) {
            stats.acquisitions.fetch_add(1, Ordering::Relaxed);
            if contended {
                stats.contentions.fetch_add(1, Ordering::Relaxed);
                stats
                    .wait_nanos
                    .fetch_add(wait.as_nanos() as u64, Ordering::Relaxed);
            }
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Contended acquisitions per shard, by index.
    pub fn contention_counts(&self) -> Vec<u64> {
        self.shards
            .iter()
            .map(|s| s.contentions.load(Ordering::Relaxed))
            .collect()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.lock().elapsed()
    }

    // == Efficiency Score ==
    /// Heuristic health indicator in `0..=100`.
    ///
    /// Hit rate carries 70 points, a low eviction-to-set ratio 20, and
    /// remaining headroom 10.
    pub fn efficiency_score(&self, total_entries: usize, max_entries: usize) -> f64 {
        let sets = self.sets().max(1) as f64;
        let eviction_ratio = (self.evictions() as f64 / sets).min(1.0);
        let fill = if max_entries == 0 {
            1.0
        } else {
            (total_entries as f64 / max_entries as f64).min(1.0)
        };

        let score = 70.0 * self.hit_rate() + 20.0 * (1.0 - eviction_ratio) + 10.0 * (1.0 - fill);
        score.clamp(0.0, 100.0)
    }

    // == Detailed Metrics ==
    /// Aggregates counters with the given per-shard entry counts.
    pub fn detailed(&self, shard_sizes: &[usize], max_entries: usize) -> DetailedMetrics {
        let total_entries: usize = shard_sizes.iter().sum();
        let uptime = self.uptime().as_secs_f64();
        let requests = (self.hits() + self.misses() + self.sets() + self.deletes()) as f64;
        let requests_per_second = if uptime > 0.0 { requests / uptime } else { 0.0 };

        let shards = self
            .shards
            .iter()
            .enumerate()
            .map(|(index, stats)| {
                let acquisitions = stats.acquisitions.load(Ordering::Relaxed);
                let wait_nanos = stats.wait_nanos.load(Ordering::Relaxed);
                ShardMetrics {
                    index,
                    entries: shard_sizes.get(index).copied().unwrap_or(0),
                    acquisitions,
                    contentions: stats.contentions.load(Ordering::Relaxed),
                    avg_acquisition_micros: if acquisitions == 0 {
                        0.0
                    } else {
                        wait_nanos as f64 / acquisitions as f64 / 1_000.0
                    },
                }
            })
            .collect();

        DetailedMetrics {
            total_entries,
            max_entries,
            hits: self.hits(),
            misses: self.misses(),
            sets: self.sets(),
            deletes: self.deletes(),
            evictions: self.evictions(),
            errors: self.errors(),
            hit_rate: self.hit_rate(),
            uptime_secs: uptime,
            requests_per_second,
            efficiency_score: self.efficiency_score(total_entries, max_entries),
            shards,
        }
    }

    // == Reset ==
    /// Zeroes every counter and restarts the uptime clock.
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.evictions,
            &self.sets,
            &self.deletes,
            &self.errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        for stats in &self.shards {
            stats.acquisitions.store(0, Ordering::Relaxed);
            stats.contentions.store(0, Ordering::Relaxed);
            stats.wait_nanos.store(0, Ordering::Relaxed);
        }
        *self.started.lock() = Instant::now();
    }
}

// == Hot Shards ==
/// Returns the indices whose value lies strictly above the `percentile`
/// (0-100, nearest-rank) of `values`.
pub fn hot_shards(values: &[u64], percentile: f64) -> Vec<usize> {
    if values.is_empty() {
        return Vec::new();
    }

    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    let pct = percentile.clamp(0.0, 100.0);
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    let threshold = sorted[rank.saturating_sub(1).min(sorted.len() - 1)];

    values
        .iter()
        .enumerate()
        .filter(|(_, v)| **v > threshold)
        .map(|(i, _)| i)
        .collect()
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = MetricsCollector::new(4);
        assert_eq!(metrics.hits(), 0);
        assert_eq!(metrics.misses(), 0);
        assert_eq!(metrics.evictions(), 0);
        assert_eq!(metrics.contention_counts(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let metrics = MetricsCollector::new(1);
        assert_eq!(metrics.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let metrics = MetricsCollector::new(1);
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        assert_eq!(metrics.hit_rate(), 0.75);
    }

    #[test]
    fn test_record_eviction_batches() {
        let metrics = MetricsCollector::new(1);
        metrics.record_eviction(1);
        metrics.record_eviction(3);
        assert_eq!(metrics.evictions(), 4);
    }

    #[test]
    fn test_lock_contention_tracking() {
        let metrics = MetricsCollector::new(2);
        metrics.record_lock_acquisition(0, false, Duration::ZERO);
        metrics.record_lock_acquisition(1, true, Duration::from_micros(40));
        metrics.record_lock_acquisition(1, false, Duration::ZERO);
        // Out-of-range indices are ignored
        metrics.record_lock_acquisition(9, true, Duration::from_secs(1));

        let detailed = metrics.detailed(&[3, 5], 100);
        assert_eq!(detailed.shards[0].acquisitions, 1);
        assert_eq!(detailed.shards[0].contentions, 0);
        assert_eq!(detailed.shards[1].acquisitions, 2);
        assert_eq!(detailed.shards[1].contentions, 1);
        assert!((detailed.shards[1].avg_acquisition_micros - 20.0).abs() < 1e-9);
        assert_eq!(detailed.total_entries, 8);
    }

    #[test]
    fn test_efficiency_score_bounds() {
        let metrics = MetricsCollector::new(1);
        // No traffic, empty cache: no hit credit, full eviction and headroom credit
        assert_eq!(metrics.efficiency_score(0, 100), 30.0);

        for _ in 0..10 {
            metrics.record_hit();
            metrics.record_set();
        }
        assert_eq!(metrics.efficiency_score(0, 100), 100.0);

        metrics.record_eviction(50);
        let score = metrics.efficiency_score(100, 100);
        assert_eq!(score, 70.0);
    }

    #[test]
    fn test_reset() {
        let metrics = MetricsCollector::new(1);
        metrics.record_hit();
        metrics.record_error();
        metrics.record_lock_acquisition(0, true, Duration::from_millis(1));
        metrics.reset();

        assert_eq!(metrics.hits(), 0);
        assert_eq!(metrics.errors(), 0);
        assert_eq!(metrics.contention_counts(), vec![0]);
    }

    #[test]
    fn test_hot_shards_above_percentile() {
        let sizes = vec![1, 1, 2, 10];
        assert_eq!(hot_shards(&sizes, 75.0), vec![3]);
        assert_eq!(hot_shards(&sizes, 50.0), vec![2, 3]);
        assert!(hot_shards(&sizes, 100.0).is_empty());
    }

    #[test]
    fn test_hot_shards_uniform_distribution() {
        let sizes = vec![4, 4, 4, 4];
        assert!(hot_shards(&sizes, 90.0).is_empty());
        assert!(hot_shards(&[], 90.0).is_empty());
    }
}
