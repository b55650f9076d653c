//! Shard Module
//!
//! One independently locked partition of the cache's key space.
//!
//! # Design
//!
//! - Each shard owns a `tokio::sync::Mutex`, so acquiring it is a suspension point
//! - Every acquisition is reported to the metrics collector with its wait time
//! - The entry count is mirrored in an atomic so `size()` never takes a lock

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, MutexGuard};

use crate::cache::{CacheEntry, MetricsCollector};

/// Shard that owns `key` among `shard_count` shards.
///
/// Deterministic for the lifetime of the process, so a key never moves
/// between shards.
pub fn shard_index(key: &str, shard_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shard_count as u64) as usize
}

// == Shard ==
#[derive(Debug)]
pub struct Shard<V> {
    index: usize,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    len: AtomicUsize,
}

impl<V> Shard<V> {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            entries: Mutex::new(HashMap::new()),
            len: AtomicUsize::new(0),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Entry count as of the last released lock. Lock-free.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // == Lock ==
    /// Acquires the shard lock, recording whether it was contended.
    pub async fn lock<'a>(&'a self, metrics: &MetricsCollector) -> ShardGuard<'a, V> {
        let guard = match self.entries.try_lock() {
            Ok(guard) => {
                metrics.record_lock_acquisition(self.index, false, Duration::ZERO);
                guard
            }
            Err(_) => {
                let started = Instant::now();
                let guard = self.entries.lock().await;
                metrics.record_lock_acquisition(self.index, true, started.elapsed());
                guard
            }
        };

        ShardGuard {
            guard,
            len: &self.len,
        }
    }
}

// == Shard Guard ==
/// Exclusive access to a shard's map. Publishes the entry count on drop.
pub struct ShardGuard<'a, V> {
    guard: MutexGuard<'a, HashMap<String, CacheEntry<V>>>,
    len: &'a AtomicUsize,
}

impl<V> Deref for ShardGuard<'_, V> {
    type Target = HashMap<String, CacheEntry<V>>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<V> DerefMut for ShardGuard<'_, V> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<V> Drop for ShardGuard<'_, V> {
    fn drop(&mut self) {
        self.len.store(self.guard.len(), Ordering::Relaxed);
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_shard_index_is_stable_and_in_range() {
        for key in ["a", "b", "job:42", ""] {
            let first = shard_index(key, 16);
            assert!(first < 16);
            assert_eq!(first, shard_index(key, 16));
        }
        assert_eq!(shard_index("anything", 1), 0);
    }

    #[tokio::test]
    async fn test_guard_publishes_len() {
        let metrics = MetricsCollector::new(1);
        let shard: Shard<u32> = Shard::new(0);
        assert!(shard.is_empty());

        {
            let mut guard = shard.lock(&metrics).await;
            guard.insert("a".to_string(), CacheEntry::new(1, 0, 60));
            guard.insert("b".to_string(), CacheEntry::new(2, 0, 60));
        }
        assert_eq!(shard.len(), 2);

        {
            let mut guard = shard.lock(&metrics).await;
            guard.remove("a");
        }
        assert_eq!(shard.len(), 1);
    }

    #[tokio::test]
    async fn test_uncontended_lock_is_recorded() {
        let metrics = MetricsCollector::new(1);
        let shard: Shard<u32> = Shard::new(0);

        drop(shard.lock(&metrics).await);
        drop(shard.lock(&metrics).await);

        let detailed = metrics.detailed(&[0], 10);
        assert_eq!(detailed.shards[0].acquisitions, 2);
        assert_eq!(detailed.shards[0].contentions, 0);
    }

    #[tokio::test]
    async fn test_contended_lock_is_recorded() {
        let metrics = Arc::new(MetricsCollector::new(1));
        let shard: Arc<Shard<u32>> = Arc::new(Shard::new(0));

        let guard = shard.lock(&metrics).await;

        let waiter = {
            let shard = shard.clone();
            let metrics = metrics.clone();
            tokio::spawn(async move {
                drop(shard.lock(&metrics).await);
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
        waiter.await.unwrap();

        assert_eq!(metrics.contention_counts(), vec![1]);
    }
}
