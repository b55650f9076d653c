//! TTL Cache Engine
//!
//! Sharded cache combining per-shard storage with eviction, TTL expiration,
//! metrics, snapshots, and transactions.
//!
//! Each key lives in exactly one shard, chosen by `hash(key) mod shard_count`.
//! Operations lock only the shard they touch, so operations on different
//! shards are not ordered with respect to each other and whole-cache views
//! (`size`, `clear`, snapshots, sweeps) are not atomic.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::metrics::hot_shards;
use crate::cache::shard::{shard_index, Shard, ShardGuard};
use crate::cache::snapshot::{
    read_snapshot, write_snapshot, CacheSnapshot, SnapshotEntry, SnapshotManager, SNAPSHOT_VERSION,
};
use crate::cache::{CacheEntry, DetailedMetrics, EvictionPolicy, MetricsCollector, TransactionLog, TxOp};
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::tasks::PeriodicTask;

struct CacheInner<V> {
    shards: Vec<Shard<V>>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    metrics: MetricsCollector,
    transaction: TransactionLog<V>,
    sweeper: Mutex<Option<PeriodicTask>>,
}

// == TTL Cache ==
/// Cheaply cloneable handle to a sharded TTL cache.
///
/// Clones share the same shards. The background sweep holds only a weak
/// reference, so dropping every handle also stops the sweep.
pub struct TtlCache<V> {
    inner: Arc<CacheInner<V>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("config", &self.inner.config)
            .field("shards", &self.inner.shards.len())
            .finish()
    }
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a cache reading time from the system clock.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a cache reading time from `clock`.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let shards = (0..config.shard_count).map(Shard::new).collect();
        let metrics = MetricsCollector::new(config.shard_count);

        Ok(Self {
            inner: Arc::new(CacheInner {
                shards,
                config,
                clock,
                metrics,
                transaction: TransactionLog::new(),
                sweeper: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.inner.metrics
    }

    pub fn shard_count(&self) -> usize {
        self.inner.shards.len()
    }

    /// Index of the shard that owns `key`.
    pub fn shard_index(&self, key: &str) -> usize {
        shard_index(key, self.shard_count())
    }

    fn shard_for(&self, key: &str) -> &Shard<V> {
        // Indexing failure here means the shard table is corrupt; let it panic.
        &self.inner.shards[self.shard_index(key)]
    }

    fn now(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    // == Get ==
    /// Retrieves a value by key.
    ///
    /// Expired entries are removed and counted as both a miss and an eviction.
    pub async fn get(&self, key: &str) -> Option<V> {
        let metrics = &self.inner.metrics;
        let now = self.now();
        let mut entries = self.shard_for(key).lock(metrics).await;

        let expired = match entries.get(key) {
            None => {
                metrics.record_miss();
                return None;
            }
            Some(entry) => entry.is_expired_at(now),
        };

        if expired {
            entries.remove(key);
            metrics.record_miss();
            metrics.record_eviction(1);
            return None;
        }

        let entry = entries.get_mut(key)?;
        entry.touch(now);
        metrics.record_hit();
        Some(entry.value.clone())
    }

    // == Contains ==
    /// Reports whether a live entry exists without touching it or counting a
    /// hit or miss. An expired entry found here is removed.
    pub async fn contains(&self, key: &str) -> bool {
        let now = self.now();
        let mut entries = self.shard_for(key).lock(&self.inner.metrics).await;

        match entries.get(key) {
            Some(entry) if entry.is_expired_at(now) => {
                entries.remove(key);
                self.inner.metrics.record_eviction(1);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    // == Set ==
    /// Stores a key-value pair, with `ttl` in seconds or the default TTL.
    ///
    /// Overwriting resets the entry's creation time. Inserting a new key into
    /// a full shard first drops that shard's expired entries, then evicts one
    /// live entry if it is still full.
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Option<u64>) {
        let key = key.into();
        let now = self.now();
        let shard = self.shard_for(&key);
        let mut entries = shard.lock(&self.inner.metrics).await;

        self.insert_locked(shard, &mut entries, key, value, ttl, now);
    }

    /// Stores the pair only if no live entry exists for `key`.
    ///
    /// The check and the insert happen under one shard lock. Returns true if
    /// the value was stored.
    pub async fn set_if_absent(&self, key: impl Into<String>, value: V, ttl: Option<u64>) -> bool {
        let key = key.into();
        let now = self.now();
        let shard = self.shard_for(&key);
        let mut entries = shard.lock(&self.inner.metrics).await;

        if entries.get(&key).is_some_and(|entry| !entry.is_expired_at(now)) {
            return false;
        }

        self.insert_locked(shard, &mut entries, key, value, ttl, now);
        true
    }

    fn insert_locked(
        &self,
        shard: &Shard<V>,
        entries: &mut ShardGuard<'_, V>,
        key: String,
        value: V,
        ttl: Option<u64>,
        now: u64,
    ) {
        let ttl = ttl.unwrap_or(self.inner.config.default_ttl);
        let metrics = &self.inner.metrics;
        let capacity = self.inner.config.shard_capacity();

        if self.inner.transaction.is_open() {
            self.inner.transaction.record(TxOp::Set {
                key: key.clone(),
                previous: entries.get(&key).cloned(),
            });
        }

        if !entries.contains_key(&key) && entries.len() >= capacity {
            let swept = EvictionPolicy::sweep_expired(&mut **entries, now);
            if swept > 0 {
                metrics.record_eviction(swept as u64);
            }
            if entries.len() >= capacity {
                if let Some(evicted) = self.inner.config.eviction_policy.evict_one(&mut **entries) {
                    metrics.record_eviction(1);
                    debug!(shard = shard.index(), key = %evicted, "Evicted entry from full shard");
                }
            }
        }

        entries.insert(key, CacheEntry::new(value, now, ttl));
        metrics.record_set();
    }

    // == Delete ==
    /// Removes an entry by key. Returns true if a live entry was removed.
    pub async fn delete(&self, key: &str) -> bool {
        let now = self.now();
        let mut entries = self.shard_for(key).lock(&self.inner.metrics).await;

        if self.inner.transaction.is_open() {
            self.inner.transaction.record(TxOp::Delete {
                key: key.to_string(),
                previous: entries.get(key).cloned(),
            });
        }

        match entries.remove(key) {
            Some(entry) if !entry.is_expired_at(now) => {
                self.inner.metrics.record_delete();
                true
            }
            _ => false,
        }
    }

    // == Clear ==
    /// Empties every shard, one shard at a time.
    pub async fn clear(&self) {
        let mut removed = 0;
        for shard in &self.inner.shards {
            let mut entries = shard.lock(&self.inner.metrics).await;
            removed += entries.len();
            entries.clear();
        }
        info!(removed, "Cache cleared");
    }

    // == Size ==
    /// Approximate number of entries, read without locking. May include
    /// expired entries not yet swept.
    pub fn size(&self) -> usize {
        self.inner.shards.iter().map(Shard::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Approximate entry count of each shard, by index.
    pub fn shard_sizes(&self) -> Vec<usize> {
        self.inner.shards.iter().map(Shard::len).collect()
    }

    // == Cleanup Expired ==
    /// Removes all expired entries, locking one shard at a time.
    ///
    /// Returns the number of entries removed.
    pub async fn cleanup_expired(&self) -> usize {
        let now = self.now();
        let mut removed = 0;

        for shard in &self.inner.shards {
            let mut entries = shard.lock(&self.inner.metrics).await;
            removed += EvictionPolicy::sweep_expired(&mut *entries, now);
        }

        if removed > 0 {
            self.inner.metrics.record_eviction(removed as u64);
            info!("TTL cleanup: removed {} expired entries", removed);
        } else {
            debug!("TTL cleanup: no expired entries found");
        }
        removed
    }

    // == Lifecycle ==
    /// Starts the background sweep. Calling it while running is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut sweeper = self.inner.sweeper.lock();
        if sweeper.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let weak: Weak<CacheInner<V>> = Arc::downgrade(&self.inner);
        let period = Duration::from_secs(self.inner.config.cleanup_interval);

        *sweeper = Some(PeriodicTask::spawn("ttl-sweep", period, move || {
            let cache = weak.upgrade().map(|inner| TtlCache { inner });
            async move {
                match cache {
                    Some(cache) => Ok(cache.cleanup_expired().await),
                    None => Ok(0),
                }
            }
        }));
        info!(
            interval_secs = self.inner.config.cleanup_interval,
            shards = self.shard_count(),
            "Cache sweep started"
        );
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stops the background sweep and waits for it to exit.
    pub async fn stop(&self) {
        let task = self.inner.sweeper.lock().take();
        if let Some(task) = task {
            task.stop().await;
            info!("Cache sweep stopped");
        }
    }

    // == Metrics ==
    pub fn get_detailed_metrics(&self) -> DetailedMetrics {
        self.inner
            .metrics
            .detailed(&self.shard_sizes(), self.inner.config.max_entries)
    }

    /// Shards holding more entries than `percentile` of all shards.
    pub fn get_hot_shards(&self, percentile: f64) -> Vec<usize> {
        let sizes: Vec<u64> = self.shard_sizes().into_iter().map(|n| n as u64).collect();
        hot_shards(&sizes, percentile)
    }

    /// Shards whose lock was contended more often than `percentile` of all shards.
    pub fn get_contended_shards(&self, percentile: f64) -> Vec<usize> {
        hot_shards(&self.inner.metrics.contention_counts(), percentile)
    }

    pub fn calculate_efficiency_score(&self) -> f64 {
        self.inner
            .metrics
            .efficiency_score(self.size(), self.inner.config.max_entries)
    }

    pub fn reset_metrics(&self) {
        self.inner.metrics.reset();
    }

    // == Transactions ==
    pub fn begin_transaction(&self) -> Result<()> {
        self.inner.transaction.begin()?;
        debug!("Transaction opened");
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.transaction.is_open()
    }

    /// Closes the transaction keeping every mutation. Returns the number of
    /// logged operations discarded.
    pub fn commit_transaction(&self) -> Result<usize> {
        let discarded = self.inner.transaction.commit()?;
        debug!(operations = discarded, "Transaction committed");
        Ok(discarded)
    }

    /// Closes the transaction and undoes its mutations, newest first.
    ///
    /// Returns the number of operations replayed.
    pub async fn rollback_transaction(&self) -> Result<usize> {
        let ops = self.inner.transaction.take()?;
        let replayed = self.rollback_ops(ops).await;
        info!(operations = replayed, "Transaction rolled back");
        Ok(replayed)
    }

    /// Undoes `ops` in reverse order.
    ///
    /// Best effort: replay is not itself logged or undoable, and a previous
    /// entry that has expired since it was logged is not resurrected.
    pub async fn rollback_ops(&self, ops: Vec<TxOp<V>>) -> usize {
        let now = self.now();
        let capacity = self.inner.config.shard_capacity();
        let metrics = &self.inner.metrics;
        let mut replayed = 0;

        for op in ops.into_iter().rev() {
            let (key, previous) = match op {
                TxOp::Set { key, previous } | TxOp::Delete { key, previous } => (key, previous),
            };
            let shard = self.shard_for(&key);
            let mut entries = shard.lock(metrics).await;

            match previous {
                Some(entry) if !entry.is_expired_at(now) => {
                    if !entries.contains_key(&key) && entries.len() >= capacity {
                        let swept = EvictionPolicy::sweep_expired(&mut *entries, now);
                        if swept > 0 {
                            metrics.record_eviction(swept as u64);
                        }
                        if entries.len() >= capacity {
                            if let Some(evicted) =
                                self.inner.config.eviction_policy.evict_one(&mut *entries)
                            {
                                metrics.record_eviction(1);
                                debug!(shard = shard.index(), key = %evicted, "Evicted entry to restore rolled-back key");
                            }
                        }
                    }
                    entries.insert(key, entry);
                }
                _ => {
                    entries.remove(&key);
                }
            }
            replayed += 1;
        }
        replayed
    }

    // == Snapshots ==
    /// Copies every shard's contents, each under its own lock.
    pub async fn create_backup_snapshot(&self) -> CacheSnapshot<V> {
        let mut shards = Vec::with_capacity(self.shard_count());

        for shard in &self.inner.shards {
            let entries = shard.lock(&self.inner.metrics).await;
            shards.push(
                entries
                    .iter()
                    .map(|(key, entry)| (key.clone(), SnapshotEntry::from_entry(entry)))
                    .collect(),
            );
        }

        let total_entries = shards.iter().map(std::collections::BTreeMap::len).sum();
        CacheSnapshot {
            version: SNAPSHOT_VERSION,
            timestamp: self.inner.clock.now_utc(),
            shards,
            total_entries,
        }
    }

    /// Replaces the cache contents with `snapshot`.
    ///
    /// The snapshot is validated before anything is cleared; an invalid
    /// snapshot leaves the cache untouched. Entries whose TTL has elapsed are
    /// skipped. Returns the number of entries restored.
    pub async fn restore_from_snapshot(&self, snapshot: &CacheSnapshot<V>) -> Result<usize> {
        let plan = match SnapshotManager::plan_restore(snapshot, self.shard_count(), self.now()) {
            Ok(plan) => plan,
            Err(err) => {
                self.inner.metrics.record_error();
                warn!(error = %err, "Snapshot rejected");
                return Err(err);
            }
        };

        self.clear().await;

        let capacity = self.inner.config.shard_capacity();
        let mut restored = 0;
        for (shard, planned) in self.inner.shards.iter().zip(plan) {
            let mut entries = shard.lock(&self.inner.metrics).await;
            for (key, entry) in planned {
                if entries.len() >= capacity {
                    if self.inner.config.eviction_policy.evict_one(&mut *entries).is_some() {
                        self.inner.metrics.record_eviction(1);
                    }
                }
                entries.insert(key, entry);
                restored += 1;
            }
        }

        info!(
            restored,
            saved = snapshot.total_entries,
            taken_at = %snapshot.timestamp,
            "Cache restored from snapshot"
        );
        Ok(restored)
    }
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// Writes a snapshot to `path`. Returns the number of entries saved.
    pub async fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<usize> {
        let snapshot = self.create_backup_snapshot().await;
        if let Err(err) = write_snapshot(path.as_ref(), &snapshot).await {
            self.inner.metrics.record_error();
            warn!(path = %path.as_ref().display(), error = %err, "Failed to save snapshot");
            return Err(err);
        }
        info!(path = %path.as_ref().display(), entries = snapshot.total_entries, "Snapshot saved");
        Ok(snapshot.total_entries)
    }

    /// Restores from a snapshot file written by [`TtlCache::save_snapshot`].
    pub async fn load_snapshot(&self, path: impl AsRef<Path>) -> Result<usize> {
        let snapshot = match read_snapshot(path.as_ref()).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.inner.metrics.record_error();
                warn!(path = %path.as_ref().display(), error = %err, "Failed to read snapshot");
                return Err(err);
            }
        };
        self.restore_from_snapshot(&snapshot).await
    }
}

impl<V> Drop for CacheInner<V> {
    fn drop(&mut self) {
        if let Some(task) = self.sweeper.get_mut().as_ref() {
            task.cancel();
        }
    }
}
