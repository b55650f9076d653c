//! Snapshot Module
//!
//! Backup and warm-restart support. A snapshot is a best-effort copy: each
//! shard is read under its own lock, but shards are captured one after
//! another with no global lock.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::shard::shard_index;
use crate::cache::CacheEntry;
use crate::error::{CacheError, Result};

/// Format version written by this build.
pub const SNAPSHOT_VERSION: u32 = 1;

/// One serialized entry. Access bookkeeping is not preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry<V> {
    pub value: V,
    pub created_at: u64,
    pub ttl_ms: u64,
}

impl<V: Clone> SnapshotEntry<V> {
    pub fn from_entry(entry: &CacheEntry<V>) -> Self {
        Self {
            value: entry.value.clone(),
            created_at: entry.created_at,
            ttl_ms: entry.ttl_ms,
        }
    }

    fn to_entry(&self) -> CacheEntry<V> {
        CacheEntry {
            value: self.value.clone(),
            created_at: self.created_at,
            ttl_ms: self.ttl_ms,
            access_count: 0,
            last_accessed: self.created_at,
        }
    }
}

/// Full cache state, one map per shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot<V> {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub shards: Vec<BTreeMap<String, SnapshotEntry<V>>>,
    pub total_entries: usize,
}

// == Snapshot Manager ==
/// Validates snapshots and lays their entries out over the live shards.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnapshotManager;

impl SnapshotManager {
    /// Checks version and internal consistency without touching the cache.
    pub fn validate<V>(snapshot: &CacheSnapshot<V>) -> Result<()> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(CacheError::InvalidSnapshot(format!(
                "unsupported version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        if snapshot.shards.is_empty() {
            return Err(CacheError::InvalidSnapshot(
                "snapshot has no shards".to_string(),
            ));
        }
        let counted: usize = snapshot.shards.iter().map(BTreeMap::len).sum();
        if counted != snapshot.total_entries {
            return Err(CacheError::InvalidSnapshot(format!(
                "total_entries is {} but shards hold {}",
                snapshot.total_entries, counted
            )));
        }
        Ok(())
    }

    /// Groups live entries by the shard that owns their key in an engine
    /// with `shard_count` shards.
    ///
    /// Entries already expired at `now` are dropped. Keys are re-hashed, so a
    /// snapshot taken with a different shard count restores into the right
    /// shards instead of being truncated.
    pub fn plan_restore<V: Clone>(
        snapshot: &CacheSnapshot<V>,
        shard_count: usize,
        now: u64,
    ) -> Result<Vec<Vec<(String, CacheEntry<V>)>>> {
        Self::validate(snapshot)?;

        if snapshot.shards.len() != shard_count {
            info!(
                saved_shards = snapshot.shards.len(),
                live_shards = shard_count,
                "Snapshot shard count differs, remapping keys"
            );
        }

        let mut plan: Vec<Vec<(String, CacheEntry<V>)>> = vec![Vec::new(); shard_count];
        for (key, saved) in snapshot.shards.iter().flatten() {
            let entry = saved.to_entry();
            if entry.is_expired_at(now) {
                continue;
            }
            plan[shard_index(key, shard_count)].push((key.clone(), entry));
        }
        Ok(plan)
    }
}

// == File Persistence ==
/// Writes `snapshot` to `path` as JSON.
pub async fn write_snapshot<V: Serialize>(
    path: impl AsRef<Path>,
    snapshot: &CacheSnapshot<V>,
) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

/// Reads a JSON snapshot from `path`.
pub async fn read_snapshot<V: DeserializeOwned>(path: impl AsRef<Path>) -> Result<CacheSnapshot<V>> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_of(shards: Vec<Vec<(&str, u64, u64)>>) -> CacheSnapshot<String> {
        let shards: Vec<BTreeMap<String, SnapshotEntry<String>>> = shards
            .into_iter()
            .map(|entries| {
                entries
                    .into_iter()
                    .map(|(key, created_at, ttl_ms)| {
                        (
                            key.to_string(),
                            SnapshotEntry {
                                value: format!("v-{key}"),
                                created_at,
                                ttl_ms,
                            },
                        )
                    })
                    .collect()
            })
            .collect();
        let total_entries = shards.iter().map(BTreeMap::len).sum();
        CacheSnapshot {
            version: SNAPSHOT_VERSION,
            timestamp: Utc::now(),
            shards,
            total_entries,
        }
    }

    #[test]
    fn test_validate_accepts_consistent_snapshot() {
        let snapshot = snapshot_of(vec![vec![("a", 0, 1_000)], vec![]]);
        assert!(SnapshotManager::validate(&snapshot).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_version() {
        let mut snapshot = snapshot_of(vec![vec![]]);
        snapshot.version = 99;
        assert!(matches!(
            SnapshotManager::validate(&snapshot),
            Err(CacheError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_validate_rejects_wrong_total() {
        let mut snapshot = snapshot_of(vec![vec![("a", 0, 1_000), ("b", 0, 1_000)]]);
        snapshot.total_entries = 5;
        assert!(SnapshotManager::validate(&snapshot).is_err());
    }

    #[test]
    fn test_plan_drops_stale_entries() {
        let snapshot = snapshot_of(vec![vec![("fresh", 1_000, 10_000), ("stale", 0, 500)]]);

        let plan = SnapshotManager::plan_restore(&snapshot, 1, 2_000).unwrap();
        let keys: Vec<&str> = plan[0].iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["fresh"]);
        assert_eq!(plan[0][0].1.created_at, 1_000);
    }

    #[test]
    fn test_plan_remaps_across_shard_counts() {
        let snapshot = snapshot_of(vec![
            vec![("a", 0, 60_000), ("b", 0, 60_000)],
            vec![("c", 0, 60_000)],
        ]);

        let plan = SnapshotManager::plan_restore(&snapshot, 8, 0).unwrap();
        assert_eq!(plan.len(), 8);
        for (index, entries) in plan.iter().enumerate() {
            for (key, _) in entries {
                assert_eq!(shard_index(key, 8), index);
            }
        }
        assert_eq!(plan.iter().map(Vec::len).sum::<usize>(), 3);
    }

    #[tokio::test]
    async fn test_snapshot_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let snapshot = snapshot_of(vec![vec![("a", 5, 60_000)]]);

        write_snapshot(&path, &snapshot).await.unwrap();
        let loaded: CacheSnapshot<String> = read_snapshot(&path).await.unwrap();
        assert_eq!(loaded, snapshot);
    }
}
