//! Eviction Policy Module
//!
//! Victim selection for full shards and removal of expired entries.
//!
//! Both operations run on a shard's map while the caller holds that shard's
//! lock; neither takes a lock of its own.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::cache::CacheEntry;

// == Eviction Policy ==
/// Chooses which entry leaves a shard when it is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Evict the entry with the oldest `created_at`
    #[default]
    OldestInsertion,
    /// Evict the entry with the oldest `last_accessed`
    LeastRecentlyUsed,
}

impl EvictionPolicy {
    // == Evict One ==
    /// Removes one entry from `entries` and returns its key.
    ///
    /// Ties are broken by whichever candidate the map yields first.
    /// Returns None if the shard is empty.
    pub fn evict_one<V>(&self, entries: &mut HashMap<String, CacheEntry<V>>) -> Option<String> {
        let victim = entries
            .iter()
            .min_by_key(|(_, entry)| match self {
                EvictionPolicy::OldestInsertion => entry.created_at,
                EvictionPolicy::LeastRecentlyUsed => entry.last_accessed,
            })
            .map(|(key, _)| key.clone())?;

        entries.remove(&victim);
        Some(victim)
    }

    // == Sweep Expired ==
    /// Removes every entry expired at `now` and returns how many were removed.
    pub fn sweep_expired<V>(entries: &mut HashMap<String, CacheEntry<V>>, now: u64) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        before - entries.len()
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionPolicy::OldestInsertion => write!(f, "oldest"),
            EvictionPolicy::LeastRecentlyUsed => write!(f, "lru"),
        }
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oldest" | "fifo" | "oldest_insertion" => Ok(EvictionPolicy::OldestInsertion),
            "lru" | "least_recently_used" => Ok(EvictionPolicy::LeastRecentlyUsed),
            other => Err(format!("unknown eviction policy: {other}")),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn shard_with(entries: &[(&str, u64, u64)]) -> HashMap<String, CacheEntry<u32>> {
        entries
            .iter()
            .map(|(key, created, accessed)| {
                let mut entry = CacheEntry::new(0, *created, 60);
                entry.last_accessed = *accessed;
                (key.to_string(), entry)
            })
            .collect()
    }

    #[test]
    fn test_evict_oldest_insertion() {
        let mut shard = shard_with(&[("a", 100, 900), ("b", 200, 200), ("c", 300, 300)]);

        let evicted = EvictionPolicy::OldestInsertion.evict_one(&mut shard);
        assert_eq!(evicted, Some("a".to_string()));
        assert_eq!(shard.len(), 2);
        assert!(!shard.contains_key("a"));
    }

    #[test]
    fn test_evict_least_recently_used() {
        let mut shard = shard_with(&[("a", 100, 900), ("b", 200, 200), ("c", 300, 300)]);

        // 'a' is oldest by insertion but was read most recently
        let evicted = EvictionPolicy::LeastRecentlyUsed.evict_one(&mut shard);
        assert_eq!(evicted, Some("b".to_string()));
    }

    #[test]
    fn test_evict_empty() {
        let mut shard: HashMap<String, CacheEntry<u32>> = HashMap::new();
        assert_eq!(EvictionPolicy::OldestInsertion.evict_one(&mut shard), None);
    }

    #[test]
    fn test_sweep_expired() {
        let mut shard = HashMap::new();
        shard.insert("short".to_string(), CacheEntry::new(1, 0, 1));
        shard.insert("long".to_string(), CacheEntry::new(2, 0, 100));

        assert_eq!(EvictionPolicy::sweep_expired(&mut shard, 500), 0);
        assert_eq!(EvictionPolicy::sweep_expired(&mut shard, 1_001), 1);
        assert_eq!(shard.len(), 1);
        assert!(shard.contains_key("long"));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("lru".parse(), Ok(EvictionPolicy::LeastRecentlyUsed));
        assert_eq!(" Oldest ".parse(), Ok(EvictionPolicy::OldestInsertion));
        assert!("random".parse::<EvictionPolicy>().is_err());
        assert_eq!(EvictionPolicy::LeastRecentlyUsed.to_string(), "lru");
    }
}
