//! Key-value substrate for idempotency records.

use async_trait::async_trait;

use crate::cache::TtlCache;
use crate::config::{CacheConfig, IdempotencyConfig};
use crate::error::{Result, StorageError};

/// Minimal store with per-key TTL, modelled on Redis `GET`/`SETEX`/`EXISTS`/`DEL`.
///
/// Absence is `Ok(None)` / `Ok(false)`; `Err` always means the backend failed.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, StorageError>;

    async fn setex(
        &self,
        key: &str,
        ttl_secs: u64,
        value: String,
    ) -> std::result::Result<(), StorageError>;

    async fn exists(&self, key: &str) -> std::result::Result<bool, StorageError>;

    /// Returns true if a live key was removed.
    async fn delete(&self, key: &str) -> std::result::Result<bool, StorageError>;

    /// Stores `value` only if `key` is absent. Returns true if stored.
    ///
    /// The default implementation is a non-atomic `exists` then `setex`;
    /// backends that can do better should override it.
    async fn set_if_absent(
        &self,
        key: &str,
        ttl_secs: u64,
        value: String,
    ) -> std::result::Result<bool, StorageError> {
        if self.exists(key).await? {
            return Ok(false);
        }
        self.setex(key, ttl_secs, value).await?;
        Ok(true)
    }
}

// == Cache Store ==
/// In-process store backed by a [`TtlCache`], so idempotency records get
/// the same sharding, expiry, and eviction as every other cache entry.
#[derive(Debug, Clone)]
pub struct CacheStore {
    cache: TtlCache<String>,
}

impl CacheStore {
    pub fn new(cache: TtlCache<String>) -> Self {
        Self { cache }
    }

    /// Builds a dedicated cache sized by the idempotency configuration.
    pub fn from_config(config: &IdempotencyConfig) -> Result<Self> {
        let cache_config = CacheConfig {
            max_entries: config.max_entries,
            default_ttl: config.processing_ttl,
            ..CacheConfig::default()
        };
        Ok(Self::new(TtlCache::new(cache_config)?))
    }

    /// The underlying cache, for lifecycle control and metrics.
    pub fn cache(&self) -> &TtlCache<String> {
        &self.cache
    }
}

#[async_trait]
impl KeyValueStore for CacheStore {
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, StorageError> {
        Ok(self.cache.get(key).await)
    }

    async fn setex(
        &self,
        key: &str,
        ttl_secs: u64,
        value: String,
    ) -> std::result::Result<(), StorageError> {
        self.cache.set(key, value, Some(ttl_secs)).await;
        Ok(())
    }

    async fn exists(&self, key: &str) -> std::result::Result<bool, StorageError> {
        Ok(self.cache.contains(key).await)
    }

    async fn delete(&self, key: &str) -> std::result::Result<bool, StorageError> {
        Ok(self.cache.delete(key).await)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        ttl_secs: u64,
        value: String,
    ) -> std::result::Result<bool, StorageError> {
        Ok(self.cache.set_if_absent(key, value, Some(ttl_secs)).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;
    use std::time::Duration;

    fn store() -> (CacheStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let cache = TtlCache::with_clock(CacheConfig::default(), clock.clone()).unwrap();
        (CacheStore::new(cache), clock)
    }

    #[tokio::test]
    async fn test_setex_get_delete() {
        let (store, _) = store();

        store.setex("k", 60, "v".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert!(store.exists("k").await.unwrap());

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_setex_honours_ttl() {
        let (store, clock) = store();

        store.setex("k", 2, "v".to_string()).await.unwrap();
        clock.advance(Duration::from_secs(3));
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_if_absent_is_exclusive() {
        let (store, _) = store();

        assert!(store.set_if_absent("k", 60, "a".to_string()).await.unwrap());
        assert!(!store.set_if_absent("k", 60, "b".to_string()).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("a".to_string()));
    }

    #[test]
    fn test_from_config() {
        let store = CacheStore::from_config(&IdempotencyConfig::default()).unwrap();
        assert_eq!(store.cache().config().max_entries, 10_000);
        assert!(store.cache().is_empty());
    }
}
