//! Idempotency Coordinator
//!
//! Deduplicates retried operations by idempotency key. A response is cached
//! once an operation succeeds, and a short-lived processing marker rejects
//! duplicates that arrive while the first attempt is still running.
//!
//! # Protocol
//!
//! 1. A cached response for the key is returned as-is; the operation is not re-run.
//! 2. If the key is being processed, the duplicate is rejected, not queued.
//! 3. Otherwise the key is marked, the operation runs, a successful response
//!    is cached, and only then is the marker cleared (on every exit path).
//!
//! Storage failures degrade to "no protection" rather than failing requests:
//! they are logged, counted, and answered with the negative default.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::IdempotencyConfig;
use crate::error::StorageError;
use crate::idempotency::key::is_valid_idempotency_key;
use crate::idempotency::metrics::{Counters, IdempotencyMetrics};
use crate::idempotency::record::{request_hash, CachedResponse, IdempotencyRecord};
use crate::idempotency::store::KeyValueStore;

/// Response produced by a protected operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResponse {
    pub status_code: u16,
    pub data: Value,
}

/// Result of running an operation through [`IdempotencyCoordinator::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotentOutcome {
    /// The operation ran now
    Executed(OperationResponse),
    /// A previous run's response was replayed
    Replayed(CachedResponse),
    /// Another request with this key is running (409 equivalent)
    InProgress,
    /// The key is not a v4 UUID; nothing ran
    InvalidKey,
}

/// Outcome of trying to mark a key as processing.
enum Claim {
    Claimed,
    AlreadyProcessing,
    Unavailable,
}

// == Idempotency Coordinator ==
pub struct IdempotencyCoordinator {
    store: Arc<dyn KeyValueStore>,
    config: IdempotencyConfig,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl std::fmt::Debug for IdempotencyCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyCoordinator")
            .field("config", &self.config)
            .field("metrics", &self.counters.snapshot())
            .finish()
    }
}

impl IdempotencyCoordinator {
    pub fn new(store: Arc<dyn KeyValueStore>, config: IdempotencyConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn KeyValueStore>,
        config: IdempotencyConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            config,
            clock,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    fn response_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    fn processing_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.processing_prefix, key)
    }

    fn validate(&self, key: &str, operation: &str) -> bool {
        let valid = is_valid_idempotency_key(key);
        if !valid {
            warn!(operation, key, "Rejected invalid idempotency key");
        }
        valid
    }

    fn storage_failed(&self, operation: &str, key: &str, err: &StorageError) {
        self.counters.record_storage_error();
        error!(operation, key, error = %err, "Idempotency storage error");
    }

    // == Get Cached Response ==
    /// Returns the cached response for `key`, if there is a live one.
    ///
    /// When `request_data` is given and differs from the request the
    /// response was cached for, the cache is bypassed with a warning.
    pub async fn get_cached_response(
        &self,
        key: &str,
        request_data: Option<&Value>,
    ) -> Option<CachedResponse> {
        if !self.validate(key, "get_cached_response") {
            return None;
        }
        self.counters.record_request();

        let storage_key = self.response_key(key);
        let raw = match self.store.get(&storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.counters.record_miss();
                return None;
            }
            Err(err) => {
                self.storage_failed("get_cached_response", key, &err);
                self.counters.record_miss();
                return None;
            }
        };

        let record: IdempotencyRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(err) => {
                let err = StorageError::Corrupt {
                    key: storage_key.clone(),
                    reason: err.to_string(),
                };
                self.storage_failed("get_cached_response", key, &err);
                self.counters.record_miss();
                if let Err(err) = self.store.delete(&storage_key).await {
                    self.storage_failed("get_cached_response", key, &err);
                }
                return None;
            }
        };

        if record.is_expired_at(self.clock.now_utc()) {
            if let Err(err) = self.store.delete(&storage_key).await {
                self.storage_failed("get_cached_response", key, &err);
            }
            self.counters.record_expired_cleanup();
            self.counters.record_miss();
            debug!(key, "Purged expired idempotency record");
            return None;
        }

        if let Some(request_data) = request_data {
            if record.conflicts_with(request_data) {
                warn!(
                    key,
                    "Idempotency key reused with a different request payload, bypassing cache"
                );
                self.counters.record_miss();
                return None;
            }
        }

        self.counters.record_hit();
        debug!(key, status_code = record.status_code, "Idempotency cache hit");
        Some(record.into())
    }

    // == Processing Markers ==
    /// True if an operation with `key` is currently marked as running.
    pub async fn is_processing(&self, key: &str) -> bool {
        if !self.validate(key, "is_processing") {
            return false;
        }
        match self.store.exists(&self.processing_key(key)).await {
            Ok(exists) => exists,
            Err(err) => {
                self.storage_failed("is_processing", key, &err);
                false
            }
        }
    }

    /// Marks `key` as running for `ttl_secs` (default: `processing_ttl`).
    ///
    /// The TTL is what frees the key if the worker dies before clearing it.
    /// Returns false if the marker could not be written.
    pub async fn mark_processing(&self, key: &str, ttl_secs: Option<u64>) -> bool {
        if !self.validate(key, "mark_processing") {
            return false;
        }
        let ttl = ttl_secs.unwrap_or(self.config.processing_ttl);
        let marker = self.clock.now_utc().to_rfc3339();

        match self.store.setex(&self.processing_key(key), ttl, marker).await {
            Ok(()) => {
                debug!(key, ttl_secs = ttl, "Marked idempotency key as processing");
                true
            }
            Err(err) => {
                self.storage_failed("mark_processing", key, &err);
                false
            }
        }
    }

    /// Atomically marks `key` unless it is already marked.
    async fn claim(&self, key: &str) -> Claim {
        let marker = self.clock.now_utc().to_rfc3339();
        match self
            .store
            .set_if_absent(&self.processing_key(key), self.config.processing_ttl, marker)
            .await
        {
            Ok(true) => Claim::Claimed,
            Ok(false) => Claim::AlreadyProcessing,
            Err(err) => {
                self.storage_failed("mark_processing", key, &err);
                Claim::Unavailable
            }
        }
    }

    /// Removes the processing marker. Call on every exit path of the
    /// protected operation.
    pub async fn clear_processing(&self, key: &str) -> bool {
        if !self.validate(key, "clear_processing") {
            return false;
        }
        match self.store.delete(&self.processing_key(key)).await {
            Ok(removed) => removed,
            Err(err) => {
                self.storage_failed("clear_processing", key, &err);
                false
            }
        }
    }

    // == Cache Response ==
    /// Caches a successful response for `ttl_hours`.
    ///
    /// Rejects non-2xx statuses and responses whose JSON encoding exceeds
    /// `max_response_size` bytes.
    pub async fn cache_response(
        &self,
        key: &str,
        response_data: &Value,
        status_code: u16,
        request_data: Option<&Value>,
        metadata: Option<BTreeMap<String, String>>,
    ) -> bool {
        if !self.validate(key, "cache_response") {
            return false;
        }
        if !(200..300).contains(&status_code) {
            warn!(key, status_code, "Refusing to cache unsuccessful response");
            return false;
        }

        let size = response_data.to_string().len();
        if size > self.config.max_response_size {
            warn!(
                key,
                size,
                limit = self.config.max_response_size,
                "Response too large to cache"
            );
            return false;
        }

        let created_at = self.clock.now_utc();
        let expires_at = match i64::try_from(self.config.ttl_hours)
            .ok()
            .and_then(ChronoDuration::try_hours)
            .and_then(|ttl| created_at.checked_add_signed(ttl))
        {
            Some(expires_at) => expires_at,
            None => {
                warn!(key, ttl_hours = self.config.ttl_hours, "Response TTL out of range");
                return false;
            }
        };
        let record = IdempotencyRecord {
            idempotency_key: key.to_string(),
            request_hash: request_data.map(request_hash),
            response_data: response_data.clone(),
            status_code,
            created_at,
            expires_at,
            request_metadata: metadata.unwrap_or_default(),
        };

        let encoded = match serde_json::to_string(&record) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(key, error = %err, "Failed to encode idempotency record");
                return false;
            }
        };

        let ttl_secs = (expires_at - created_at).num_seconds().max(1) as u64;
        match self.store.setex(&self.response_key(key), ttl_secs, encoded).await {
            Ok(()) => {
                debug!(key, status_code, ttl_secs, "Cached idempotent response");
                true
            }
            Err(err) => {
                self.storage_failed("cache_response", key, &err);
                false
            }
        }
    }

    // == Invalidate ==
    /// Deletes both the cached response and the processing marker. Returns
    /// true if either existed.
    pub async fn invalidate_key(&self, key: &str) -> bool {
        if !self.validate(key, "invalidate_key") {
            return false;
        }

        let mut removed = false;
        for storage_key in [self.response_key(key), self.processing_key(key)] {
            match self.store.delete(&storage_key).await {
                Ok(existed) => removed |= existed,
                Err(err) => self.storage_failed("invalidate_key", key, &err),
            }
        }
        removed
    }

    pub fn get_metrics(&self) -> IdempotencyMetrics {
        self.counters.snapshot()
    }

    // == Execute ==
    /// Runs `operation` at most once per key.
    ///
    /// An error from `operation` is returned unchanged and nothing is cached.
    /// If the processing marker cannot be written the operation still runs,
    /// unprotected. If the returned future is dropped mid-flight, the marker
    /// stays until its TTL expires.
    pub async fn execute<F, Fut, E>(
        &self,
        key: &str,
        request_data: Option<&Value>,
        operation: F,
    ) -> Result<IdempotentOutcome, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<OperationResponse, E>>,
    {
        if !self.validate(key, "execute") {
            return Ok(IdempotentOutcome::InvalidKey);
        }

        if let Some(cached) = self.get_cached_response(key, request_data).await {
            return Ok(IdempotentOutcome::Replayed(cached));
        }

        match self.claim(key).await {
            Claim::Claimed => {}
            Claim::AlreadyProcessing => {
                debug!(key, "Rejecting concurrent duplicate request");
                return Ok(IdempotentOutcome::InProgress);
            }
            Claim::Unavailable => {
                warn!(key, "Proceeding without idempotency protection");
            }
        }

        // The marker outlives the response write, so a duplicate arriving
        // in between sees one or the other.
        let outcome = match operation().await {
            Ok(response) => {
                if (200..300).contains(&response.status_code) {
                    self.cache_response(key, &response.data, response.status_code, request_data, None)
                        .await;
                }
                Ok(IdempotentOutcome::Executed(response))
            }
            Err(err) => Err(err),
        };
        self.clear_processing(key).await;
        outcome
    }
}
