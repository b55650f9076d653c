//! Configuration Module
//!
//! Handles loading and validating cache and idempotency configuration from
//! environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::cache::EvictionPolicy;
use crate::error::{CacheError, Result};

/// Cache engine parameters.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Number of independently locked shards, fixed for the engine's lifetime
    pub shard_count: usize,
    /// Global capacity, enforced per shard as `max_entries / shard_count`
    pub max_entries: usize,
    /// Default TTL in seconds for entries without explicit TTL
    pub default_ttl: u64,
    /// Background sweep interval in seconds
    pub cleanup_interval: u64,
    /// Victim selection when a shard is full
    pub eviction_policy: EvictionPolicy,
}

impl CacheConfig {
    /// Capacity of a single shard. Never zero.
    pub fn shard_capacity(&self) -> usize {
        (self.max_entries / self.shard_count.max(1)).max(1)
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(CacheError::InvalidConfig(
                "shard_count must be greater than 0".to_string(),
            ));
        }
        if self.max_entries == 0 {
            return Err(CacheError::InvalidConfig(
                "max_entries must be greater than 0".to_string(),
            ));
        }
        if self.cleanup_interval == 0 {
            return Err(CacheError::InvalidConfig(
                "cleanup_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shard_count: 16,
            max_entries: 10_000,
            default_ttl: 300,
            cleanup_interval: 30,
            eviction_policy: EvictionPolicy::default(),
        }
    }
}

/// Longest accepted response lifetime: 100 years.
pub const MAX_TTL_HOURS: u64 = 100 * 365 * 24;

/// Idempotency layer parameters.
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// Lifetime of a cached response in hours
    pub ttl_hours: u64,
    /// Default lifetime of a processing marker in seconds
    pub processing_ttl: u64,
    /// Largest serialized response, in bytes, that will be cached
    pub max_response_size: usize,
    /// Capacity of the backing store
    pub max_entries: usize,
    /// Namespace for cached responses
    pub key_prefix: String,
    /// Namespace for processing markers
    pub processing_prefix: String,
}

impl IdempotencyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ttl_hours == 0 || self.processing_ttl == 0 {
            return Err(CacheError::InvalidConfig(
                "idempotency TTLs must be greater than 0".to_string(),
            ));
        }
        if self.ttl_hours > MAX_TTL_HOURS {
            return Err(CacheError::InvalidConfig(format!(
                "ttl_hours must be at most {MAX_TTL_HOURS}"
            )));
        }
        if self.key_prefix == self.processing_prefix {
            return Err(CacheError::InvalidConfig(
                "key_prefix and processing_prefix must differ".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 24,
            processing_ttl: 300,
            max_response_size: 64 * 1024,
            max_entries: 10_000,
            key_prefix: "idempotency".to_string(),
            processing_prefix: "processing".to_string(),
        }
    }
}

/// Process configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub cache: CacheConfig,
    pub idempotency: IdempotencyConfig,
    /// Where the binary saves and restores cache snapshots, if anywhere
    pub snapshot_path: Option<PathBuf>,
    /// Interval in seconds between metrics reports
    pub metrics_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            idempotency: IdempotencyConfig::default(),
            snapshot_path: None,
            metrics_interval: 60,
        }
    }
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_SHARDS` - Shard count (default: 16)
    /// - `CACHE_MAX_ENTRIES` - Maximum cache entries (default: 10000)
    /// - `CACHE_DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `CACHE_CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 30)
    /// - `CACHE_EVICTION_POLICY` - `oldest` or `lru` (default: oldest)
    /// - `IDEMPOTENCY_TTL_HOURS` - Cached response lifetime (default: 24)
    /// - `IDEMPOTENCY_PROCESSING_TTL` - Marker lifetime in seconds (default: 300)
    /// - `IDEMPOTENCY_MAX_RESPONSE_SIZE` - Byte ceiling (default: 65536)
    /// - `IDEMPOTENCY_MAX_ENTRIES` - Store capacity (default: 10000)
    /// - `IDEMPOTENCY_KEY_PREFIX` - (default: idempotency)
    /// - `IDEMPOTENCY_PROCESSING_PREFIX` - (default: processing)
    /// - `SNAPSHOT_PATH` - Snapshot file (default: unset)
    /// - `METRICS_INTERVAL` - Metrics report frequency in seconds (default: 60)
    pub fn from_env() -> Self {
        let cache_defaults = CacheConfig::default();
        let idem_defaults = IdempotencyConfig::default();

        Self {
            cache: CacheConfig {
                shard_count: env_or("CACHE_SHARDS", cache_defaults.shard_count),
                max_entries: env_or("CACHE_MAX_ENTRIES", cache_defaults.max_entries),
                default_ttl: env_or("CACHE_DEFAULT_TTL", cache_defaults.default_ttl),
                cleanup_interval: env_or(
                    "CACHE_CLEANUP_INTERVAL",
                    cache_defaults.cleanup_interval,
                ),
                eviction_policy: env_or(
                    "CACHE_EVICTION_POLICY",
                    cache_defaults.eviction_policy,
                ),
            },
            idempotency: IdempotencyConfig {
                ttl_hours: env_or("IDEMPOTENCY_TTL_HOURS", idem_defaults.ttl_hours),
                processing_ttl: env_or(
                    "IDEMPOTENCY_PROCESSING_TTL",
                    idem_defaults.processing_ttl,
                ),
                max_response_size: env_or(
                    "IDEMPOTENCY_MAX_RESPONSE_SIZE",
                    idem_defaults.max_response_size,
                ),
                max_entries: env_or("IDEMPOTENCY_MAX_ENTRIES", idem_defaults.max_entries),
                key_prefix: env::var("IDEMPOTENCY_KEY_PREFIX")
                    .unwrap_or(idem_defaults.key_prefix),
                processing_prefix: env::var("IDEMPOTENCY_PROCESSING_PREFIX")
                    .unwrap_or(idem_defaults.processing_prefix),
            },
            snapshot_path: env::var("SNAPSHOT_PATH").ok().map(PathBuf::from),
            metrics_interval: env_or("METRICS_INTERVAL", 60),
        }
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.idempotency.validate()?;
        if self.metrics_interval == 0 {
            return Err(CacheError::InvalidConfig(
                "metrics_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parses `name` from the environment, falling back to `default` when the
/// variable is unset or malformed.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
