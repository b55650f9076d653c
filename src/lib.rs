//! Sharded Cache - An in-process TTL cache with idempotency-key deduplication
//!
//! Provides a sharded key-value cache with per-entry expiry, bounded
//! capacity, contention metrics, snapshots, and transactions, plus an
//! idempotency coordinator layered on a pluggable key-value store.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod tasks;

pub use cache::{EvictionPolicy, TtlCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, Config, IdempotencyConfig};
pub use error::{CacheError, Result, StorageError};
pub use idempotency::{CacheStore, IdempotencyCoordinator, IdempotentOutcome, KeyValueStore};
pub use tasks::PeriodicTask;
