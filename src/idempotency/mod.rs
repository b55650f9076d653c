//! Idempotency Module
//!
//! Exactly-once semantics for retried operations, keyed by client-supplied
//! v4 UUIDs. Records live in any [`KeyValueStore`]; [`CacheStore`] keeps
//! them in a sharded [`crate::cache::TtlCache`].

mod coordinator;
mod key;
mod metrics;
mod record;
mod store;

// Re-export public types
pub use coordinator::{IdempotencyCoordinator, IdempotentOutcome, OperationResponse};
pub use key::is_valid_idempotency_key;
pub use metrics::IdempotencyMetrics;
pub use record::{request_hash, CachedResponse, IdempotencyRecord};
pub use store::{CacheStore, KeyValueStore};
