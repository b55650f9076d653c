//! Cache Module
//!
//! Provides a sharded in-memory cache with TTL expiration, capacity
//! eviction, lock-contention metrics, snapshots, and transactions.

mod engine;
mod entry;
mod eviction;
mod metrics;
mod shard;
mod snapshot;
mod transaction;


// Re-export public types
pub use engine::TtlCache;
pub use entry::CacheEntry;
pub use eviction::EvictionPolicy;
pub use metrics::{hot_shards, DetailedMetrics, MetricsCollector, ShardMetrics};
pub use shard::shard_index;
pub use snapshot::{
    read_snapshot, write_snapshot, CacheSnapshot, SnapshotEntry, SnapshotManager,
    SNAPSHOT_VERSION,
};
pub use transaction::{TransactionLog, TxOp};
