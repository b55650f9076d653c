//! Background Tasks Module
//!
//! Contains background tasks that run periodically while the cache is live.
//!
//! # Tasks
//! - TTL sweep: removes expired cache entries at the configured interval
//! - Metrics report (binary only): logs engine and idempotency metrics

mod periodic;

pub use periodic::PeriodicTask;
