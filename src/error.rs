//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
///
/// Key absence is never an error: lookups return `Option`. These variants
/// cover configuration, lifecycle, and persistence failures.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Snapshot failed structural validation
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// `begin_transaction` called while a transaction is open
    #[error("A transaction is already open")]
    TransactionAlreadyOpen,

    /// `commit_transaction` or `rollback_transaction` called while idle
    #[error("No transaction is open")]
    NoActiveTransaction,

    /// Snapshot file could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

// == Storage Error Enum ==
/// Errors raised by a [`KeyValueStore`](crate::idempotency::KeyValueStore) backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend unreachable or failed the operation
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A stored record could not be decoded
    #[error("Corrupt record for '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
