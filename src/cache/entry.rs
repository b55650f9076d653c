//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
///
/// All timestamps are Unix milliseconds taken from the engine's clock.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Insertion timestamp, reset on every overwrite
    pub created_at: u64,
    /// Time to live in milliseconds
    pub ttl_ms: u64,
    /// Number of successful lookups
    pub access_count: u64,
    /// Timestamp of the last successful lookup (or insertion)
    pub last_accessed: u64,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new cache entry.
    ///
    /// # Arguments
    /// * `value` - The value to store
    /// * `now` - Insertion time in Unix milliseconds
    /// * `ttl_seconds` - TTL in seconds
    pub fn new(value: V, now: u64, ttl_seconds: u64) -> Self {
        Self {
            value,
            created_at: now,
            ttl_ms: ttl_seconds.saturating_mul(1000),
            access_count: 0,
            last_accessed: now,
        }
    }

    /// Absolute expiration time in Unix milliseconds.
    pub fn expires_at(&self) -> u64 {
        self.created_at.saturating_add(self.ttl_ms)
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once `now` is strictly past `created_at + ttl`;
    /// at exactly the boundary it is still live.
    pub fn is_expired_at(&self, now: u64) -> bool {
        now > self.expires_at()
    }

    // == Touch ==
    /// Records a successful lookup.
    pub fn touch(&mut self, now: u64) {
        self.access_count += 1;
        self.last_accessed = now;
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, saturating at zero.
    pub fn ttl_remaining_ms(&self, now: u64) -> u64 {
        self.expires_at().saturating_sub(now)
    }
}
