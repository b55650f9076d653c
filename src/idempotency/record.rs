//! Idempotency records and the envelope returned on replay.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A completed response stored under its idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub idempotency_key: String,
    /// Fingerprint of the request that produced the response, if one was given
    pub request_hash: Option<String>,
    pub response_data: Value,
    pub status_code: u16,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub request_metadata: BTreeMap<String, String>,
}

impl IdempotencyRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// True if `request_data` differs from the request this record was
    /// created for. Records stored without a fingerprint never conflict.
    pub fn conflicts_with(&self, request_data: &Value) -> bool {
        self.request_hash
            .as_deref()
            .is_some_and(|stored| stored != request_hash(request_data))
    }
}

/// What a replayed request receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedResponse {
    pub status_code: u16,
    pub data: Value,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<IdempotencyRecord> for CachedResponse {
    fn from(record: IdempotencyRecord) -> Self {
        Self {
            status_code: record.status_code,
            data: record.response_data,
            cached_at: record.created_at,
            expires_at: record.expires_at,
        }
    }
}

/// Hex SHA-256 of the request payload's JSON encoding.
///
/// Object keys serialize in sorted order, so payloads that differ only in
/// key order hash the same.
pub fn request_hash(request_data: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request_data.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
