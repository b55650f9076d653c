//! Idempotency key validation.

use uuid::{Uuid, Variant, Version};

/// Length of the canonical hyphenated UUID form.
const CANONICAL_LEN: usize = 36;

/// Returns true if `key` is a canonical, hyphenated, version 4 UUID.
///
/// Braced, URN, and simple (unhyphenated) forms are rejected so the same
/// logical key always maps to the same storage key.
pub fn is_valid_idempotency_key(key: &str) -> bool {
    if key.len() != CANONICAL_LEN {
        return false;
    }
    match Uuid::try_parse(key) {
        Ok(uuid) => {
            uuid.get_version() == Some(Version::Random) && uuid.get_variant() == Variant::RFC4122
        }
        Err(_) => false,
    }
}
