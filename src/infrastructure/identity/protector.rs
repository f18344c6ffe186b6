//! Keyed lookup protection.
//!
//! Protection is deterministic so protected normalized values stay searchable by
//! equality: the same key and input always produce the same output.
//!
//! The HMAC protector is one-way. Protected values are only ever compared, never
//! read back: the normalized fields are derived from `user_name` and `email`, which
//! stay on the user, and a key rotation is handled by trying every key id of the
//! ring at lookup time. A store that needs to recover plaintext from a protected
//! value must plug in its own reversible `LookupProtector`.

use std::collections::BTreeMap;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::domain::identity::{LookupProtector, LookupProtectorKeyRing};
use crate::domain::DomainError;

type HmacSha256 = Hmac<Sha256>;

/// Fixed set of protection keys with one current key
#[derive(Clone)]
pub struct StaticKeyRing {
    current: String,
    keys: BTreeMap<String, Vec<u8>>,
}

impl StaticKeyRing {
    pub fn new(current_key_id: impl Into<String>, current_key: impl Into<Vec<u8>>) -> Self {
        let current = current_key_id.into();
        let mut keys = BTreeMap::new();
        keys.insert(current.clone(), current_key.into());
        Self { current, keys }
    }

    /// Keep a retired key available for lookups
    pub fn with_key(mut self, key_id: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        self.keys.insert(key_id.into(), key.into());
        self
    }

    fn key(&self, key_id: &str) -> Option<&[u8]> {
        self.keys.get(key_id).map(Vec::as_slice)
    }
}

impl std::fmt::Debug for StaticKeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticKeyRing")
            .field("current", &self.current)
            .field("key_ids", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LookupProtectorKeyRing for StaticKeyRing {
    fn current_key_id(&self) -> String {
        self.current.clone()
    }

    fn all_key_ids(&self) -> Vec<String> {
        self.keys.keys().cloned().collect()
    }
}

/// One-way HMAC-SHA256 protector producing `{key_id}:{hex digest}`
#[derive(Debug, Clone)]
pub struct HmacLookupProtector {
    key_ring: Arc<StaticKeyRing>,
}

impl HmacLookupProtector {
    pub fn new(key_ring: Arc<StaticKeyRing>) -> Self {
        Self { key_ring }
    }
}

impl LookupProtector for HmacLookupProtector {
    fn protect(&self, key_id: &str, data: &str) -> Result<String, DomainError> {
        let key = self
            .key_ring
            .key(key_id)
            .ok_or_else(|| DomainError::configuration(format!("Unknown protection key '{}'", key_id)))?;

        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|e| DomainError::configuration(format!("Invalid protection key: {}", e)))?;
        mac.update(data.as_bytes());

        Ok(format!("{}:{}", key_id, hex::encode(mac.finalize().into_bytes())))
    }
}
