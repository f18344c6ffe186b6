//! Lookup protection for personal data at rest

#[cfg(test)]
use mockall::automock;

use crate::domain::DomainError;

/// Deterministically protects a lookup value under a given key
#[cfg_attr(test, automock)]
pub trait LookupProtector: Send + Sync {
    fn protect(&self, key_id: &str, data: &str) -> Result<String, DomainError>;
}

/// Enumerates the keys lookups may have been protected under
#[cfg_attr(test, automock)]
pub trait LookupProtectorKeyRing: Send + Sync {
    /// Key used for new writes
    fn current_key_id(&self) -> String;

    /// Every key, the current one included
    fn all_key_ids(&self) -> Vec<String>;
}
