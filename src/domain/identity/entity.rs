//! User, role and login entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::DomainError;

/// Stable, comparable user identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create a UserId from an existing identifier
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();

        if id.trim().is_empty() {
            return Err(DomainError::invalid_argument("User ID cannot be empty"));
        }

        Ok(Self(id))
    }

    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleId(String);

impl RoleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user account.
///
/// The caller owns every `User`; batch operations borrow them mutably and write
/// normalized fields, stamps and lockout state back in place. Two users are equal
/// when their identifiers are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    id: UserId,
    user_name: Option<String>,
    normalized_user_name: Option<String>,
    email: Option<String>,
    normalized_email: Option<String>,
    email_confirmed: bool,
    /// Never exposed in serialization
    #[serde(default, skip_serializing)]
    password_hash: Option<String>,
    security_stamp: Option<String>,
    concurrency_stamp: String,
    lockout_enabled: bool,
    lockout_end: Option<DateTime<Utc>>,
}

impl User {
    /// Create a new user with a generated identifier
    pub fn new(user_name: impl Into<String>) -> Self {
        Self::with_id(UserId::generate(), user_name)
    }

    /// Create a new user with a caller-supplied identifier
    pub fn with_id(id: UserId, user_name: impl Into<String>) -> Self {
        Self {
            id,
            user_name: Some(user_name.into()),
            normalized_user_name: None,
            email: None,
            normalized_email: None,
            email_confirmed: false,
            password_hash: None,
            security_stamp: None,
            concurrency_stamp: Uuid::new_v4().to_string(),
            lockout_enabled: false,
            lockout_end: None,
        }
    }

    /// Builder-style email assignment for freshly constructed users
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    // Getters

    pub fn id(&self) -> &UserId {
        &self.id
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    pub fn normalized_user_name(&self) -> Option<&str> {
        self.normalized_user_name.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn normalized_email(&self) -> Option<&str> {
        self.normalized_email.as_deref()
    }

    pub fn email_confirmed(&self) -> bool {
        self.email_confirmed
    }

    pub fn password_hash(&self) -> Option<&str> {
        self.password_hash.as_deref()
    }

    pub fn security_stamp(&self) -> Option<&str> {
        self.security_stamp.as_deref()
    }

    pub fn concurrency_stamp(&self) -> &str {
        &self.concurrency_stamp
    }

    pub fn lockout_enabled(&self) -> bool {
        self.lockout_enabled
    }

    pub fn lockout_end(&self) -> Option<DateTime<Utc>> {
        self.lockout_end
    }

    /// Check whether the user is locked out at the given instant
    pub fn is_locked_out_at(&self, now: DateTime<Utc>) -> bool {
        self.lockout_enabled && self.lockout_end.is_some_and(|end| end > now)
    }

    // Mutators

    pub fn set_user_name(&mut self, user_name: Option<String>) {
        self.user_name = user_name;
    }

    pub fn set_normalized_user_name(&mut self, normalized_user_name: Option<String>) {
        self.normalized_user_name = normalized_user_name;
    }

    pub fn set_email(&mut self, email: Option<String>) {
        self.email = email;
    }

    pub fn set_normalized_email(&mut self, normalized_email: Option<String>) {
        self.normalized_email = normalized_email;
    }

    pub fn set_email_confirmed(&mut self, confirmed: bool) {
        self.email_confirmed = confirmed;
    }

    pub fn set_password_hash(&mut self, password_hash: Option<String>) {
        self.password_hash = password_hash;
    }

    pub fn set_security_stamp(&mut self, security_stamp: Option<String>) {
        self.security_stamp = security_stamp;
    }

    pub fn set_concurrency_stamp(&mut self, concurrency_stamp: impl Into<String>) {
        self.concurrency_stamp = concurrency_stamp.into();
    }

    pub fn set_lockout_enabled(&mut self, enabled: bool) {
        self.lockout_enabled = enabled;
    }

    pub fn set_lockout_end(&mut self, lockout_end: Option<DateTime<Utc>>) {
        self.lockout_end = lockout_end;
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for User {}

/// Lookup key of an external login: the provider and the key it issued
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoginKey {
    pub login_provider: String,
    pub provider_key: String,
}

impl LoginKey {
    pub fn new(login_provider: impl Into<String>, provider_key: impl Into<String>) -> Self {
        Self {
            login_provider: login_provider.into(),
            provider_key: provider_key.into(),
        }
    }
}

/// An external identity bound to a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLoginInfo {
    pub login_provider: String,
    pub provider_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_display_name: Option<String>,
}

impl UserLoginInfo {
    pub fn new(
        login_provider: impl Into<String>,
        provider_key: impl Into<String>,
        provider_display_name: Option<String>,
    ) -> Self {
        Self {
            login_provider: login_provider.into(),
            provider_key: provider_key.into(),
            provider_display_name,
        }
    }

    pub fn key(&self) -> LoginKey {
        LoginKey::new(&self.login_provider, &self.provider_key)
    }
}

/// A role record.
///
/// Roles are created and normalized by the host application; the bulk layer only
/// resolves them by normalized name and manages memberships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    id: RoleId,
    name: String,
    normalized_name: String,
}

impl Role {
    pub fn new(id: RoleId, name: impl Into<String>, normalized_name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            normalized_name: normalized_name.into(),
        }
    }

    pub fn id(&self) -> &RoleId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn normalized_name(&self) -> &str {
        &self.normalized_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_valid() {
        let id = UserId::new("user-1").unwrap();
        assert_eq!(id.as_str(), "user-1");
        assert_eq!(id.to_string(), "user-1");
    }

    #[test]
    fn test_user_id_empty() {
        assert!(UserId::new("").is_err());
        assert!(UserId::new("   ").is_err());
    }

    #[test]
    fn test_user_creation() {
        let user = User::new("alice").with_email("alice@example.com");

        assert_eq!(user.user_name(), Some("alice"));
        assert_eq!(user.email(), Some("alice@example.com"));
        assert!(user.normalized_user_name().is_none());
        assert!(user.password_hash().is_none());
        assert!(user.security_stamp().is_none());
        assert!(!user.concurrency_stamp().is_empty());
        assert!(!user.lockout_enabled());
    }

    #[test]
    fn test_user_equality_is_by_id() {
        let id = UserId::new("same").unwrap();
        let first = User::with_id(id.clone(), "alice");
        let second = User::with_id(id, "bob");

        assert_eq!(first, second);
        assert_ne!(User::new("alice"), User::new("alice"));
    }

    #[test]
    fn test_is_locked_out_at() {
        let now = Utc::now();
        let mut user = User::new("alice");
        user.set_lockout_end(Some(now + chrono::Duration::hours(1)));

        assert!(!user.is_locked_out_at(now));

        user.set_lockout_enabled(true);
        assert!(user.is_locked_out_at(now));
        assert!(!user.is_locked_out_at(now + chrono::Duration::hours(2)));
    }

    #[test]
    fn test_user_serialization_excludes_password() {
        let mut user = User::new("alice");
        user.set_password_hash(Some("secret-hash".to_string()));

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(!json.contains("password_hash"));
    }

    #[test]
    fn test_login_info_key() {
        let login = UserLoginInfo::new("github", "1234", Some("GitHub".to_string()));
        assert_eq!(login.key(), LoginKey::new("github", "1234"));
    }
}
