//! Batch user manager.
//!
//! Each public write runs as a short pipeline over a [`FilteredBatch`]: optional
//! unconditional pre-steps, guard and validation stages that drop failed items,
//! then one persistence call on the survivors. Results always come back aligned
//! with the input. Reads resolve the whole batch at once and keep request order.

mod associations;
mod credentials;
mod users;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::password::{Argon2PasswordHasher, PasswordHasher};
use super::stamp::new_security_stamp;
use super::validation::{
    DefaultPasswordValidator, DefaultUserValidator, PasswordValidator, UserValidator,
};
use crate::config::IdentityOptions;
use crate::domain::identity::resolve::fill_missing;
use crate::domain::identity::{
    ensure_not_cancelled, Capabilities, Capability, FilteredBatch, IdentityResult,
    LookupNormalizer, LookupProtector, LookupProtectorKeyRing, PasswordCandidate,
    UpperInvariantLookupNormalizer, User, UserEmailStore, UserLockoutStore, UserLoginStore,
    UserPasswordStore, UserRoleStore, UserSecurityStampStore, UserStore,
};
use crate::domain::DomainError;

/// Protector and key ring used when personal data protection is on
#[derive(Clone)]
pub struct PersonalDataProtection {
    pub protector: Arc<dyn LookupProtector>,
    pub key_ring: Arc<dyn LookupProtectorKeyRing>,
}

impl std::fmt::Debug for PersonalDataProtection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersonalDataProtection")
            .field("current_key_id", &self.key_ring.current_key_id())
            .finish()
    }
}

/// Which normalized lookup a find resolves
#[derive(Debug, Clone, Copy)]
enum Lookup {
    Name,
    Email,
}

/// Read-only view of a batch of mutable user references
fn shared<'u>(users: &'u [&mut User]) -> Vec<&'u User> {
    users.iter().map(|user| &**user).collect()
}

/// Entry point for bulk user operations
pub struct UserManager {
    store: Arc<dyn UserStore>,
    options: IdentityOptions,
    password_hasher: Arc<dyn PasswordHasher>,
    user_validators: Vec<Arc<dyn UserValidator>>,
    password_validators: Vec<Arc<dyn PasswordValidator>>,
    normalizer: Option<Arc<dyn LookupNormalizer>>,
    protection: Option<PersonalDataProtection>,
    capabilities: Capabilities,
    cancel: CancellationToken,
    disposed: AtomicBool,
}

impl std::fmt::Debug for UserManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserManager")
            .field("store", &self.store)
            .field("capabilities", &self.capabilities)
            .field("user_validators", &self.user_validators.len())
            .field("password_validators", &self.password_validators.len())
            .field("protection", &self.protection)
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

impl UserManager {
    /// Manager with the default validators, normalizer and hasher
    pub fn new(store: Arc<dyn UserStore>, options: IdentityOptions) -> Result<Self, DomainError> {
        UserManagerBuilder::new(store)
            .options(options)
            .with_defaults()
            .build()
    }

    pub fn builder(store: Arc<dyn UserStore>) -> UserManagerBuilder {
        UserManagerBuilder::new(store)
    }

    pub fn options(&self) -> &IdentityOptions {
        &self.options
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Close the store and refuse every later call
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.store.close();
            debug!("User manager disposed");
        }
    }

    fn ensure_active(&self) -> Result<(), DomainError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(DomainError::disposed("UserManager"));
        }
        ensure_not_cancelled(&self.cancel)
    }

    fn require(&self, capability: Capability) -> Result<(), DomainError> {
        if self.capabilities.contains(capability) {
            Ok(())
        } else {
            Err(DomainError::not_supported(capability))
        }
    }

    fn email_store(&self) -> Result<&dyn UserEmailStore, DomainError> {
        self.require(Capability::Email)?;
        self.store
            .email_store()
            .ok_or_else(|| DomainError::not_supported(Capability::Email))
    }

    fn lockout_store(&self) -> Result<&dyn UserLockoutStore, DomainError> {
        self.require(Capability::Lockout)?;
        self.store
            .lockout_store()
            .ok_or_else(|| DomainError::not_supported(Capability::Lockout))
    }

    fn login_store(&self) -> Result<&dyn UserLoginStore, DomainError> {
        self.require(Capability::Login)?;
        self.store
            .login_store()
            .ok_or_else(|| DomainError::not_supported(Capability::Login))
    }

    fn password_store(&self) -> Result<&dyn UserPasswordStore, DomainError> {
        self.require(Capability::Password)?;
        self.store
            .password_store()
            .ok_or_else(|| DomainError::not_supported(Capability::Password))
    }

    fn role_store(&self) -> Result<&dyn UserRoleStore, DomainError> {
        self.require(Capability::Role)?;
        self.store
            .role_store()
            .ok_or_else(|| DomainError::not_supported(Capability::Role))
    }

    fn security_stamp_store(&self) -> Result<&dyn UserSecurityStampStore, DomainError> {
        self.require(Capability::SecurityStamp)?;
        self.store
            .security_stamp_store()
            .ok_or_else(|| DomainError::not_supported(Capability::SecurityStamp))
    }

    fn protection(&self) -> Option<&PersonalDataProtection> {
        self.protection
            .as_ref()
            .filter(|_| self.options.stores.protect_personal_data)
    }

    fn normalize_name(&self, name: &str) -> String {
        match &self.normalizer {
            Some(normalizer) => normalizer.normalize_name(name),
            None => name.to_owned(),
        }
    }

    fn normalize_email(&self, email: &str) -> String {
        match &self.normalizer {
            Some(normalizer) => normalizer.normalize_email(email),
            None => email.to_owned(),
        }
    }

    /// Run every user validator and merge their errors per position. Users without
    /// a security stamp fail the whole call when the store tracks stamps.
    async fn validate_users(&self, users: &[&User]) -> Result<Vec<IdentityResult>, DomainError> {
        if self.supports(Capability::SecurityStamp) {
            let stamps = self.security_stamp_store()?.security_stamps(users)?;
            let missing = stamps
                .iter()
                .filter(|stamp| stamp.as_deref().is_none_or(|s| s.trim().is_empty()))
                .count();

            if missing > 0 {
                warn!(missing, "Users without a security stamp");
                return Err(DomainError::MissingSecurityStamp { count: missing });
            }
        }

        let mut results = vec![IdentityResult::Success; users.len()];
        for validator in &self.user_validators {
            let outcomes = validator.validate(self, users).await?;
            DomainError::ensure_aligned("validate users", users.len(), outcomes.len())?;

            for (result, outcome) in results.iter_mut().zip(outcomes) {
                result.merge(outcome);
            }
        }

        Ok(results)
    }

    async fn validate_passwords(
        &self,
        candidates: &[PasswordCandidate<'_>],
    ) -> Result<Vec<IdentityResult>, DomainError> {
        let mut results = vec![IdentityResult::Success; candidates.len()];
        for validator in &self.password_validators {
            let outcomes = validator.validate(self, candidates).await?;
            DomainError::ensure_aligned("validate passwords", candidates.len(), outcomes.len())?;

            for (result, outcome) in results.iter_mut().zip(outcomes) {
                result.merge(outcome);
            }
        }

        Ok(results)
    }

    /// Assign fresh security stamps when the store tracks them
    fn update_security_stamps_internal(&self, users: &mut [&mut User]) -> Result<(), DomainError> {
        if !self.supports(Capability::SecurityStamp) {
            return Ok(());
        }

        let stamps = users.iter().map(|_| Some(new_security_stamp())).collect();
        self.security_stamp_store()?.set_security_stamps(users, stamps)
    }

    fn update_normalized_fields(&self, users: &mut [&mut User]) -> Result<(), DomainError> {
        self.update_normalized_user_names(users)?;
        self.update_normalized_emails(users)
    }

    /// Validate, normalize and persist. The store is called even for an empty
    /// survivor set so that staged changes never outlive the operation.
    async fn update_internal(
        &self,
        users: &mut [&mut User],
    ) -> Result<Vec<IdentityResult>, DomainError> {
        let validation = self.validate_users(&shared(users)).await?;

        let mut batch = FilteredBatch::new(users.iter_mut().map(|user| &mut **user));
        batch.apply("validate users", validation)?;
        debug!(live = batch.len(), "Users passed validation");

        self.update_normalized_fields(batch.items_mut())?;

        ensure_not_cancelled(&self.cancel)?;
        let outcomes = self.store.update(batch.items_mut(), &self.cancel).await?;
        batch.apply("update users", outcomes)?;

        Ok(batch.into_results())
    }

    async fn find_by_lookup(
        &self,
        lookup: Lookup,
        keys: &[String],
    ) -> Result<Vec<Option<User>>, DomainError> {
        let found = match lookup {
            Lookup::Name => self.store.find_by_names(keys, &self.cancel).await?,
            Lookup::Email => {
                self.email_store()?
                    .find_by_emails(keys, &self.cancel)
                    .await?
            }
        };
        DomainError::ensure_aligned("find users", keys.len(), found.len())?;
        Ok(found)
    }

    /// Resolve normalized keys, then try every protection key for the positions
    /// still unresolved
    async fn find_normalized(
        &self,
        lookup: Lookup,
        normalized: Vec<String>,
    ) -> Result<Vec<Option<User>>, DomainError> {
        let mut found = self.find_by_lookup(lookup, &normalized).await?;

        if let Some(protection) = self.protection() {
            for key_id in protection.key_ring.all_key_ids() {
                let protected = normalized
                    .iter()
                    .map(|value| protection.protector.protect(&key_id, value))
                    .collect::<Result<Vec<_>, DomainError>>()?;

                let retry = self.find_by_lookup(lookup, &protected).await?;
                fill_missing(&mut found, retry);
            }
        }

        Ok(found)
    }
}

/// Builder for [`UserManager`]
pub struct UserManagerBuilder {
    store: Arc<dyn UserStore>,
    options: IdentityOptions,
    password_hasher: Option<Arc<dyn PasswordHasher>>,
    user_validators: Vec<Arc<dyn UserValidator>>,
    password_validators: Vec<Arc<dyn PasswordValidator>>,
    normalizer: Option<Arc<dyn LookupNormalizer>>,
    protection: Option<PersonalDataProtection>,
    cancel: CancellationToken,
}

impl UserManagerBuilder {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self {
            store,
            options: IdentityOptions::default(),
            password_hasher: None,
            user_validators: Vec::new(),
            password_validators: Vec::new(),
            normalizer: None,
            protection: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn options(mut self, options: IdentityOptions) -> Self {
        self.options = options;
        self
    }

    pub fn password_hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.password_hasher = Some(hasher);
        self
    }

    pub fn user_validator(mut self, validator: Arc<dyn UserValidator>) -> Self {
        self.user_validators.push(validator);
        self
    }

    pub fn password_validator(mut self, validator: Arc<dyn PasswordValidator>) -> Self {
        self.password_validators.push(validator);
        self
    }

    pub fn key_normalizer(mut self, normalizer: Arc<dyn LookupNormalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn personal_data_protection(
        mut self,
        protector: Arc<dyn LookupProtector>,
        key_ring: Arc<dyn LookupProtectorKeyRing>,
    ) -> Self {
        self.protection = Some(PersonalDataProtection {
            protector,
            key_ring,
        });
        self
    }

    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Default user and password validators plus the upper-case normalizer
    pub fn with_defaults(self) -> Self {
        self.user_validator(Arc::new(DefaultUserValidator::new()))
            .password_validator(Arc::new(DefaultPasswordValidator::new()))
            .key_normalizer(Arc::new(UpperInvariantLookupNormalizer))
    }

    pub fn build(self) -> Result<UserManager, DomainError> {
        self.store.ensure_open()?;

        if self.options.stores.protect_personal_data && self.protection.is_none() {
            return Err(DomainError::configuration(
                "Personal data protection is enabled but no lookup protector is configured",
            ));
        }

        let capabilities = Capabilities::detect(self.store.as_ref());
        info!(%capabilities, "User manager created");

        Ok(UserManager {
            store: self.store,
            options: self.options,
            password_hasher: self
                .password_hasher
                .unwrap_or_else(|| Arc::new(Argon2PasswordHasher::default())),
            user_validators: self.user_validators,
            password_validators: self.password_validators,
            normalizer: self.normalizer,
            protection: self.protection,
            capabilities,
            cancel: self.cancel,
            disposed: AtomicBool::new(false),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use argon2::Params;

    use super::*;
    use crate::domain::identity::{Role, RoleId};
    use crate::infrastructure::identity::in_memory_store::InMemoryUserStore;

    pub fn fast_hasher() -> Arc<dyn PasswordHasher> {
        let params = Params::new(8, 1, 1, None).expect("valid argon2 params");
        Arc::new(Argon2PasswordHasher::new(params))
    }

    pub fn role(name: &str) -> Role {
        Role::new(RoleId::new(format!("role-{}", name)), name, name.to_uppercase())
    }

    pub fn store_with_roles(names: &[&str]) -> Arc<InMemoryUserStore> {
        Arc::new(InMemoryUserStore::with_roles(names.iter().map(|name| role(name))))
    }

    pub fn manager_for(store: Arc<InMemoryUserStore>, options: IdentityOptions) -> UserManager {
        UserManager::builder(store)
            .options(options)
            .with_defaults()
            .password_hasher(fast_hasher())
            .build()
            .expect("manager builds")
    }

    pub fn manager() -> (UserManager, Arc<InMemoryUserStore>) {
        let store = store_with_roles(&["editor", "admin"]);
        (manager_for(store.clone(), IdentityOptions::default()), store)
    }

    /// Create users with the given names, asserting every create succeeded
    pub async fn created(manager: &UserManager, names: &[&str]) -> Vec<User> {
        let mut users: Vec<User> = names.iter().map(|name| User::new(*name)).collect();
        let mut refs: Vec<&mut User> = users.iter_mut().collect();

        let results = manager.create(&mut refs).await.expect("create runs");
        assert!(results.iter().all(IdentityResult::succeeded), "{:?}", results);

        users
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio_test::{assert_err, assert_ok};

    use super::test_support::*;
    use super::*;
    use crate::domain::identity::{MockLookupProtector, MockLookupProtectorKeyRing, UserId};

    /// Store exposing only the base capability
    #[derive(Debug, Default)]
    struct BareStore;

    #[async_trait]
    impl UserStore for BareStore {
        fn ensure_open(&self) -> Result<(), DomainError> {
            Ok(())
        }

        fn close(&self) {}

        async fn create(
            &self,
            users: &[&User],
            _cancel: &CancellationToken,
        ) -> Result<Vec<IdentityResult>, DomainError> {
            Ok(vec![IdentityResult::Success; users.len()])
        }

        async fn update(
            &self,
            users: &mut [&mut User],
            _cancel: &CancellationToken,
        ) -> Result<Vec<IdentityResult>, DomainError> {
            Ok(vec![IdentityResult::Success; users.len()])
        }

        async fn delete(
            &self,
            users: &[&User],
            _cancel: &CancellationToken,
        ) -> Result<Vec<IdentityResult>, DomainError> {
            Ok(vec![IdentityResult::Success; users.len()])
        }

        async fn find_by_ids(
            &self,
            ids: &[UserId],
            _cancel: &CancellationToken,
        ) -> Result<Vec<Option<User>>, DomainError> {
            Ok(vec![None; ids.len()])
        }

        async fn find_by_names(
            &self,
            names: &[String],
            _cancel: &CancellationToken,
        ) -> Result<Vec<Option<User>>, DomainError> {
            Ok(vec![None; names.len()])
        }
    }

    #[test]
    fn test_detects_every_capability_of_in_memory_store() {
        let (manager, _) = manager();

        for capability in Capability::ALL {
            assert!(manager.supports(capability), "{}", capability);
        }
    }

    #[test]
    fn test_protection_requires_protector() {
        let mut options = IdentityOptions::default();
        options.stores.protect_personal_data = true;

        let result = UserManager::new(store_with_roles(&[]), options);
        assert!(matches!(result, Err(DomainError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_bare_store_creates_without_optional_capabilities() {
        let manager = UserManager::new(Arc::new(BareStore), IdentityOptions::default()).unwrap();
        assert_eq!(manager.capabilities(), Capabilities::empty());

        let mut user = User::new("alice").with_email("not validated here");
        let results = assert_ok!(manager.create(&mut [&mut user]).await);

        assert!(results[0].succeeded());
        assert_eq!(user.normalized_user_name(), Some("ALICE"));
        assert!(user.normalized_email().is_none());
        assert!(user.security_stamp().is_none());
        assert!(!user.lockout_enabled());
    }

    #[tokio::test]
    async fn test_bare_store_rejects_unsupported_operations() {
        let manager = UserManager::new(Arc::new(BareStore), IdentityOptions::default()).unwrap();
        let user = User::new("alice");

        let error = manager.get_emails(&[&user]).unwrap_err();
        assert!(matches!(
            error,
            DomainError::NotSupported {
                capability: Capability::Email
            }
        ));

        let error = manager.get_roles(&[&user]).await.unwrap_err();
        assert!(matches!(
            error,
            DomainError::NotSupported {
                capability: Capability::Role
            }
        ));
    }

    #[tokio::test]
    async fn test_disposed_manager_refuses_calls() {
        let (manager, store) = manager();
        manager.dispose();
        manager.dispose();

        let mut user = User::new("alice");
        let error = manager.create(&mut [&mut user]).await.unwrap_err();
        assert!(matches!(error, DomainError::Disposed { .. }));
        assert!(matches!(store.ensure_open(), Err(DomainError::Disposed { .. })));
        assert_err!(manager.normalize_names(&[Some("bob")]));
    }

    #[tokio::test]
    async fn test_cancelled_manager_refuses_calls() {
        let cancel = CancellationToken::new();
        let manager = UserManager::builder(store_with_roles(&[]))
            .with_defaults()
            .cancellation(cancel.clone())
            .build()
            .unwrap();

        cancel.cancel();

        let error = manager.find_by_names(&["alice"]).await.unwrap_err();
        assert!(matches!(error, DomainError::Cancelled));
    }

    #[tokio::test]
    async fn test_protected_lookups_try_every_key() {
        let mut options = IdentityOptions::default();
        options.stores.protect_personal_data = true;

        let mut protector = MockLookupProtector::new();
        protector
            .expect_protect()
            .returning(|key_id: &str, data: &str| Ok(format!("{}:{}", key_id, data)));

        let mut key_ring = MockLookupProtectorKeyRing::new();
        key_ring
            .expect_current_key_id()
            .returning(|| "new".to_string());
        key_ring
            .expect_all_key_ids()
            .returning(|| vec!["old".to_string(), "new".to_string()]);

        let store = store_with_roles(&[]);
        let manager = UserManager::builder(store.clone())
            .options(options)
            .with_defaults()
            .password_hasher(fast_hasher())
            .personal_data_protection(Arc::new(protector), Arc::new(key_ring))
            .build()
            .unwrap();

        let users = created(&manager, &["alice"]).await;
        assert_eq!(users[0].normalized_user_name(), Some("new:ALICE"));

        let found = manager.find_by_names(&["alice", "bob"]).await.unwrap();
        assert_eq!(found[0].as_ref().map(User::id), Some(users[0].id()));
        assert!(found[1].is_none());

        let lookups = manager
            .protect_lookups(vec![Some("ALICE".to_string()), None])
            .unwrap();
        assert_eq!(lookups, vec![Some("new:ALICE".to_string()), None]);
    }

    #[tokio::test]
    async fn test_hmac_protected_names_stay_searchable_after_key_rotation() {
        use crate::infrastructure::identity::{HmacLookupProtector, StaticKeyRing};

        let mut options = IdentityOptions::default();
        options.stores.protect_personal_data = true;
        let store = store_with_roles(&[]);

        let original = Arc::new(StaticKeyRing::new("k1", b"first-secret".to_vec()));
        let manager = UserManager::builder(store.clone())
            .options(options.clone())
            .with_defaults()
            .password_hasher(fast_hasher())
            .personal_data_protection(
                Arc::new(HmacLookupProtector::new(original.clone())),
                original,
            )
            .build()
            .unwrap();

        let users = created(&manager, &["alice"]).await;
        let stored_name = users[0].normalized_user_name().unwrap_or_default().to_string();
        assert!(stored_name.starts_with("k1:"));
        assert!(!stored_name.contains("ALICE"));

        let rotated = Arc::new(
            StaticKeyRing::new("k2", b"second-secret".to_vec())
                .with_key("k1", b"first-secret".to_vec()),
        );
        let rotated_manager = UserManager::builder(store)
            .options(options)
            .with_defaults()
            .password_hasher(fast_hasher())
            .personal_data_protection(
                Arc::new(HmacLookupProtector::new(rotated.clone())),
                rotated,
            )
            .build()
            .unwrap();

        let found = rotated_manager
            .find_by_names(&["alice", "bob"])
            .await
            .unwrap();
        assert_eq!(found[0].as_ref().map(User::id), Some(users[0].id()));
        assert!(found[1].is_none());
    }

    #[tokio::test]
    async fn test_misaligned_validator_fails_call() {
        #[derive(Debug)]
        struct ShortValidator;

        #[async_trait]
        impl UserValidator for ShortValidator {
            async fn validate(
                &self,
                _manager: &UserManager,
                _users: &[&User],
            ) -> Result<Vec<IdentityResult>, DomainError> {
                Ok(Vec::new())
            }
        }

        let manager = UserManager::builder(store_with_roles(&[]))
            .user_validator(Arc::new(ShortValidator))
            .build()
            .unwrap();

        let mut user = User::new("alice");
        let error = manager.create(&mut [&mut user]).await.unwrap_err();
        assert!(matches!(
            error,
            DomainError::Misaligned {
                expected: 1,
                actual: 0,
                ..
            }
        ));
    }
}
