//! Account lifecycle, user names, emails, stamps and lookups

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use super::{shared, Lookup, UserManager};
use crate::domain::identity::{
    Capability, FilteredBatch, IdentityResult, User, UserEmail, UserId, UserName,
};
use crate::domain::DomainError;
use crate::infrastructure::observability::record_results;

impl UserManager {
    /// Create users without passwords.
    ///
    /// Every user gets a fresh security stamp. Users failing validation drop out;
    /// survivors get lockout enabled when policy asks for it, are normalized and
    /// handed to the store in one batch.
    #[instrument(skip_all, fields(batch = users.len()))]
    pub async fn create(
        &self,
        users: &mut [&mut User],
    ) -> Result<Vec<IdentityResult>, DomainError> {
        self.ensure_active()?;

        self.update_security_stamps_internal(users)?;
        let validation = self.validate_users(&shared(users)).await?;

        let mut batch = FilteredBatch::new(users.iter_mut().map(|user| &mut **user));
        batch.apply("validate users", validation)?;
        debug!(live = batch.len(), "Users passed validation");

        if self.options.lockout.allowed_for_new_users && self.supports(Capability::Lockout) {
            let enabled = vec![true; batch.len()];
            self.lockout_store()?
                .set_lockout_enabled(batch.items_mut(), enabled)?;
        }

        self.update_normalized_fields(batch.items_mut())?;

        self.ensure_active()?;
        let outcomes = self
            .store
            .create(&shared(batch.items()), &self.cancel)
            .await?;
        batch.apply("create users", outcomes)?;

        let results = batch.into_results();
        record_results("create", &results);
        Ok(results)
    }

    /// Validate, normalize and persist users; advances each concurrency stamp
    #[instrument(skip_all, fields(batch = users.len()))]
    pub async fn update(
        &self,
        users: &mut [&mut User],
    ) -> Result<Vec<IdentityResult>, DomainError> {
        self.ensure_active()?;

        let results = self.update_internal(users).await?;
        record_results("update", &results);
        Ok(results)
    }

    #[instrument(skip_all, fields(batch = users.len()))]
    pub async fn delete(&self, users: &[&User]) -> Result<Vec<IdentityResult>, DomainError> {
        self.ensure_active()?;

        let results = self.store.delete(users, &self.cancel).await?;
        DomainError::ensure_aligned("delete users", users.len(), results.len())?;

        record_results("delete", &results);
        Ok(results)
    }

    /// Assign user names, refresh stamps and persist
    #[instrument(skip_all, fields(batch = pairs.len()))]
    pub async fn set_user_names(
        &self,
        pairs: Vec<UserName<'_>>,
    ) -> Result<Vec<IdentityResult>, DomainError> {
        self.ensure_active()?;

        let (mut users, names): (Vec<&mut User>, Vec<Option<String>>) = pairs
            .into_iter()
            .map(|pair| (pair.user, pair.user_name))
            .unzip();

        self.store.set_user_names(&mut users, names)?;
        self.update_security_stamps_internal(&mut users)?;

        let results = self.update_internal(&mut users).await?;
        record_results("set_user_names", &results);
        Ok(results)
    }

    /// Assign emails, mark them unconfirmed, refresh stamps and persist
    #[instrument(skip_all, fields(batch = pairs.len()))]
    pub async fn set_emails(
        &self,
        pairs: Vec<UserEmail<'_>>,
    ) -> Result<Vec<IdentityResult>, DomainError> {
        self.ensure_active()?;
        let store = self.email_store()?;

        let (mut users, emails): (Vec<&mut User>, Vec<Option<String>>) = pairs
            .into_iter()
            .map(|pair| (pair.user, pair.email))
            .unzip();

        let unconfirmed = vec![false; users.len()];
        store.set_emails(&mut users, emails)?;
        store.set_email_confirmed(&mut users, unconfirmed)?;
        self.update_security_stamps_internal(&mut users)?;

        let results = self.update_internal(&mut users).await?;
        record_results("set_emails", &results);
        Ok(results)
    }

    /// Regenerate security stamps and persist
    #[instrument(skip_all, fields(batch = users.len()))]
    pub async fn update_security_stamps(
        &self,
        users: &mut [&mut User],
    ) -> Result<Vec<IdentityResult>, DomainError> {
        self.ensure_active()?;
        self.require(Capability::SecurityStamp)?;

        self.update_security_stamps_internal(users)?;

        let results = self.update_internal(users).await?;
        record_results("update_security_stamps", &results);
        Ok(results)
    }

    pub async fn find_by_ids(&self, ids: &[UserId]) -> Result<Vec<Option<User>>, DomainError> {
        self.ensure_active()?;

        let found = self.store.find_by_ids(ids, &self.cancel).await?;
        DomainError::ensure_aligned("find users by id", ids.len(), found.len())?;
        Ok(found)
    }

    /// Find users by name. With personal data protection on, every protection key
    /// is tried for names not found in clear.
    #[instrument(skip_all, fields(batch = user_names.len()))]
    pub async fn find_by_names(
        &self,
        user_names: &[&str],
    ) -> Result<Vec<Option<User>>, DomainError> {
        self.ensure_active()?;

        let normalized = user_names
            .iter()
            .map(|name| self.normalize_name(name))
            .collect();
        self.find_normalized(Lookup::Name, normalized).await
    }

    /// Find users by email, trying protection keys like [`UserManager::find_by_names`]
    #[instrument(skip_all, fields(batch = emails.len()))]
    pub async fn find_by_emails(&self, emails: &[&str]) -> Result<Vec<Option<User>>, DomainError> {
        self.ensure_active()?;
        self.require(Capability::Email)?;

        let normalized = emails
            .iter()
            .map(|email| self.normalize_email(email))
            .collect();
        self.find_normalized(Lookup::Email, normalized).await
    }

    pub fn get_user_ids(&self, users: &[&User]) -> Result<Vec<UserId>, DomainError> {
        self.ensure_active()?;
        self.store.user_ids(users)
    }

    pub fn get_user_names(&self, users: &[&User]) -> Result<Vec<Option<String>>, DomainError> {
        self.ensure_active()?;
        self.store.user_names(users)
    }

    pub fn get_emails(&self, users: &[&User]) -> Result<Vec<Option<String>>, DomainError> {
        self.ensure_active()?;
        self.email_store()?.emails(users)
    }

    pub fn are_emails_confirmed(&self, users: &[&User]) -> Result<Vec<bool>, DomainError> {
        self.ensure_active()?;
        self.email_store()?.email_confirmed(users)
    }

    pub fn get_security_stamps(&self, users: &[&User]) -> Result<Vec<Option<String>>, DomainError> {
        self.ensure_active()?;
        self.security_stamp_store()?.security_stamps(users)
    }

    pub fn get_lockout_enabled(&self, users: &[&User]) -> Result<Vec<bool>, DomainError> {
        self.ensure_active()?;
        self.lockout_store()?.lockout_enabled(users)
    }

    pub fn get_lockout_end_dates(
        &self,
        users: &[&User],
    ) -> Result<Vec<Option<DateTime<Utc>>>, DomainError> {
        self.ensure_active()?;
        self.lockout_store()?.lockout_end_dates(users)
    }

    /// Canonical form of user or role names; absent names stay absent
    pub fn normalize_names(&self, names: &[Option<&str>]) -> Result<Vec<Option<String>>, DomainError> {
        self.ensure_active()?;

        Ok(match &self.normalizer {
            Some(normalizer) => normalizer.normalize_names(names),
            None => names.iter().map(|name| name.map(str::to_owned)).collect(),
        })
    }

    pub fn normalize_emails(
        &self,
        emails: &[Option<&str>],
    ) -> Result<Vec<Option<String>>, DomainError> {
        self.ensure_active()?;

        Ok(match &self.normalizer {
            Some(normalizer) => normalizer.normalize_emails(emails),
            None => emails.iter().map(|email| email.map(str::to_owned)).collect(),
        })
    }

    /// Protect normalized lookups under the current key. Values pass through
    /// unchanged when personal data protection is off.
    pub fn protect_lookups(
        &self,
        values: Vec<Option<String>>,
    ) -> Result<Vec<Option<String>>, DomainError> {
        self.ensure_active()?;

        let Some(protection) = self.protection() else {
            return Ok(values);
        };

        let key_id = protection.key_ring.current_key_id();
        values
            .into_iter()
            .map(|value| {
                value
                    .map(|value| protection.protector.protect(&key_id, &value))
                    .transpose()
            })
            .collect()
    }

    /// Recompute the stored normalized user names from the current names
    pub fn update_normalized_user_names(&self, users: &mut [&mut User]) -> Result<(), DomainError> {
        self.ensure_active()?;

        let names = self.store.user_names(&shared(users))?;
        let names: Vec<Option<&str>> = names.iter().map(Option::as_deref).collect();
        let normalized = self.protect_lookups(self.normalize_names(&names)?)?;

        self.store.set_normalized_user_names(users, normalized)
    }

    /// Recompute the stored normalized emails; a no-op for stores without emails
    pub fn update_normalized_emails(&self, users: &mut [&mut User]) -> Result<(), DomainError> {
        self.ensure_active()?;

        if !self.supports(Capability::Email) {
            return Ok(());
        }

        let store = self.email_store()?;
        let emails = store.emails(&shared(users))?;
        let emails: Vec<Option<&str>> = emails.iter().map(Option::as_deref).collect();
        let normalized = self.protect_lookups(self.normalize_emails(&emails)?)?;

        store.set_normalized_emails(users, normalized)
    }
}
