//! Passwords and lockout state

use tracing::{debug, instrument, warn};

use super::UserManager;
use crate::domain::identity::{
    FilteredBatch, IdentityError, IdentityResult, PasswordCandidate, User, UserLockoutEnabled,
    UserLockoutEnd, UserPassword,
};
use crate::domain::DomainError;
use crate::infrastructure::identity::password::PasswordVerificationResult;
use crate::infrastructure::observability::record_results;

impl UserManager {
    /// Set passwords on users that have none.
    ///
    /// Users that already have a hash fail with `UserAlreadyHasPassword`, then the
    /// remaining passwords are validated. Survivors are hashed, get a fresh
    /// security stamp and are persisted.
    #[instrument(skip_all, fields(batch = pairs.len()))]
    pub async fn add_passwords(
        &self,
        pairs: Vec<UserPassword<'_>>,
    ) -> Result<Vec<IdentityResult>, DomainError> {
        self.ensure_active()?;
        let store = self.password_store()?;

        let mut batch = FilteredBatch::new(pairs);

        let users: Vec<&User> = batch.items().iter().map(|pair| &*pair.user).collect();
        let guard = store
            .has_passwords(&users)?
            .into_iter()
            .map(|has_password| {
                if has_password {
                    IdentityResult::failed(IdentityError::UserAlreadyHasPassword)
                } else {
                    IdentityResult::Success
                }
            })
            .collect();
        batch.apply("password guard", guard)?;

        let candidates: Vec<PasswordCandidate<'_>> = batch
            .items()
            .iter()
            .map(|pair| PasswordCandidate {
                user: &*pair.user,
                password: &pair.password,
            })
            .collect();
        let validation = self.validate_passwords(&candidates).await?;
        batch.apply("validate passwords", validation)?;
        debug!(live = batch.len(), "Passwords passed validation");

        let hashes = batch
            .items()
            .iter()
            .map(|pair| {
                if pair.password.trim().is_empty() {
                    Ok(None)
                } else {
                    self.password_hasher
                        .hash_password(&*pair.user, &pair.password)
                        .map(Some)
                }
            })
            .collect::<Result<Vec<_>, DomainError>>()?;

        let mut users: Vec<&mut User> = batch
            .items_mut()
            .iter_mut()
            .map(|pair| &mut *pair.user)
            .collect();
        store.set_password_hashes(&mut users, hashes)?;
        self.update_security_stamps_internal(&mut users)?;

        let outcomes = self.update_internal(&mut users).await?;
        batch.apply("update users", outcomes)?;

        let results = batch.into_results();
        record_results("add_passwords", &results);
        Ok(results)
    }

    /// Verify passwords; a match whose hash is outdated is rehashed and persisted
    #[instrument(skip_all, fields(batch = pairs.len()))]
    pub async fn check_passwords(
        &self,
        mut pairs: Vec<UserPassword<'_>>,
    ) -> Result<Vec<bool>, DomainError> {
        self.ensure_active()?;
        let store = self.password_store()?;

        let users: Vec<&User> = pairs.iter().map(|pair| &*pair.user).collect();
        let hashes = store.password_hashes(&users)?;

        let verdicts: Vec<PasswordVerificationResult> = pairs
            .iter()
            .zip(&hashes)
            .map(|(pair, hash)| match hash.as_deref() {
                Some(hash) if !hash.trim().is_empty() => self
                    .password_hasher
                    .verify_hashed_password(&*pair.user, hash, &pair.password),
                _ => PasswordVerificationResult::Failed,
            })
            .collect();

        let mut rehash: Vec<&mut UserPassword<'_>> = pairs
            .iter_mut()
            .zip(&verdicts)
            .filter(|(_, verdict)| **verdict == PasswordVerificationResult::SuccessRehashNeeded)
            .map(|(pair, _)| pair)
            .collect();

        if !rehash.is_empty() {
            let hashes = rehash
                .iter()
                .map(|pair| {
                    self.password_hasher
                        .hash_password(&*pair.user, &pair.password)
                        .map(Some)
                })
                .collect::<Result<Vec<_>, DomainError>>()?;

            let mut users: Vec<&mut User> =
                rehash.iter_mut().map(|pair| &mut *pair.user).collect();
            let shared: Vec<&User> = users.iter().map(|user| &**user).collect();
            let previous = store.password_hashes(&shared)?;
            store.set_password_hashes(&mut users, hashes)?;

            let outcomes = self.update_internal(&mut users).await?;
            let mut failed = 0;
            for ((user, outcome), hash) in users.iter_mut().zip(&outcomes).zip(previous) {
                if !outcome.succeeded() {
                    user.set_password_hash(hash);
                    failed += 1;
                }
            }
            if failed > 0 {
                warn!(failed, "Could not persist rehashed passwords");
            }
        }

        Ok(verdicts
            .into_iter()
            .map(|verdict| verdict != PasswordVerificationResult::Failed)
            .collect())
    }

    #[instrument(skip_all, fields(batch = pairs.len()))]
    pub async fn set_lockout_enabled(
        &self,
        pairs: Vec<UserLockoutEnabled<'_>>,
    ) -> Result<Vec<IdentityResult>, DomainError> {
        self.ensure_active()?;
        let store = self.lockout_store()?;

        let (mut users, enabled): (Vec<&mut User>, Vec<bool>) = pairs
            .into_iter()
            .map(|pair| (pair.user, pair.enabled))
            .unzip();
        store.set_lockout_enabled(&mut users, enabled)?;

        let results = self.update_internal(&mut users).await?;
        record_results("set_lockout_enabled", &results);
        Ok(results)
    }

    /// Set lockout end dates; users with lockout disabled fail with
    /// `UserLockoutNotEnabled` and keep their current end date
    #[instrument(skip_all, fields(batch = pairs.len()))]
    pub async fn set_lockout_end_dates(
        &self,
        pairs: Vec<UserLockoutEnd<'_>>,
    ) -> Result<Vec<IdentityResult>, DomainError> {
        self.ensure_active()?;
        let store = self.lockout_store()?;

        let mut batch = FilteredBatch::new(pairs);

        let users: Vec<&User> = batch.items().iter().map(|pair| &*pair.user).collect();
        let guard = store
            .lockout_enabled(&users)?
            .into_iter()
            .map(|enabled| {
                if enabled {
                    IdentityResult::Success
                } else {
                    IdentityResult::failed(IdentityError::UserLockoutNotEnabled)
                }
            })
            .collect();
        batch.apply("lockout guard", guard)?;

        let ends = batch.items().iter().map(|pair| pair.lockout_end).collect();
        let mut users: Vec<&mut User> = batch
            .items_mut()
            .iter_mut()
            .map(|pair| &mut *pair.user)
            .collect();
        store.set_lockout_end_dates(&mut users, ends)?;

        let outcomes = self.update_internal(&mut users).await?;
        batch.apply("update users", outcomes)?;

        let results = batch.into_results();
        record_results("set_lockout_end_dates", &results);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use argon2::Params;
    use chrono::{Duration, Utc};

    use super::super::test_support::*;
    use super::*;
    use crate::config::IdentityOptions;
    use crate::infrastructure::identity::password::{Argon2PasswordHasher, PasswordHasher};

    #[tokio::test]
    async fn test_add_passwords_guards_and_validates() {
        let (manager, store) = manager();
        let mut users = created(&manager, &["alice", "bob", "carol"]).await;
        users[2].set_password_hash(Some("existing".to_string()));
        let [alice, bob, carol] = &mut users[..] else {
            unreachable!()
        };
        let alice_stamp = alice.security_stamp().map(str::to_owned);

        let results = manager
            .add_passwords(vec![
                UserPassword::new(alice, "Secr3t!"),
                UserPassword::new(bob, "weak"),
                UserPassword::new(carol, "Secr3t!"),
            ])
            .await
            .unwrap();

        assert!(results[0].succeeded());
        assert!(results[1]
            .errors()
            .contains(&IdentityError::PasswordTooShort(6)));
        assert_eq!(results[2].errors(), &[IdentityError::UserAlreadyHasPassword]);

        assert!(users[0].password_hash().is_some_and(|h| h.starts_with("$argon2id$")));
        assert_ne!(users[0].security_stamp().map(str::to_owned), alice_stamp);
        assert!(users[1].password_hash().is_none());

        let stored = store.user(users[1].id()).await.unwrap();
        assert!(stored.password_hash().is_none());
    }

    #[tokio::test]
    async fn test_check_passwords() {
        let (manager, _) = manager();
        let mut users = created(&manager, &["alice", "bob"]).await;
        let [alice, bob] = &mut users[..] else {
            unreachable!()
        };

        manager
            .add_passwords(vec![UserPassword::new(alice, "Secr3t!")])
            .await
            .unwrap();

        let verdicts = manager
            .check_passwords(vec![
                UserPassword::new(alice, "Secr3t!"),
                UserPassword::new(bob, "Secr3t!"),
            ])
            .await
            .unwrap();
        assert_eq!(verdicts, vec![true, false]);

        let verdicts = manager
            .check_passwords(vec![UserPassword::new(alice, "wrong")])
            .await
            .unwrap();
        assert_eq!(verdicts, vec![false]);
    }

    #[tokio::test]
    async fn test_check_passwords_rehashes_outdated_hashes() {
        let store = store_with_roles(&[]);
        let old_hasher = Argon2PasswordHasher::new(Params::new(8, 1, 1, None).unwrap());
        let new_params = Params::new(16, 1, 1, None).unwrap();

        let manager = manager_for(store.clone(), IdentityOptions::default());
        let mut users = created(&manager, &["alice", "bob"]).await;

        let old_hash = old_hasher.hash_password(&users[0], "Secr3t!").unwrap();
        users[0].set_password_hash(Some(old_hash.clone()));

        let upgraded = UserManager::builder(store.clone())
            .with_defaults()
            .password_hasher(Arc::new(Argon2PasswordHasher::new(new_params)))
            .build()
            .unwrap();

        let [alice, bob] = &mut users[..] else {
            unreachable!()
        };
        let verdicts = upgraded
            .check_passwords(vec![
                UserPassword::new(alice, "Secr3t!"),
                UserPassword::new(bob, "Secr3t!"),
            ])
            .await
            .unwrap();

        assert_eq!(verdicts, vec![true, false]);
        assert_ne!(users[0].password_hash(), Some(old_hash.as_str()));

        let stored = store.user(users[0].id()).await.unwrap();
        assert_eq!(stored.password_hash(), users[0].password_hash());
    }

    #[tokio::test]
    async fn test_rehash_of_stale_copy_keeps_caller_in_step_with_store() {
        let store = store_with_roles(&[]);
        let old_hasher = Argon2PasswordHasher::new(Params::new(8, 1, 1, None).unwrap());
        let new_params = Params::new(16, 1, 1, None).unwrap();

        let manager = manager_for(store.clone(), IdentityOptions::default());
        let mut users = created(&manager, &["alice"]).await;

        let old_hash = old_hasher.hash_password(&users[0], "Secr3t!").unwrap();
        users[0].set_password_hash(Some(old_hash.clone()));
        let results = manager.update(&mut [&mut users[0]]).await.unwrap();
        assert!(results[0].succeeded());

        let mut stale = users[0].clone();
        let results = manager.update(&mut [&mut users[0]]).await.unwrap();
        assert!(results[0].succeeded());

        let upgraded = UserManager::builder(store.clone())
            .with_defaults()
            .password_hasher(Arc::new(Argon2PasswordHasher::new(new_params)))
            .build()
            .unwrap();

        let verdicts = upgraded
            .check_passwords(vec![UserPassword::new(&mut stale, "Secr3t!")])
            .await
            .unwrap();
        assert_eq!(verdicts, vec![true]);

        let stored = store.user(stale.id()).await.unwrap();
        assert_eq!(stale.password_hash(), Some(old_hash.as_str()));
        assert_eq!(stored.password_hash(), stale.password_hash());
    }

    #[tokio::test]
    async fn test_set_lockout_end_dates_requires_lockout_enabled() {
        let (manager, store) = manager();
        let mut users = created(&manager, &["alice", "bob"]).await;
        let [alice, bob] = &mut users[..] else {
            unreachable!()
        };

        let results = manager
            .set_lockout_enabled(vec![UserLockoutEnabled::new(bob, false)])
            .await
            .unwrap();
        assert!(results[0].succeeded());

        let until = Utc::now() + Duration::hours(1);
        let results = manager
            .set_lockout_end_dates(vec![
                UserLockoutEnd::new(alice, Some(until)),
                UserLockoutEnd::new(bob, Some(until)),
            ])
            .await
            .unwrap();

        assert!(results[0].succeeded());
        assert_eq!(results[1].errors(), &[IdentityError::UserLockoutNotEnabled]);

        let stored = store.user(users[0].id()).await.unwrap();
        assert_eq!(stored.lockout_end(), Some(until));
        assert!(stored.is_locked_out_at(Utc::now()));

        let stored = store.user(users[1].id()).await.unwrap();
        assert!(stored.lockout_end().is_none());
        assert_eq!(
            manager.get_lockout_enabled(&[&users[0], &users[1]]).unwrap(),
            vec![true, false]
        );
    }
}
