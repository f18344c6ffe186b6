//! Store contracts.
//!
//! [`UserStore`] is the base every store implements. The optional capabilities
//! (email, lockout, login, password, role, security stamp) are separate traits
//! exposed through accessor methods; the manager checks them once and refuses
//! operations needing a capability the store lacks.
//!
//! Attribute getters and setters read and write the caller's `User` values in
//! place and never touch storage. Login and role mutations are staged and
//! committed by the next `create`, `update` or `delete` call: a batch write
//! commits the staged changes of the users it writes and discards the rest.

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::entity::{LoginKey, User, UserId, UserLoginInfo};
use super::result::IdentityResult;
use crate::domain::DomainError;

/// Check that a setter received one value per user
pub fn ensure_paired(users: usize, values: usize) -> Result<(), DomainError> {
    if users == values {
        Ok(())
    } else {
        Err(DomainError::invalid_argument(format!(
            "Expected {} value(s) for {} user(s), got {}",
            users, users, values
        )))
    }
}

/// Fail fast when the caller has cancelled the operation
pub fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), DomainError> {
    if cancel.is_cancelled() {
        Err(DomainError::Cancelled)
    } else {
        Ok(())
    }
}

/// Base store contract
#[async_trait]
pub trait UserStore: Send + Sync + Debug {
    /// Fail with [`DomainError::Disposed`] once the store has been closed
    fn ensure_open(&self) -> Result<(), DomainError>;

    /// Release the store
    fn close(&self);

    /// Insert the users; returns one outcome per user
    async fn create(
        &self,
        users: &[&User],
        cancel: &CancellationToken,
    ) -> Result<Vec<IdentityResult>, DomainError>;

    /// Persist the users, regenerating each concurrency stamp. A stamp mismatch on
    /// any user fails every position with `ConcurrencyFailure` and leaves the old
    /// stamps in place.
    async fn update(
        &self,
        users: &mut [&mut User],
        cancel: &CancellationToken,
    ) -> Result<Vec<IdentityResult>, DomainError>;

    async fn delete(
        &self,
        users: &[&User],
        cancel: &CancellationToken,
    ) -> Result<Vec<IdentityResult>, DomainError>;

    async fn find_by_ids(
        &self,
        ids: &[UserId],
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<User>>, DomainError>;

    async fn find_by_names(
        &self,
        normalized_user_names: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<User>>, DomainError>;

    fn user_ids(&self, users: &[&User]) -> Result<Vec<UserId>, DomainError> {
        self.ensure_open()?;
        Ok(users.iter().map(|user| user.id().clone()).collect())
    }

    fn user_names(&self, users: &[&User]) -> Result<Vec<Option<String>>, DomainError> {
        self.ensure_open()?;
        Ok(users
            .iter()
            .map(|user| user.user_name().map(str::to_owned))
            .collect())
    }

    fn normalized_user_names(&self, users: &[&User]) -> Result<Vec<Option<String>>, DomainError> {
        self.ensure_open()?;
        Ok(users
            .iter()
            .map(|user| user.normalized_user_name().map(str::to_owned))
            .collect())
    }

    fn set_user_names(
        &self,
        users: &mut [&mut User],
        user_names: Vec<Option<String>>,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        ensure_paired(users.len(), user_names.len())?;
        for (user, name) in users.iter_mut().zip(user_names) {
            user.set_user_name(name);
        }
        Ok(())
    }

    fn set_normalized_user_names(
        &self,
        users: &mut [&mut User],
        normalized_user_names: Vec<Option<String>>,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        ensure_paired(users.len(), normalized_user_names.len())?;
        for (user, name) in users.iter_mut().zip(normalized_user_names) {
            user.set_normalized_user_name(name);
        }
        Ok(())
    }

    fn email_store(&self) -> Option<&dyn UserEmailStore> {
        None
    }

    fn lockout_store(&self) -> Option<&dyn UserLockoutStore> {
        None
    }

    fn login_store(&self) -> Option<&dyn UserLoginStore> {
        None
    }

    fn password_store(&self) -> Option<&dyn UserPasswordStore> {
        None
    }

    fn role_store(&self) -> Option<&dyn UserRoleStore> {
        None
    }

    fn security_stamp_store(&self) -> Option<&dyn UserSecurityStampStore> {
        None
    }
}

#[async_trait]
pub trait UserEmailStore: UserStore {
    async fn find_by_emails(
        &self,
        normalized_emails: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<User>>, DomainError>;

    fn emails(&self, users: &[&User]) -> Result<Vec<Option<String>>, DomainError> {
        self.ensure_open()?;
        Ok(users.iter().map(|user| user.email().map(str::to_owned)).collect())
    }

    fn email_confirmed(&self, users: &[&User]) -> Result<Vec<bool>, DomainError> {
        self.ensure_open()?;
        Ok(users.iter().map(|user| user.email_confirmed()).collect())
    }

    fn normalized_emails(&self, users: &[&User]) -> Result<Vec<Option<String>>, DomainError> {
        self.ensure_open()?;
        Ok(users
            .iter()
            .map(|user| user.normalized_email().map(str::to_owned))
            .collect())
    }

    fn set_emails(
        &self,
        users: &mut [&mut User],
        emails: Vec<Option<String>>,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        ensure_paired(users.len(), emails.len())?;
        for (user, email) in users.iter_mut().zip(emails) {
            user.set_email(email);
        }
        Ok(())
    }

    fn set_email_confirmed(
        &self,
        users: &mut [&mut User],
        confirmed: Vec<bool>,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        ensure_paired(users.len(), confirmed.len())?;
        for (user, confirmed) in users.iter_mut().zip(confirmed) {
            user.set_email_confirmed(confirmed);
        }
        Ok(())
    }

    fn set_normalized_emails(
        &self,
        users: &mut [&mut User],
        normalized_emails: Vec<Option<String>>,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        ensure_paired(users.len(), normalized_emails.len())?;
        for (user, email) in users.iter_mut().zip(normalized_emails) {
            user.set_normalized_email(email);
        }
        Ok(())
    }
}

pub trait UserLockoutStore: UserStore {
    fn lockout_enabled(&self, users: &[&User]) -> Result<Vec<bool>, DomainError> {
        self.ensure_open()?;
        Ok(users.iter().map(|user| user.lockout_enabled()).collect())
    }

    fn lockout_end_dates(
        &self,
        users: &[&User],
    ) -> Result<Vec<Option<DateTime<Utc>>>, DomainError> {
        self.ensure_open()?;
        Ok(users.iter().map(|user| user.lockout_end()).collect())
    }

    fn set_lockout_enabled(
        &self,
        users: &mut [&mut User],
        enabled: Vec<bool>,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        ensure_paired(users.len(), enabled.len())?;
        for (user, enabled) in users.iter_mut().zip(enabled) {
            user.set_lockout_enabled(enabled);
        }
        Ok(())
    }

    fn set_lockout_end_dates(
        &self,
        users: &mut [&mut User],
        lockout_ends: Vec<Option<DateTime<Utc>>>,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        ensure_paired(users.len(), lockout_ends.len())?;
        for (user, end) in users.iter_mut().zip(lockout_ends) {
            user.set_lockout_end(end);
        }
        Ok(())
    }
}

#[async_trait]
pub trait UserLoginStore: UserStore {
    /// Stage one login binding per user
    async fn add_logins(
        &self,
        users: &[&User],
        logins: Vec<UserLoginInfo>,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError>;

    /// Resolve the owner of each login key
    async fn find_by_logins(
        &self,
        keys: &[LoginKey],
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<User>>, DomainError>;

    async fn logins(
        &self,
        users: &[&User],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<UserLoginInfo>>, DomainError>;

    /// Stage removal of each `(user, key)` binding that exists
    async fn remove_logins(
        &self,
        users: &[&User],
        keys: Vec<LoginKey>,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError>;
}

pub trait UserPasswordStore: UserStore {
    fn password_hashes(&self, users: &[&User]) -> Result<Vec<Option<String>>, DomainError> {
        self.ensure_open()?;
        Ok(users
            .iter()
            .map(|user| user.password_hash().map(str::to_owned))
            .collect())
    }

    fn has_passwords(&self, users: &[&User]) -> Result<Vec<bool>, DomainError> {
        Ok(self
            .password_hashes(users)?
            .iter()
            .map(|hash| hash.as_deref().is_some_and(|h| !h.trim().is_empty()))
            .collect())
    }

    fn set_password_hashes(
        &self,
        users: &mut [&mut User],
        password_hashes: Vec<Option<String>>,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        ensure_paired(users.len(), password_hashes.len())?;
        for (user, hash) in users.iter_mut().zip(password_hashes) {
            user.set_password_hash(hash);
        }
        Ok(())
    }
}

#[async_trait]
pub trait UserRoleStore: UserStore {
    /// Stage one membership per `(user, role)` pair. Every role must exist; when any
    /// is missing nothing is staged and the call fails with
    /// [`DomainError::MissingRoles`].
    async fn add_to_roles(
        &self,
        users: &[&User],
        normalized_role_names: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), DomainError>;

    /// Membership of each `(user, role)` pair
    async fn are_in_roles(
        &self,
        users: &[&User],
        normalized_role_names: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<bool>, DomainError>;

    /// Role names held by each user
    async fn roles(
        &self,
        users: &[&User],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<String>>, DomainError>;

    /// Members of each role
    async fn users_in_roles(
        &self,
        normalized_role_names: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<User>>, DomainError>;

    /// Stage removal of each `(user, role)` membership that exists
    async fn remove_from_roles(
        &self,
        users: &[&User],
        normalized_role_names: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), DomainError>;
}

pub trait UserSecurityStampStore: UserStore {
    fn security_stamps(&self, users: &[&User]) -> Result<Vec<Option<String>>, DomainError> {
        self.ensure_open()?;
        Ok(users
            .iter()
            .map(|user| user.security_stamp().map(str::to_owned))
            .collect())
    }

    fn set_security_stamps(
        &self,
        users: &mut [&mut User],
        stamps: Vec<Option<String>>,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        ensure_paired(users.len(), stamps.len())?;
        for (user, stamp) in users.iter_mut().zip(stamps) {
            user.set_security_stamp(stamp);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_paired() {
        assert!(ensure_paired(2, 2).is_ok());
        assert!(matches!(
            ensure_paired(2, 1),
            Err(DomainError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_ensure_paired_reports_expected_and_actual_counts() {
        let error = ensure_paired(3, 1).unwrap_err();

        assert_eq!(
            error.to_string(),
            "Invalid argument: Expected 3 value(s) for 3 user(s), got 1"
        );
    }

    #[test]
    fn test_ensure_not_cancelled() {
        let token = CancellationToken::new();
        assert!(ensure_not_cancelled(&token).is_ok());

        token.cancel();
        assert!(matches!(
            ensure_not_cancelled(&token),
            Err(DomainError::Cancelled)
        ));
    }
}
