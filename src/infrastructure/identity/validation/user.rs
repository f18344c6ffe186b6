use async_trait::async_trait;
use validator::ValidateEmail;

use super::UserValidator;
use crate::domain::identity::{IdentityError, IdentityResult, User, UserId};
use crate::domain::DomainError;
use crate::infrastructure::identity::manager::UserManager;

/// User name and email rules.
///
/// Names must be non-blank, drawn from the allowed characters and not taken by
/// another user. With `require_unique_email`, emails must be well formed and not
/// taken by another user. Uniqueness is resolved with one lookup per batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultUserValidator;

impl DefaultUserValidator {
    pub fn new() -> Self {
        Self
    }

    async fn validate_user_names(
        &self,
        manager: &UserManager,
        ids: &[UserId],
        names: &[Option<String>],
        errors: &mut [Vec<IdentityError>],
    ) -> Result<(), DomainError> {
        let allowed = &manager.options().user.allowed_user_name_characters;
        let mut candidates: Vec<(usize, &str)> = Vec::new();

        for (index, name) in names.iter().enumerate() {
            match name.as_deref() {
                Some(name) if is_valid_user_name(name, allowed) => candidates.push((index, name)),
                other => errors[index].push(IdentityError::InvalidUserName(other.map(str::to_owned))),
            }
        }

        let lookup: Vec<&str> = candidates.iter().map(|(_, name)| *name).collect();
        let owners = manager.find_by_names(&lookup).await?;
        DomainError::ensure_aligned("find user names", lookup.len(), owners.len())?;

        for ((index, name), owner) in candidates.into_iter().zip(owners) {
            if owner.is_some_and(|owner| owner.id() != &ids[index]) {
                errors[index].push(IdentityError::DuplicateUserName(name.to_owned()));
            }
        }

        Ok(())
    }

    async fn validate_emails(
        &self,
        manager: &UserManager,
        ids: &[UserId],
        emails: &[Option<String>],
        errors: &mut [Vec<IdentityError>],
    ) -> Result<(), DomainError> {
        let mut candidates: Vec<(usize, &str)> = Vec::new();

        for (index, email) in emails.iter().enumerate() {
            match email.as_deref() {
                Some(email) if !email.trim().is_empty() && email.to_owned().validate_email() => {
                    candidates.push((index, email))
                }
                other => errors[index].push(IdentityError::InvalidEmail(other.map(str::to_owned))),
            }
        }

        let lookup: Vec<&str> = candidates.iter().map(|(_, email)| *email).collect();
        let owners = manager.find_by_emails(&lookup).await?;
        DomainError::ensure_aligned("find emails", lookup.len(), owners.len())?;

        for ((index, email), owner) in candidates.into_iter().zip(owners) {
            if owner.is_some_and(|owner| owner.id() != &ids[index]) {
                errors[index].push(IdentityError::DuplicateEmail(email.to_owned()));
            }
        }

        Ok(())
    }
}

fn is_valid_user_name(name: &str, allowed: &str) -> bool {
    !name.trim().is_empty() && (allowed.is_empty() || name.chars().all(|c| allowed.contains(c)))
}

#[async_trait]
impl UserValidator for DefaultUserValidator {
    async fn validate(
        &self,
        manager: &UserManager,
        users: &[&User],
    ) -> Result<Vec<IdentityResult>, DomainError> {
        let ids = manager.get_user_ids(users)?;
        let names = manager.get_user_names(users)?;
        let mut errors: Vec<Vec<IdentityError>> = vec![Vec::new(); users.len()];

        self.validate_user_names(manager, &ids, &names, &mut errors)
            .await?;

        if manager.options().user.require_unique_email {
            let emails = manager.get_emails(users)?;
            self.validate_emails(manager, &ids, &emails, &mut errors)
                .await?;
        }

        Ok(errors.into_iter().map(IdentityResult::from_errors).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALLOWED: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-._@+";

    #[test]
    fn test_is_valid_user_name() {
        assert!(is_valid_user_name("alice", ALLOWED));
        assert!(is_valid_user_name("alice.smith@corp", ALLOWED));
        assert!(!is_valid_user_name("", ALLOWED));
        assert!(!is_valid_user_name("   ", ALLOWED));
        assert!(!is_valid_user_name("alice smith", ALLOWED));
        assert!(is_valid_user_name("alice smith", ""));
    }
}
