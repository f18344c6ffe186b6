use std::collections::HashSet;

use async_trait::async_trait;

use super::PasswordValidator;
use crate::config::PasswordOptions;
use crate::domain::identity::{IdentityError, IdentityResult, PasswordCandidate};
use crate::domain::DomainError;
use crate::infrastructure::identity::manager::UserManager;

/// Applies the password policy from the manager's options
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPasswordValidator;

impl DefaultPasswordValidator {
    pub fn new() -> Self {
        Self
    }

    /// Every policy violation of one password
    pub fn check(options: &PasswordOptions, password: &str) -> Vec<IdentityError> {
        let mut errors = Vec::new();

        if password.trim().is_empty() || password.chars().count() < options.required_length {
            errors.push(IdentityError::PasswordTooShort(options.required_length));
        }
        if options.require_non_alphanumeric && password.chars().all(char::is_alphanumeric) {
            errors.push(IdentityError::PasswordRequiresNonAlphanumeric);
        }
        if options.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            errors.push(IdentityError::PasswordRequiresDigit);
        }
        if options.require_lowercase && !password.chars().any(|c| c.is_ascii_lowercase()) {
            errors.push(IdentityError::PasswordRequiresLower);
        }
        if options.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            errors.push(IdentityError::PasswordRequiresUpper);
        }
        if options.required_unique_chars >= 1
            && password.chars().collect::<HashSet<_>>().len() < options.required_unique_chars
        {
            errors.push(IdentityError::PasswordRequiresUniqueChars(
                options.required_unique_chars,
            ));
        }

        errors
    }
}

#[async_trait]
impl PasswordValidator for DefaultPasswordValidator {
    async fn validate(
        &self,
        manager: &UserManager,
        candidates: &[PasswordCandidate<'_>],
    ) -> Result<Vec<IdentityResult>, DomainError> {
        let options = &manager.options().password;

        Ok(candidates
            .iter()
            .map(|candidate| IdentityResult::from_errors(Self::check(options, candidate.password)))
            .collect())
    }
}
