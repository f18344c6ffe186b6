//! Password hashing using Argon2

use std::fmt::Debug;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use crate::domain::identity::User;
use crate::domain::DomainError;

/// Outcome of verifying a password against a stored hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordVerificationResult {
    Failed,
    Success,
    /// The password matched, but the hash should be regenerated with current settings
    SuccessRehashNeeded,
}

/// Hashes and verifies passwords. Hashes may depend on the user they belong to.
pub trait PasswordHasher: Send + Sync + Debug {
    fn hash_password(&self, user: &User, password: &str) -> Result<String, DomainError>;

    fn verify_hashed_password(
        &self,
        user: &User,
        hashed_password: &str,
        provided_password: &str,
    ) -> PasswordVerificationResult;

    fn hash_passwords(
        &self,
        users: &[&User],
        passwords: &[&str],
    ) -> Result<Vec<String>, DomainError> {
        DomainError::ensure_aligned("hash passwords", users.len(), passwords.len())?;
        users
            .iter()
            .zip(passwords)
            .map(|(user, password)| self.hash_password(user, password))
            .collect()
    }
}

/// Argon2id hasher; hashes produced under other parameters verify but ask for a rehash
#[derive(Debug, Clone)]
pub struct Argon2PasswordHasher {
    params: Params,
}

impl Default for Argon2PasswordHasher {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl Argon2PasswordHasher {
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    fn argon2(&self) -> Argon2<'_> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    fn is_current(&self, parsed: &PasswordHash<'_>) -> bool {
        if parsed.algorithm != Algorithm::Argon2id.ident()
            || parsed.version != Some(Version::V0x13 as u32)
        {
            return false;
        }

        Params::try_from(parsed).is_ok_and(|params| {
            params.m_cost() == self.params.m_cost()
                && params.t_cost() == self.params.t_cost()
                && params.p_cost() == self.params.p_cost()
        })
    }
}

impl PasswordHasher for Argon2PasswordHasher {
    fn hash_password(&self, _user: &User, password: &str) -> Result<String, DomainError> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| DomainError::internal(format!("Failed to hash password: {}", e)))
    }

    fn verify_hashed_password(
        &self,
        _user: &User,
        hashed_password: &str,
        provided_password: &str,
    ) -> PasswordVerificationResult {
        let Ok(parsed) = PasswordHash::new(hashed_password) else {
            return PasswordVerificationResult::Failed;
        };

        if Argon2::default()
            .verify_password(provided_password.as_bytes(), &parsed)
            .is_err()
        {
            return PasswordVerificationResult::Failed;
        }

        if self.is_current(&parsed) {
            PasswordVerificationResult::Success
        } else {
            PasswordVerificationResult::SuccessRehashNeeded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_hasher() -> Argon2PasswordHasher {
        Argon2PasswordHasher::new(Params::new(8, 1, 1, None).unwrap())
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = fast_hasher();
        let user = User::new("alice");

        let hash = hasher.hash_password(&user, "Secr3t!").unwrap();

        assert_eq!(
            hasher.verify_hashed_password(&user, &hash, "Secr3t!"),
            PasswordVerificationResult::Success
        );
        assert_eq!(
            hasher.verify_hashed_password(&user, &hash, "wrong"),
            PasswordVerificationResult::Failed
        );
    }

    #[test]
    fn test_hashes_are_salted() {
        let hasher = fast_hasher();
        let user = User::new("alice");

        let first = hasher.hash_password(&user, "Secr3t!").unwrap();
        let second = hasher.hash_password(&user, "Secr3t!").unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_other_params_need_rehash() {
        let user = User::new("alice");
        let old = Argon2PasswordHasher::new(Params::new(16, 1, 1, None).unwrap());
        let hash = old.hash_password(&user, "Secr3t!").unwrap();

        assert_eq!(
            fast_hasher().verify_hashed_password(&user, &hash, "Secr3t!"),
            PasswordVerificationResult::SuccessRehashNeeded
        );
    }

    #[test]
    fn test_invalid_hash_fails() {
        let user = User::new("alice");
        let hasher = fast_hasher();

        assert_eq!(
            hasher.verify_hashed_password(&user, "not-a-phc-string", "x"),
            PasswordVerificationResult::Failed
        );
        assert_eq!(
            hasher.verify_hashed_password(&user, "", "x"),
            PasswordVerificationResult::Failed
        );
    }

    #[test]
    fn test_hash_passwords_rejects_misaligned_input() {
        let hasher = fast_hasher();
        let user = User::new("alice");

        let result = hasher.hash_passwords(&[&user], &[]);
        assert!(matches!(result, Err(DomainError::Misaligned { .. })));
    }
}
