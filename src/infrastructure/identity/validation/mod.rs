//! Pluggable user and password validators

mod password;
mod user;

use std::fmt::Debug;

use async_trait::async_trait;

use super::manager::UserManager;
use crate::domain::identity::{IdentityResult, PasswordCandidate, User};
use crate::domain::DomainError;

pub use password::DefaultPasswordValidator;
pub use user::DefaultUserValidator;

/// Validates users; returns one result per user, in order
#[async_trait]
pub trait UserValidator: Send + Sync + Debug {
    async fn validate(
        &self,
        manager: &UserManager,
        users: &[&User],
    ) -> Result<Vec<IdentityResult>, DomainError>;
}

/// Validates candidate passwords; returns one result per candidate, in order
#[async_trait]
pub trait PasswordValidator: Send + Sync + Debug {
    async fn validate(
        &self,
        manager: &UserManager,
        candidates: &[PasswordCandidate<'_>],
    ) -> Result<Vec<IdentityResult>, DomainError>;
}
