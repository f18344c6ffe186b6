//! Bulk identity management
//!
//! Set-at-a-time account management for an identity subsystem:
//! - Batch create, update and delete of users with per-item results
//! - Emails, user names, passwords, lockout, external logins and roles in bulk
//! - Set-based lookups that keep request order, duplicates and gaps
//! - In-memory and PostgreSQL stores with optimistic concurrency

pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::{IdentityConfig, IdentityOptions};
pub use domain::{DomainError, IdentityError, IdentityResult, User, UserId};
pub use infrastructure::identity::{
    InMemoryUserStore, PostgresUserStore, UserManager, UserManagerBuilder,
};
