//! Identity infrastructure module
//!
//! Concrete stores (in-memory and PostgreSQL), the Argon2 password hasher, the
//! HMAC lookup protector, the default validators and the batch user manager.

mod in_memory_store;
mod manager;
mod password;
mod postgres_store;
mod protector;
mod staging;
mod stamp;
pub mod validation;

pub use in_memory_store::InMemoryUserStore;
pub use manager::{PersonalDataProtection, UserManager, UserManagerBuilder};
pub use password::{Argon2PasswordHasher, PasswordHasher, PasswordVerificationResult};
pub use postgres_store::PostgresUserStore;
pub use protector::{HmacLookupProtector, StaticKeyRing};
pub use stamp::{new_concurrency_stamp, new_security_stamp};
pub use validation::{DefaultPasswordValidator, DefaultUserValidator, PasswordValidator, UserValidator};
