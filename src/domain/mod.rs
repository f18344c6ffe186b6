//! Domain layer - Core identity entities, contracts and batch algorithms

pub mod error;
pub mod identity;

pub use error::DomainError;
pub use identity::{
    Capabilities, Capability, FilteredBatch, IdentityError, IdentityResult, LoginKey, Role, RoleId,
    User, UserId, UserLoginInfo,
};
