//! Identity domain - users, roles, logins and the store contracts of the bulk layer

mod batch;
mod capability;
mod entity;
mod normalizer;
mod pairs;
mod protector;
pub mod resolve;
mod result;
mod store;

pub use batch::FilteredBatch;
pub use capability::{Capabilities, Capability};
pub use entity::{LoginKey, Role, RoleId, User, UserId, UserLoginInfo};
pub use normalizer::{LookupNormalizer, UpperInvariantLookupNormalizer};
pub use pairs::{
    PasswordCandidate, UserEmail, UserLockoutEnabled, UserLockoutEnd, UserLogin, UserLoginKey,
    UserName, UserPassword, UserRoleName,
};
pub use protector::{LookupProtector, LookupProtectorKeyRing};
pub use result::{IdentityError, IdentityResult};
pub use store::{
    ensure_not_cancelled, ensure_paired, UserEmailStore, UserLockoutStore, UserLoginStore,
    UserPasswordStore, UserRoleStore, UserSecurityStampStore, UserStore,
};

#[cfg(test)]
pub use protector::{MockLookupProtector, MockLookupProtectorKeyRing};
