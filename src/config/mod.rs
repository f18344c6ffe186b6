//! Configuration loading

mod app_config;
mod options;

pub use app_config::{IdentityConfig, LogFormat, LoggingConfig};
pub use options::{IdentityOptions, LockoutOptions, PasswordOptions, StoreOptions, UserOptions};
