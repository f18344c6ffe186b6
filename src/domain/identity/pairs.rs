//! Inputs of the batch operations that pair each user with a value

use chrono::{DateTime, Utc};

use super::entity::{LoginKey, User, UserLoginInfo};

/// A user and the email to assign
#[derive(Debug)]
pub struct UserEmail<'a> {
    pub user: &'a mut User,
    pub email: Option<String>,
}

impl<'a> UserEmail<'a> {
    pub fn new(user: &'a mut User, email: Option<String>) -> Self {
        Self { user, email }
    }
}

/// A user and the user name to assign
#[derive(Debug)]
pub struct UserName<'a> {
    pub user: &'a mut User,
    pub user_name: Option<String>,
}

impl<'a> UserName<'a> {
    pub fn new(user: &'a mut User, user_name: Option<String>) -> Self {
        Self { user, user_name }
    }
}

/// A user and a plaintext password
#[derive(Debug)]
pub struct UserPassword<'a> {
    pub user: &'a mut User,
    pub password: String,
}

impl<'a> UserPassword<'a> {
    pub fn new(user: &'a mut User, password: impl Into<String>) -> Self {
        Self {
            user,
            password: password.into(),
        }
    }
}

/// A user and a role name, not yet normalized
#[derive(Debug)]
pub struct UserRoleName<'a> {
    pub user: &'a mut User,
    pub role_name: String,
}

impl<'a> UserRoleName<'a> {
    pub fn new(user: &'a mut User, role_name: impl Into<String>) -> Self {
        Self {
            user,
            role_name: role_name.into(),
        }
    }
}

/// A user and an external login to bind
#[derive(Debug)]
pub struct UserLogin<'a> {
    pub user: &'a mut User,
    pub login: UserLoginInfo,
}

impl<'a> UserLogin<'a> {
    pub fn new(user: &'a mut User, login: UserLoginInfo) -> Self {
        Self { user, login }
    }
}

/// A user and an external login to unbind
#[derive(Debug)]
pub struct UserLoginKey<'a> {
    pub user: &'a mut User,
    pub key: LoginKey,
}

impl<'a> UserLoginKey<'a> {
    pub fn new(user: &'a mut User, key: LoginKey) -> Self {
        Self { user, key }
    }
}

#[derive(Debug)]
pub struct UserLockoutEnabled<'a> {
    pub user: &'a mut User,
    pub enabled: bool,
}

impl<'a> UserLockoutEnabled<'a> {
    pub fn new(user: &'a mut User, enabled: bool) -> Self {
        Self { user, enabled }
    }
}

#[derive(Debug)]
pub struct UserLockoutEnd<'a> {
    pub user: &'a mut User,
    pub lockout_end: Option<DateTime<Utc>>,
}

impl<'a> UserLockoutEnd<'a> {
    pub fn new(user: &'a mut User, lockout_end: Option<DateTime<Utc>>) -> Self {
        Self { user, lockout_end }
    }
}

/// A read-only user and password, handed to password validators
#[derive(Debug, Clone, Copy)]
pub struct PasswordCandidate<'a> {
    pub user: &'a User,
    pub password: &'a str,
}
