//! Per-item outcomes of batch operations

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// A single item-level failure, carrying a stable code and a description
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("Optimistic concurrency failure, object has been modified.")]
    ConcurrencyFailure,

    #[error("A user with this login already exists.")]
    LoginAlreadyAssociated,

    #[error(
        "Username '{}' is invalid, can only contain letters or digits.",
        .0.as_deref().unwrap_or_default()
    )]
    InvalidUserName(Option<String>),

    #[error("Email '{}' is invalid.", .0.as_deref().unwrap_or_default())]
    InvalidEmail(Option<String>),

    #[error("Username '{0}' is already taken.")]
    DuplicateUserName(String),

    #[error("Email '{0}' is already taken.")]
    DuplicateEmail(String),

    #[error("User already has a password set.")]
    UserAlreadyHasPassword,

    #[error("Lockout is not enabled for this user.")]
    UserLockoutNotEnabled,

    #[error("User already in role '{0}'.")]
    UserAlreadyInRole(String),

    #[error("User is not in role '{0}'.")]
    UserNotInRole(String),

    #[error("Passwords must be at least {0} characters.")]
    PasswordTooShort(usize),

    #[error("Passwords must use at least {0} different characters.")]
    PasswordRequiresUniqueChars(usize),

    #[error("Passwords must have at least one non alphanumeric character.")]
    PasswordRequiresNonAlphanumeric,

    #[error("Passwords must have at least one digit ('0'-'9').")]
    PasswordRequiresDigit,

    #[error("Passwords must have at least one lowercase ('a'-'z').")]
    PasswordRequiresLower,

    #[error("Passwords must have at least one uppercase ('A'-'Z').")]
    PasswordRequiresUpper,
}

impl IdentityError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConcurrencyFailure => "ConcurrencyFailure",
            Self::LoginAlreadyAssociated => "LoginAlreadyAssociated",
            Self::InvalidUserName(_) => "InvalidUserName",
            Self::InvalidEmail(_) => "InvalidEmail",
            Self::DuplicateUserName(_) => "DuplicateUserName",
            Self::DuplicateEmail(_) => "DuplicateEmail",
            Self::UserAlreadyHasPassword => "UserAlreadyHasPassword",
            Self::UserLockoutNotEnabled => "UserLockoutNotEnabled",
            Self::UserAlreadyInRole(_) => "UserAlreadyInRole",
            Self::UserNotInRole(_) => "UserNotInRole",
            Self::PasswordTooShort(_) => "PasswordTooShort",
            Self::PasswordRequiresUniqueChars(_) => "PasswordRequiresUniqueChars",
            Self::PasswordRequiresNonAlphanumeric => "PasswordRequiresNonAlphanumeric",
            Self::PasswordRequiresDigit => "PasswordRequiresDigit",
            Self::PasswordRequiresLower => "PasswordRequiresLower",
            Self::PasswordRequiresUpper => "PasswordRequiresUpper",
        }
    }
}

impl Serialize for IdentityError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("IdentityError", 2)?;
        state.serialize_field("code", self.code())?;
        state.serialize_field("description", &self.to_string())?;
        state.end()
    }
}

/// Outcome of one item in a batch: success, or failure with one or more errors
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdentityResult {
    #[default]
    Success,
    Failed(Vec<IdentityError>),
}

impl IdentityResult {
    pub fn failed(error: IdentityError) -> Self {
        Self::Failed(vec![error])
    }

    /// Success when `errors` is empty, failure otherwise
    pub fn from_errors(errors: Vec<IdentityError>) -> Self {
        if errors.is_empty() {
            Self::Success
        } else {
            Self::Failed(errors)
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn errors(&self) -> &[IdentityError] {
        match self {
            Self::Success => &[],
            Self::Failed(errors) => errors,
        }
    }

    /// Fold another outcome for the same item into this one
    pub fn merge(&mut self, other: IdentityResult) {
        if let Self::Failed(more) = other {
            match self {
                Self::Success => *self = Self::Failed(more),
                Self::Failed(errors) => errors.extend(more),
            }
        }
    }
}

impl std::fmt::Display for IdentityResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "Succeeded"),
            Self::Failed(errors) => {
                let codes: Vec<&str> = errors.iter().map(IdentityError::code).collect();
                write!(f, "Failed : {}", codes.join(","))
            }
        }
    }
}

impl Serialize for IdentityResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("IdentityResult", 2)?;
        state.serialize_field("succeeded", &self.succeeded())?;
        state.serialize_field("errors", self.errors())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_errors() {
        assert!(IdentityResult::from_errors(vec![]).succeeded());

        let result = IdentityResult::from_errors(vec![IdentityError::PasswordRequiresDigit]);
        assert!(!result.succeeded());
        assert_eq!(result.errors(), &[IdentityError::PasswordRequiresDigit]);
    }

    #[test]
    fn test_merge_keeps_all_errors() {
        let mut result = IdentityResult::Success;
        result.merge(IdentityResult::Success);
        assert!(result.succeeded());

        result.merge(IdentityResult::failed(IdentityError::InvalidEmail(None)));
        result.merge(IdentityResult::failed(IdentityError::DuplicateUserName(
            "alice".to_string(),
        )));

        assert_eq!(result.errors().len(), 2);
        assert_eq!(result.errors()[0].code(), "InvalidEmail");
        assert_eq!(result.errors()[1].code(), "DuplicateUserName");
    }

    #[test]
    fn test_error_descriptions() {
        assert_eq!(
            IdentityError::InvalidUserName(None).to_string(),
            "Username '' is invalid, can only contain letters or digits."
        );
        assert_eq!(
            IdentityError::InvalidEmail(Some("nope".to_string())).to_string(),
            "Email 'nope' is invalid."
        );
        assert_eq!(
            IdentityError::PasswordTooShort(6).to_string(),
            "Passwords must be at least 6 characters."
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(IdentityResult::Success.to_string(), "Succeeded");

        let result = IdentityResult::Failed(vec![
            IdentityError::PasswordRequiresDigit,
            IdentityError::PasswordRequiresUpper,
        ]);
        assert_eq!(
            result.to_string(),
            "Failed : PasswordRequiresDigit,PasswordRequiresUpper"
        );
    }

    #[test]
    fn test_serialization() {
        let result = IdentityResult::failed(IdentityError::UserNotInRole("ADMIN".to_string()));
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["succeeded"], false);
        assert_eq!(json["errors"][0]["code"], "UserNotInRole");
        assert_eq!(json["errors"][0]["description"], "User is not in role 'ADMIN'.");
    }
}
