use thiserror::Error;

use super::identity::Capability;

/// Call-level errors.
///
/// These abort a whole batch operation. Expected per-item outcomes (validation,
/// preconditions, concurrency) never surface here; they are reported through
/// [`IdentityResult`](super::identity::IdentityResult) at the item's position.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Object disposed: {message}")]
    Disposed { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Store does not support the {capability} capability")]
    NotSupported { capability: Capability },

    #[error("Roles do not exist: {}", .names.join(", "))]
    MissingRoles { names: Vec<String> },

    #[error("User security stamp cannot be empty ({count} user(s) without a stamp)")]
    MissingSecurityStamp { count: usize },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Stage '{stage}' returned {actual} result(s) for {expected} item(s)")]
    Misaligned {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DomainError {
    pub fn disposed(message: impl Into<String>) -> Self {
        Self::Disposed {
            message: message.into(),
        }
    }

    pub fn not_supported(capability: Capability) -> Self {
        Self::NotSupported { capability }
    }

    pub fn missing_roles(names: Vec<String>) -> Self {
        Self::MissingRoles { names }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn misaligned(stage: &'static str, expected: usize, actual: usize) -> Self {
        Self::Misaligned {
            stage,
            expected,
            actual,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check that a stage produced exactly one output per input
    pub fn ensure_aligned(
        stage: &'static str,
        expected: usize,
        actual: usize,
    ) -> Result<(), DomainError> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::misaligned(stage, expected, actual))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_roles_error() {
        let error = DomainError::missing_roles(vec!["GHOST".to_string(), "SPECTRE".to_string()]);
        assert_eq!(error.to_string(), "Roles do not exist: GHOST, SPECTRE");
    }

    #[test]
    fn test_not_supported_error() {
        let error = DomainError::not_supported(Capability::Lockout);
        assert_eq!(
            error.to_string(),
            "Store does not support the lockout capability"
        );
    }

    #[test]
    fn test_ensure_aligned() {
        assert!(DomainError::ensure_aligned("validate", 3, 3).is_ok());

        let error = DomainError::ensure_aligned("validate", 3, 2).unwrap_err();
        assert!(matches!(
            error,
            DomainError::Misaligned {
                stage: "validate",
                expected: 3,
                actual: 2
            }
        ));
    }
}
