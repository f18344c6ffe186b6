use serde::Deserialize;

/// Policy options consumed by the user manager and the default validators
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentityOptions {
    pub user: UserOptions,
    pub password: PasswordOptions,
    pub lockout: LockoutOptions,
    pub stores: StoreOptions,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserOptions {
    /// Characters permitted in user names; empty allows any character
    pub allowed_user_name_characters: String,
    pub require_unique_email: bool,
}

impl Default for UserOptions {
    fn default() -> Self {
        Self {
            allowed_user_name_characters:
                "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-._@+".to_string(),
            require_unique_email: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PasswordOptions {
    pub required_length: usize,
    pub required_unique_chars: usize,
    pub require_non_alphanumeric: bool,
    pub require_lowercase: bool,
    pub require_uppercase: bool,
    pub require_digit: bool,
}

impl Default for PasswordOptions {
    fn default() -> Self {
        Self {
            required_length: 6,
            required_unique_chars: 1,
            require_non_alphanumeric: true,
            require_lowercase: true,
            require_uppercase: true,
            require_digit: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockoutOptions {
    /// Enable lockout on users as they are created
    pub allowed_for_new_users: bool,
}

impl Default for LockoutOptions {
    fn default() -> Self {
        Self {
            allowed_for_new_users: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Store normalized lookups protected instead of in clear text
    pub protect_personal_data: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = IdentityOptions::default();

        assert_eq!(options.password.required_length, 6);
        assert_eq!(options.password.required_unique_chars, 1);
        assert!(options.password.require_digit);
        assert!(options.lockout.allowed_for_new_users);
        assert!(!options.user.require_unique_email);
        assert!(!options.stores.protect_personal_data);
        assert!(options.user.allowed_user_name_characters.contains('@'));
    }

    #[test]
    fn test_partial_deserialization_keeps_defaults() {
        let options: IdentityOptions = serde_json::from_str(
            r#"{"password": {"required_length": 12}, "user": {"require_unique_email": true}}"#,
        )
        .unwrap();

        assert_eq!(options.password.required_length, 12);
        assert!(options.password.require_uppercase);
        assert!(options.user.require_unique_email);
        assert!(!options.user.allowed_user_name_characters.is_empty());
    }
}
