use serde::Deserialize;

use super::options::IdentityOptions;
use crate::infrastructure::storage::PostgresConfig;

/// Top-level configuration of a host embedding the bulk identity layer
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub identity: IdentityOptions,
    pub logging: LoggingConfig,
    pub database: PostgresConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl IdentityConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("IDENTITY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IdentityConfig::default();

        assert_eq!(config.logging.level, "info");
        assert!(matches!(config.logging.format, LogFormat::Pretty));
        assert_eq!(config.identity.password.required_length, 6);
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn test_deserialize_from_source() {
        let config = config::Config::builder()
            .set_override("logging.format", "json")
            .unwrap()
            .set_override("identity.stores.protect_personal_data", true)
            .unwrap()
            .set_override("database.url", "postgres://db/identity")
            .unwrap()
            .build()
            .unwrap();

        let config: IdentityConfig = config.try_deserialize().unwrap();

        assert!(matches!(config.logging.format, LogFormat::Json));
        assert!(config.identity.stores.protect_personal_data);
        assert_eq!(config.database.url, "postgres://db/identity");
        assert_eq!(config.database.min_connections, 1);
    }
}
