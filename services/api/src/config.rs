//! Service configuration loaded from environment variables

use config::{Config, Environment};
use serde::Deserialize;
use thiserror::Error;

/// Variables that have no default
const REQUIRED: [&str; 4] = [
    "foursquare_base_url",
    "foursquare_client_id",
    "foursquare_secret",
    "database_url",
];

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required variable is unset or empty
    #[error("required env variable {0} is not set")]
    Missing(String),

    /// A variable could not be read or parsed
    #[error("invalid configuration: {0}")]
    Invalid(#[from] config::ConfigError),
}

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// `PORT` (default: 80)
    pub port: u16,
    /// `LOG_LEVEL` (default: INFO)
    pub log_level: String,
    pub foursquare_base_url: String,
    pub foursquare_client_id: String,
    pub foursquare_secret: String,
    /// Selects the Redis cache when set
    pub redis_url: Option<String>,
    pub redis_password: Option<String>,
    pub database_url: String,
    /// `REST_TIMEOUT_SECS` (default: 30)
    pub rest_timeout_secs: u64,
}

impl AppConfig {
    /// Load the configuration from the process environment
    ///
    /// Empty variables count as unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("port", 80)?
            .set_default("log_level", "INFO")?
            .set_default("rest_timeout_secs", 30)?
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        for key in REQUIRED {
            if settings.get_string(key).is_err() {
                return Err(ConfigError::Missing(key.to_uppercase()));
            }
        }

        Ok(settings.try_deserialize()?)
    }

    /// Redis address, when a remote cache is configured
    pub fn redis_url(&self) -> Option<&str> {
        self.redis_url.as_deref().filter(|url| !url.is_empty())
    }

    pub fn redis_password(&self) -> &str {
        self.redis_password.as_deref().unwrap_or_default()
    }
}

/// Log level for start-up; INFO when the configuration could not be loaded
pub fn startup_log_level(config: &Result<AppConfig, ConfigError>) -> &str {
    config
        .as_ref()
        .map_or("INFO", |config| config.log_level.as_str())
}
