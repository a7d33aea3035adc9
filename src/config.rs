//! Configuration loading and constants.
//!
//! Loads application configuration from a TOML file. `AppConfig` is the root
//! struct: one section per listener, the ACME account, the redirect cache and
//! the startup seed file. [`AppConfig::load`] validates everything before the
//! gateway starts.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Defaults
// =============================================================================

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "veer=info,tower_http=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

/// Supported log formats
pub const LOG_FORMATS: [&str; 2] = ["text", "json"];

/// Plain redirect listener port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// TLS redirect listener port
pub const DEFAULT_HTTPS_PORT: u16 = 8081;

/// Administrative API port
pub const DEFAULT_ADMIN_PORT: u16 = 8082;

/// Minutes between full cache refreshes
pub const DEFAULT_REFRESH_INTERVAL_MINUTES: u64 = 5;

/// Upper bound for the refresh interval (one day)
pub const MAX_REFRESH_INTERVAL_MINUTES: u64 = 24 * 60;

/// Ceiling for a single certificate store operation
pub const DEFAULT_STORE_TIMEOUT_SECONDS: u64 = 60;

/// Upper bound for the store operation ceiling
pub const MAX_STORE_TIMEOUT_SECONDS: u64 = 3600;

/// Seconds listeners get to drain connections on shutdown
pub const SHUTDOWN_GRACE_SECONDS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Plain HTTP redirect listener
    #[serde(default)]
    pub http: HttpConfig,
    /// TLS redirect listener
    #[serde(default)]
    pub https: HttpsConfig,
    #[serde(default)]
    pub acme: AcmeConfig,
    pub admin: AdminConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "HttpConfig::default_host")]
    pub host: String,
    #[serde(default = "HttpConfig::default_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

impl HttpConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        DEFAULT_HTTP_PORT
    }
}

/// TLS listener; binds on `http.host`.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpsConfig {
    #[serde(default = "HttpsConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "HttpsConfig::default_port")]
    pub port: u16,
}

impl Default for HttpsConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            port: Self::default_port(),
        }
    }
}

impl HttpsConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_port() -> u16 {
        DEFAULT_HTTPS_PORT
    }
}

/// ACME account settings for automatic certificates
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AcmeConfig {
    /// Contact email, required when HTTPS is enabled
    pub email: Option<String>,
    /// Use the Let's Encrypt production directory instead of staging
    #[serde(default)]
    pub production: bool,
    /// Custom ACME directory URL, overrides `production`
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "AdminConfig::default_host")]
    pub host: String,
    #[serde(default = "AdminConfig::default_port")]
    pub port: u16,
    /// Bearer token for `/v1/*` routes
    pub api_token: String,
    /// Origin allowed to call the API from a browser
    pub cors_origin: Option<String>,
}

impl AdminConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_port() -> u16 {
        DEFAULT_ADMIN_PORT
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Minutes between full refreshes (default: 5, range: 1 to 1440)
    #[serde(default = "CacheConfig::default_refresh_interval")]
    pub refresh_interval_minutes: u64,
    /// Ceiling for certificate store calls in seconds (default: 60)
    #[serde(default = "CacheConfig::default_store_timeout")]
    pub store_timeout_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval_minutes: Self::default_refresh_interval(),
            store_timeout_seconds: Self::default_store_timeout(),
        }
    }
}

impl CacheConfig {
    fn default_refresh_interval() -> u64 {
        DEFAULT_REFRESH_INTERVAL_MINUTES
    }

    fn default_store_timeout() -> u64 {
        DEFAULT_STORE_TIMEOUT_SECONDS
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_minutes.saturating_mul(60))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_seconds)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// SQLite database holding rules and certificates; in-memory when unset
    pub database: Option<PathBuf>,
    /// JSON export imported into the store at startup
    pub seed_file: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ports = vec![("http.port", self.http.port), ("admin.port", self.admin.port)];
        if self.https.enabled {
            ports.push(("https.port", self.https.port));
        }

        let mut seen = HashSet::new();
        for (name, port) in &ports {
            if *port == 0 {
                return Err(ConfigError::Validation(format!("{} must not be 0", name)));
            }
            if !seen.insert(*port) {
                return Err(ConfigError::Validation(format!(
                    "{} {} is already used by another listener",
                    name, port
                )));
            }
        }

        if !(1..=MAX_REFRESH_INTERVAL_MINUTES).contains(&self.cache.refresh_interval_minutes) {
            return Err(ConfigError::Validation(format!(
                "cache.refresh_interval_minutes must be between 1 and {}",
                MAX_REFRESH_INTERVAL_MINUTES
            )));
        }
        if !(1..=MAX_STORE_TIMEOUT_SECONDS).contains(&self.cache.store_timeout_seconds) {
            return Err(ConfigError::Validation(format!(
                "cache.store_timeout_seconds must be between 1 and {}",
                MAX_STORE_TIMEOUT_SECONDS
            )));
        }

        if self.admin.api_token.trim().is_empty() {
            return Err(ConfigError::Validation(
                "admin.api_token must not be empty".to_string(),
            ));
        }

        if self.https.enabled
            && self
                .acme
                .email
                .as_deref()
                .map_or(true, |email| email.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "acme.email is required when HTTPS is enabled".to_string(),
            ));
        }

        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Unknown logging.format '{}', expected text or json",
                self.logging.format
            )));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}
