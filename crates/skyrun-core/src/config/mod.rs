//! Configuration management for skyrun.
//!
//! Configuration is loaded from multiple sources with the following priority:
//! 1. Environment variables (highest priority)
//! 2. Project-local `skyrun.toml` file
//! 3. User config `~/.config/skyrun/config.toml`
//! 4. Built-in defaults (lowest priority)
//!
//! An auth file (YAML) can be merged on top with [`Config::merge_auth_file`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod defaults;

pub use defaults::*;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to parse auth file: {0}")]
    AuthFileError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Endpoints and account.
    pub api: ApiConfig,

    /// Credentials.
    pub auth: AuthConfig,

    /// Test run settings.
    pub test: TestConfig,
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// Searches for config in order:
    /// 1. `./skyrun.toml` (project local)
    /// 2. `~/.config/skyrun/config.toml` (user config)
    /// 3. Falls back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            return Self::from_file(DEFAULT_CONFIG_FILE);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join(DEFAULT_CONFIG_DIR).join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        Ok(config)
    }

    /// Merge a YAML auth file over this configuration.
    ///
    /// The file is a flat mapping using the keys of `[api]` and `[auth]`,
    /// e.g. `account_id`, `selfservice_url`, `refresh_token`.
    pub fn merge_auth_file(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let file: AuthFile = serde_yaml::from_str(&content)?;
        self.merge_auth(file);
        Ok(())
    }

    fn merge_auth(&mut self, file: AuthFile) {
        if let Some(url) = file.selfservice_url {
            self.api.selfservice_url = url;
        }
        if let Some(url) = file.api_url {
            self.api.api_url = url;
        }
        if let Some(id) = file.account_id {
            self.api.account_id = Some(id.to_string());
        }
        if file.access_token.is_some() {
            self.auth.access_token = file.access_token;
        }
        if file.refresh_token.is_some() {
            self.auth.refresh_token = file.refresh_token;
        }
        if file.email.is_some() {
            self.auth.email = file.email;
        }
        if file.password.is_some() {
            self.auth.password = file.password;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("SKYRUN_SELFSERVICE_URL") {
            self.api.selfservice_url = url;
        }
        if let Ok(url) = std::env::var("SKYRUN_API_URL") {
            self.api.api_url = url;
        }
        if let Ok(id) = std::env::var("SKYRUN_ACCOUNT_ID") {
            self.api.account_id = Some(id);
        }

        if let Ok(token) = std::env::var("SKYRUN_ACCESS_TOKEN") {
            self.auth.access_token = Some(token);
        }
        if let Ok(token) = std::env::var("SKYRUN_REFRESH_TOKEN") {
            self.auth.refresh_token = Some(token);
        }

        if let Ok(secs) = std::env::var("SKYRUN_POLL_INTERVAL") {
            if let Ok(n) = secs.parse() {
                self.test.poll_interval_secs = n;
            }
        }
        if let Ok(secs) = std::env::var("SKYRUN_TIMEOUT") {
            if let Ok(n) = secs.parse() {
                self.test.timeout_secs = Some(n);
            }
        }
    }

    /// Check that the client can be built from this configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.selfservice_url.trim().is_empty() {
            return Err(ConfigError::Invalid("selfservice_url is empty".to_string()));
        }
        if self.api.account_id.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::Invalid("account_id is required".to_string()));
        }
        if !self.auth.has_credentials() {
            return Err(ConfigError::Invalid(
                "no credentials supplied; set an access token, a refresh token, or email and password"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Create a default config file content as a string.
    pub fn default_config_string() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Self Service base URL, e.g. `https://selfservice-4.rightscale.com`.
    pub selfservice_url: String,

    /// Cloud Management base URL. Only used to authenticate.
    pub api_url: String,

    /// Account the client acts on.
    pub account_id: Option<String>,

    /// Value of the `X-Api-Version` header.
    pub api_version: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            selfservice_url: DEFAULT_SELFSERVICE_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            account_id: None,
            api_version: DEFAULT_SELFSERVICE_API_VERSION.to_string(),
        }
    }
}

impl ApiConfig {
    /// Self Service URL without trailing slashes.
    pub fn selfservice_base(&self) -> &str {
        self.selfservice_url.trim_end_matches('/')
    }

    /// Cloud Management URL without trailing slashes.
    pub fn api_base(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }
}

/// Credentials. Never written back to disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(skip_serializing)]
    pub access_token: Option<String>,

    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,

    #[serde(skip_serializing)]
    pub email: Option<String>,

    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl AuthConfig {
    /// True if at least one login method is fully specified.
    pub fn has_credentials(&self) -> bool {
        self.access_token.is_some()
            || self.refresh_token.is_some()
            || (self.email.is_some() && self.password.is_some())
    }
}

/// Test run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Seconds between two pumps of the suite.
    pub poll_interval_secs: u64,

    /// Upper bound on a whole run. `None` polls until every template finishes.
    pub timeout_secs: Option<u64>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            timeout_secs: None,
        }
    }
}

impl TestConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Shape of a YAML auth file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AuthFile {
    selfservice_url: Option<String>,
    api_url: Option<String>,
    account_id: Option<AccountId>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

/// Account ids are numeric in most auth files but strings are accepted too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AccountId {
    Number(u64),
    Text(String),
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountId::Number(n) => write!(f, "{}", n),
            AccountId::Text(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.selfservice_url, DEFAULT_SELFSERVICE_URL);
        assert_eq!(config.test.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert!(config.test.timeout_secs.is_none());
    }

    #[test]
    fn test_config_to_toml_skips_secrets() {
        let mut config = Config::default();
        config.auth.access_token = Some("secret".to_string());
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[api]"));
        assert!(toml_str.contains("[test]"));
        assert!(!toml_str.contains("secret"));
    }

    #[test]
    fn test_merge_auth_numeric_account() {
        let file: AuthFile = serde_yaml::from_str(
            "account_id: 12345\nrefresh_token: abc\nselfservice_url: https://ss.example.com/\n",
        )
        .unwrap();
        let mut config = Config::default();
        config.merge_auth(file);

        assert_eq!(config.api.account_id.as_deref(), Some("12345"));
        assert_eq!(config.auth.refresh_token.as_deref(), Some("abc"));
        assert_eq!(config.api.selfservice_base(), "https://ss.example.com");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_credentials() {
        let mut config = Config::default();
        config.api.account_id = Some("1".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.auth.email = Some("me@example.com".to_string());
        assert!(config.validate().is_err());

        config.auth.password = Some("pw".to_string());
        assert!(config.validate().is_ok());
    }
}
