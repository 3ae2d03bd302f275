//! Application configuration.

use crate::error::{AppError, AppResult};
use qstream_core::Credentials;
use qstream_ws::config::{DEFAULT_AUTH_TIMEOUT, DEFAULT_EVENT_BUFFER};
use qstream_ws::{RetryPolicy, SessionConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variables that override the `[credentials]` table.
pub const ENV_API_KEY: &str = "QSTREAM_API_KEY";
pub const ENV_SECRET: &str = "QSTREAM_SECRET";
pub const ENV_PASSPHRASE: &str = "QSTREAM_PASSPHRASE";

/// Feed endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host with optional port (e.g. "quotes.example.com:443").
    pub host: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
}

fn default_path() -> String {
    "/price.tickers".to_string()
}

fn default_use_tls() -> bool {
    true
}

/// API credentials. Usually left empty in the file and supplied through
/// the environment.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub api_key: String,
    /// Base64-encoded API secret.
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub passphrase: String,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("api_key", &self.api_key)
            .field("secret", &"[REDACTED]")
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}

/// Retry settings for connecting and re-authenticating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_enabled")]
    pub enabled: bool,
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
    /// Retries after the first attempt. Unbounded when absent.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_retry_enabled() -> bool {
    true
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_retry_enabled(),
            delay_ms: default_retry_delay_ms(),
            max_attempts: None,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            delay: Duration::from_millis(cfg.delay_ms),
            max_attempts: cfg.max_attempts,
        }
    }
}

/// Session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Auth response timeout. `0` waits forever.
    #[serde(default = "default_auth_timeout_ms")]
    pub auth_timeout_ms: u64,
    /// Log every stream batch at info level.
    #[serde(default)]
    pub log_streams: bool,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_auth_timeout_ms() -> u64 {
    DEFAULT_AUTH_TIMEOUT.as_millis() as u64
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            auth_timeout_ms: default_auth_timeout_ms(),
            log_streams: false,
            event_buffer: default_event_buffer(),
        }
    }
}

/// A pair subscribed at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub base_token: String,
    pub quote_token: String,
    /// Token the quantity levels are denominated in. Defaults to the base token.
    #[serde(default)]
    pub quantity_token: Option<String>,
    pub levels: Vec<f64>,
    /// Generated when absent.
    #[serde(default)]
    pub request_id: Option<String>,
}

impl SubscriptionConfig {
    pub fn quantity_token(&self) -> &str {
        self.quantity_token.as_deref().unwrap_or(&self.base_token)
    }
}

/// A metadata request issued once the first authentication succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRequestConfig {
    /// e.g. "max_levels", "allowed_markets", "max_connections".
    pub request_type: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
    #[serde(default)]
    pub data_requests: Vec<DataRequestConfig>,
}

impl AppConfig {
    /// Load configuration from a TOML file and apply environment overrides.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        let mut config = Self::from_toml(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration without environment overrides or validation.
    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Replace credential fields with values from `lookup` when present
    /// and non-empty.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fields = [
            (ENV_API_KEY, &mut self.credentials.api_key),
            (ENV_SECRET, &mut self.credentials.secret),
            (ENV_PASSPHRASE, &mut self.credentials.passphrase),
        ];
        for (key, field) in fields {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *field = value;
            }
        }
    }

    /// Check fields the session config does not cover.
    pub fn validate(&self) -> AppResult<()> {
        for sub in &self.subscriptions {
            if sub.base_token.is_empty() || sub.quote_token.is_empty() {
                return Err(AppError::Config(
                    "subscription tokens cannot be empty".to_string(),
                ));
            }
            if sub.levels.is_empty() {
                return Err(AppError::Config(format!(
                    "subscription {}/{} has no quantity levels",
                    sub.base_token, sub.quote_token
                )));
            }
        }
        if self
            .data_requests
            .iter()
            .any(|req| req.request_type.is_empty())
        {
            return Err(AppError::Config(
                "data request type cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the library-level session configuration.
    pub fn session_config(&self) -> AppResult<SessionConfig> {
        let credentials = Credentials::new(
            self.credentials.api_key.as_str(),
            self.credentials.secret.as_str(),
            self.credentials.passphrase.as_str(),
        )?;

        let mut config = SessionConfig::new(
            self.server.host.as_str(),
            self.server.path.as_str(),
            credentials,
        );
        config.use_tls = self.server.use_tls;
        config.retry = RetryPolicy::from(&self.retry);
        config.auth_timeout = match self.session.auth_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        config.log_streams = self.session.log_streams;
        config.event_buffer = self.session.event_buffer;

        config.validate()?;
        Ok(config)
    }
}
