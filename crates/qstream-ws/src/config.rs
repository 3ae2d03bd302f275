//! Session configuration and retry policy.

use crate::error::{WsError, WsResult};
use qstream_core::Credentials;
use std::time::Duration;

/// Default auth response timeout.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of the session event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Retry policy for connecting and re-authenticating.
///
/// `max_attempts` bounds the number of retries after the first attempt;
/// `None` retries forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// No retries: the first failure is terminal.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn new(delay: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            enabled: true,
            delay,
            max_attempts,
        }
    }

    pub fn validate(&self) -> WsResult<()> {
        if self.enabled && self.delay.is_zero() {
            return Err(WsError::Config(
                "retry delay must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Attempt counter driven by a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Delay before the next retry, or `None` when retries are disabled
    /// or exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.policy.enabled {
            return None;
        }
        if let Some(max) = self.policy.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }

        self.attempts = self.attempts.saturating_add(1);
        Some(self.policy.delay)
    }

    /// Reset after a successful attempt.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Retries scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Total attempts made, including the first one.
    pub fn total_attempts(&self) -> u32 {
        self.attempts.saturating_add(1)
    }
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Host, optionally with port (e.g. `stream.example.com`).
    pub host: String,
    /// Request path; also signed in the auth handshake.
    pub path: String,
    /// `wss` when true, `ws` otherwise.
    pub use_tls: bool,
    pub credentials: Credentials,
    pub retry: RetryPolicy,
    /// `None` waits for the auth response indefinitely.
    pub auth_timeout: Option<Duration>,
    /// Log stream batches at info instead of trace.
    pub log_streams: bool,
    pub event_buffer: usize,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, path: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            use_tls: true,
            credentials,
            retry: RetryPolicy::default(),
            auth_timeout: Some(DEFAULT_AUTH_TIMEOUT),
            log_streams: false,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// WebSocket URL: `ws[s]://{host}{path}`.
    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!("{scheme}://{}{}", self.host, self.path)
    }

    /// Check the configuration before any connection attempt.
    ///
    /// # Errors
    ///
    /// Returns `WsError::Config` for an empty host, a path without a leading
    /// `/`, invalid credentials, a zero retry delay or a zero event buffer.
    pub fn validate(&self) -> WsResult<()> {
        if self.host.trim().is_empty() {
            return Err(WsError::Config("host cannot be empty".to_string()));
        }
        if !self.path.starts_with('/') {
            return Err(WsError::Config(format!(
                "path must start with '/': {}",
                self.path
            )));
        }
        if self.event_buffer == 0 {
            return Err(WsError::Config(
                "event buffer must be greater than zero".to_string(),
            ));
        }
        self.credentials.validate()?;
        self.retry.validate()
    }
}
