//! Bridge configuration parsing, validation, and environment overrides.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Environment variable overriding `retry.max_attempts`.
pub const ENV_MAX_RETRIES: &str = "TOOLBRIDGE_MAX_RETRIES";

/// Environment variable overriding `timeouts.request_ms`.
pub const ENV_REQUEST_TIMEOUT_MS: &str = "TOOLBRIDGE_REQUEST_TIMEOUT_MS";

/// Configurable deadlines (milliseconds) for the transport.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Per-request response deadline.
    #[serde(default = "default_request_ms")]
    pub request_ms: u64,
    /// Readiness-probe deadline after spawn.
    ///
    /// Intentionally longer than `request_ms`-scale steady-state traffic so
    /// a slow tool-server startup does not count as a failed connection.
    #[serde(default = "default_handshake_ms")]
    pub handshake_ms: u64,
}

fn default_request_ms() -> u64 {
    60_000
}

fn default_handshake_ms() -> u64 {
    30_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: default_request_ms(),
            handshake_ms: default_handshake_ms(),
        }
    }
}

/// Reconnection budget and backoff bounds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Consecutive failed attempts before reconnection stops.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff base; the n-th consecutive failure waits `base * 2^n`.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on a single backoff delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Bridge configuration parsed from `toolbridge.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Tool-server executable (e.g., `node`, `python`).
    pub server_command: String,
    /// Arguments passed to the tool-server executable.
    #[serde(default)]
    pub server_args: Vec<String>,
    /// Transport deadlines.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Reconnection budget and backoff bounds.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl BridgeConfig {
    /// Build a configuration with defaults for the given server command.
    #[must_use]
    pub fn new(server_command: impl Into<String>) -> Self {
        Self {
            server_command: server_command.into(),
            server_args: Vec::new(),
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string, apply environment overrides,
    /// and validate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override retry and timeout settings from the process environment.
    ///
    /// Reads [`ENV_MAX_RETRIES`] and [`ENV_REQUEST_TIMEOUT_MS`]; values that
    /// are present but unparseable are ignored with a warning so a typo in
    /// the environment cannot take the bridge down.
    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = read_env_u64(ENV_MAX_RETRIES) {
            self.retry.max_attempts = u32::try_from(value).unwrap_or(u32::MAX);
        }
        if let Some(value) = read_env_u64(ENV_REQUEST_TIMEOUT_MS) {
            self.timeouts.request_ms = value;
        }
    }

    /// Per-request response deadline as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.request_ms)
    }

    /// Readiness-probe deadline as a [`Duration`].
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.handshake_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.server_command.trim().is_empty() {
            return Err(AppError::Config("server_command must not be empty".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::Config(
                "retry.max_attempts must be greater than zero".into(),
            ));
        }
        if self.timeouts.request_ms == 0 {
            return Err(AppError::Config(
                "timeouts.request_ms must be greater than zero".into(),
            ));
        }
        if self.timeouts.handshake_ms == 0 {
            return Err(AppError::Config(
                "timeouts.handshake_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Read an environment variable as `u64`, warning on unparseable values.
fn read_env_u64(key: &str) -> Option<u64> {
    let raw = env::var(key).ok()?;
    match raw.parse::<u64>() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, raw, %err, "ignoring unparseable environment override");
            None
        }
    }
}
