//! Configuration for the vitals service.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Remote API settings (base URL, token endpoint, client credentials)
//! - Credential storage path
//! - Activity cadences (refresh, collection, shutdown grace)
//! - Retry backoff policy
//! - Export and notification sinks
//!
//! The configuration is loaded once at startup, validated, and passed by
//! reference into each component's constructor.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::BackoffPolicy;
use crate::dispatch::EventClass;

// =============================================================================
// Constants
// =============================================================================

/// Default refresh cadence (55 minutes).
///
/// Intentionally shorter than the typical access-token lifetime of one
/// hour, so the credential is replaced before it can expire.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(55 * 60);

/// Default collection cadence (24 hours).
pub const DEFAULT_COLLECT_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default grace period for in-flight work on shutdown (30 seconds).
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Default per-request HTTP timeout (30 seconds).
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of records requested per paginated domain.
pub const DEFAULT_RECORD_LIMIT: u32 = 25;

/// Maximum record limit accepted by the remote API.
pub const MAX_RECORD_LIMIT: u32 = 50;

fn default_refresh_interval() -> Duration {
    DEFAULT_REFRESH_INTERVAL
}

fn default_collect_interval() -> Duration {
    DEFAULT_COLLECT_INTERVAL
}

fn default_shutdown_grace() -> Duration {
    DEFAULT_SHUTDOWN_GRACE
}

fn default_http_timeout() -> Duration {
    DEFAULT_HTTP_TIMEOUT
}

fn default_record_limit() -> u32 {
    DEFAULT_RECORD_LIMIT
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("snapshots")
}

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

// =============================================================================
// Sections
// =============================================================================

/// Remote API and authorization server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the remote data API.
    pub base_url: String,

    /// Token endpoint of the authorization server.
    pub token_url: String,

    /// OAuth2 client identifier.
    pub client_id: String,

    /// OAuth2 client secret.
    pub client_secret: String,

    /// Per-request HTTP timeout (default: 30s).
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Records requested per paginated domain (default: 25, max: 50).
    #[serde(default = "default_record_limit")]
    pub record_limit: u32,
}

/// Where the credential record is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Path of the credential file; fully overwritten on every refresh.
    pub path: PathBuf,
}

/// Cadences for the two periodic activities and shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Refresh cadence (default: 55m).
    #[serde(default = "default_refresh_interval", with = "humantime_serde")]
    pub refresh_interval: Duration,

    /// Collection cadence (default: 24h).
    #[serde(default = "default_collect_interval", with = "humantime_serde")]
    pub collect_interval: Duration,

    /// How long an in-flight cycle may keep running after a termination
    /// signal before it is abandoned (default: 30s).
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            collect_interval: DEFAULT_COLLECT_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// Snapshot export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory receiving one JSON file per collection cycle.
    #[serde(default = "default_export_dir")]
    pub dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: default_export_dir(),
        }
    }
}

/// Notification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Subscription class: `errors`, `success`, or `all` (default: all).
    #[serde(default)]
    pub class: EventClass,
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote API and authorization server settings.
    pub api: ApiConfig,

    /// Credential persistence settings.
    pub credential: CredentialConfig,

    /// Activity cadences.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Retry backoff policy for every retried network call.
    #[serde(default)]
    pub backoff: BackoffPolicy,

    /// Snapshot export settings.
    #[serde(default)]
    pub export: ExportConfig,

    /// Notification settings.
    #[serde(default)]
    pub notification: NotificationConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or
    /// validated.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, url) in [
            ("api.base_url", &self.api.base_url),
            ("api.token_url", &self.api.token_url),
        ] {
            reqwest::Url::parse(url).map_err(|e| {
                ConfigError::ValidationError(format!("{field} is not a valid URL: {e}"))
            })?;
        }

        if self.api.client_id.is_empty() {
            return Err(ConfigError::ValidationError(
                "api.client_id must not be empty".to_string(),
            ));
        }
        if self.api.client_secret.is_empty() {
            return Err(ConfigError::ValidationError(
                "api.client_secret must not be empty".to_string(),
            ));
        }
        if self.api.record_limit == 0 || self.api.record_limit > MAX_RECORD_LIMIT {
            return Err(ConfigError::ValidationError(format!(
                "api.record_limit must be between 1 and {MAX_RECORD_LIMIT}"
            )));
        }

        if self.credential.path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "credential.path must not be empty".to_string(),
            ));
        }

        if self.schedule.refresh_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "schedule.refresh_interval must be positive".to_string(),
            ));
        }
        if self.schedule.collect_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "schedule.collect_interval must be positive".to_string(),
            ));
        }

        if self.backoff.initial_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "backoff.initial_interval must be positive".to_string(),
            ));
        }
        if self.backoff.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "backoff.multiplier must be >= 1.0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.backoff.randomization_factor) {
            return Err(ConfigError::ValidationError(
                "backoff.randomization_factor must be in [0, 1)".to_string(),
            ));
        }
        if self.backoff.max_elapsed_time < self.backoff.initial_interval {
            return Err(ConfigError::ValidationError(
                "backoff.max_elapsed_time must be >= backoff.initial_interval".to_string(),
            ));
        }

        Ok(())
    }
}
