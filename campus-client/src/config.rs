//! Configuration loading for the campus client.
//!
//! All fields are required. No defaults.

use crate::telemetry::TelemetryConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "CAMPUS_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Base URL of the hosted project, e.g. `https://xyz.supabase.co`.
    pub project_url: String,
    /// Realtime websocket endpoint, e.g. `wss://xyz.supabase.co/realtime/v1/websocket`.
    pub realtime_url: String,
    /// Public API key sent with every request.
    pub anon_key: String,
    pub request_timeout_ms: u64,
    pub page_size: u32,
    pub heartbeat_interval_ms: u64,
    pub refresh_interval_ms: u64,
    pub reconnect: ReconnectConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or CAMPUS_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

impl ClientConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_url.trim().is_empty() {
            return Err(invalid("project_url", "must not be empty"));
        }
        if !has_scheme(&self.project_url, &["http://", "https://"]) {
            return Err(invalid("project_url", "must start with http:// or https://"));
        }
        if self.realtime_url.trim().is_empty() {
            return Err(invalid("realtime_url", "must not be empty"));
        }
        if !has_scheme(&self.realtime_url, &["ws://", "wss://"]) {
            return Err(invalid("realtime_url", "must start with ws:// or wss://"));
        }
        if self.anon_key.trim().is_empty() {
            return Err(invalid("anon_key", "must not be empty"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms", "must be > 0"));
        }
        if self.page_size == 0 {
            return Err(invalid("page_size", "must be > 0"));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(invalid("heartbeat_interval_ms", "must be > 0"));
        }
        if self.refresh_interval_ms == 0 {
            return Err(invalid("refresh_interval_ms", "must be > 0"));
        }
        if self.reconnect.initial_ms == 0 {
            return Err(invalid("reconnect.initial_ms", "must be > 0"));
        }
        if self.reconnect.max_ms < self.reconnect.initial_ms {
            return Err(invalid("reconnect.max_ms", "must be >= initial_ms"));
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(invalid("reconnect.multiplier", "must be >= 1.0"));
        }
        if self.telemetry.filter.trim().is_empty() {
            return Err(invalid("telemetry.filter", "must not be empty"));
        }
        Ok(())
    }

    /// Base of the REST table endpoints.
    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.project_url.trim_end_matches('/'))
    }

    /// Base of the auth endpoints.
    pub fn auth_url(&self) -> String {
        format!("{}/auth/v1", self.project_url.trim_end_matches('/'))
    }
}

fn has_scheme(url: &str, schemes: &[&str]) -> bool {
    let url = url.trim().to_ascii_lowercase();
    schemes.iter().any(|scheme| url.starts_with(scheme))
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
