mod dispatch;
mod observability;
mod server;
mod transport;
mod workspace;

pub use dispatch::*;
pub use observability::*;
pub use server::*;
pub use transport::*;
pub use workspace::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error(
                "server.port",
                "port must be greater than 0",
            ));
        }

        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }

        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        if let Some(rl) = &self.server.rate_limit {
            if rl.requests_per_second == 0 || rl.burst_size == 0 {
                errors.push(ConfigError::error(
                    "server.rate_limit",
                    "requests_per_second and burst_size must both be greater than 0",
                ));
            }
        }

        let base_url = self.transport.base_url.trim();
        if base_url.is_empty() {
            errors.push(ConfigError::error(
                "transport.base_url",
                "base_url must not be empty",
            ));
        } else if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            errors.push(ConfigError::error(
                "transport.base_url",
                "base_url must start with http:// or https://",
            ));
        }

        if self.transport.timeout_ms == 0 {
            errors.push(ConfigError::error(
                "transport.timeout_ms",
                "timeout_ms must be greater than 0",
            ));
        }

        if self.transport.token_env.is_empty() {
            errors.push(ConfigError::warning(
                "transport.token_env",
                "no token env var configured; messages will be sent without Authorization",
            ));
        }

        let d = &self.dispatch;
        let clamped = d.clamped();
        if clamped.tick_interval_secs != d.tick_interval_secs {
            errors.push(ConfigError::warning(
                "dispatch.tick_interval_secs",
                format!(
                    "{} is out of range, using {}",
                    d.tick_interval_secs, clamped.tick_interval_secs
                ),
            ));
        }
        if clamped.max_concurrent != d.max_concurrent {
            errors.push(ConfigError::warning(
                "dispatch.max_concurrent",
                format!(
                    "{} is out of range, using {}",
                    d.max_concurrent, clamped.max_concurrent
                ),
            ));
        }

        let obs = &self.observability;
        if !(0.0..=1.0).contains(&obs.sample_rate) {
            errors.push(ConfigError::warning(
                "observability.sample_rate",
                format!("{} is outside 0.0..=1.0, using {}", obs.sample_rate, obs.sampling_ratio()),
            ));
        }
        if obs.otlp_endpoint.is_some() && obs.otlp_target().is_none() {
            errors.push(ConfigError::warning(
                "observability.otlp_endpoint",
                "blank endpoint, trace export disabled",
            ));
        }

        errors
    }
}
