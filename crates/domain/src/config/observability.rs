use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Log output shape for `serve`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line, for log shippers.
    #[default]
    Json,
    /// Human-readable single-line records.
    Compact,
}

/// Logging and optional OTLP trace export.
///
/// Dispatch runs and transport calls are traced as spans; with an
/// `otlp_endpoint` they are exported to a collector, tagged with
/// `service_name` and, when set, `deployment.environment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub log_format: LogFormat,
    /// OTLP/gRPC collector, e.g. `http://localhost:4317`. Blank disables export.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "d_service_name")]
    pub service_name: String,
    /// Fraction of traces exported, `0.0..=1.0`.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: f64,
    /// Reported as the `deployment.environment` resource attribute.
    #[serde(default)]
    pub environment: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            otlp_endpoint: None,
            service_name: d_service_name(),
            sample_rate: d_sample_rate(),
            environment: None,
        }
    }
}

impl ObservabilityConfig {
    /// The collector endpoint, if export is actually configured.
    pub fn otlp_target(&self) -> Option<&str> {
        self.otlp_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    /// Sample ratio clamped into the range the sampler accepts.
    pub fn sampling_ratio(&self) -> f64 {
        if self.sample_rate.is_nan() {
            return 1.0;
        }
        self.sample_rate.clamp(0.0, 1.0)
    }

    /// Resource attributes beyond `service.name`.
    pub fn resource_attributes(&self) -> Vec<(&'static str, String)> {
        let mut attrs = vec![("service.version", env!("CARGO_PKG_VERSION").to_string())];
        if let Some(env) = self.environment.as_deref().filter(|e| !e.is_empty()) {
            attrs.push(("deployment.environment", env.to_string()));
        }
        attrs
    }
}

fn d_service_name() -> String {
    "textblast".into()
}

fn d_sample_rate() -> f64 {
    1.0
}
