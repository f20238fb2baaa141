use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run ticker cadence and per-run fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// How often the ticker looks for due runs, in seconds.
    /// Clamped to the range `1..=3600`.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Maximum number of deliveries of a single run processed concurrently.
    /// Clamped to the range `1..=32`.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl DispatchConfig {
    /// Clamp both knobs into their allowed ranges.
    pub fn clamped(&self) -> Self {
        Self {
            tick_interval_secs: self.tick_interval_secs.clamp(1, 3_600),
            max_concurrent: self.max_concurrent.clamp(1, 32),
        }
    }
}

fn default_tick_interval_secs() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    1
}
