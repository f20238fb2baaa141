use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message transport (SMS gateway)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// HTTP gateway used to hand individual text messages to the carrier.
///
/// Each message is posted to `{base_url}/{delivery_id}`. The bearer value
/// for the `Authorization` header is read from the env var named by
/// `token_env` once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default = "d_token_env")]
    pub token_env: String,
    /// Upper bound for a single send, in milliseconds. A send that does not
    /// answer in time counts as a failed delivery.
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            token_env: d_token_env(),
            timeout_ms: d_timeout_ms(),
        }
    }
}

fn d_base_url() -> String {
    "http://127.0.0.1:8080/v1/send".into()
}
fn d_token_env() -> String {
    "TB_TRANSPORT_TOKEN".into()
}
fn d_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = TransportConfig::default();
        assert_eq!(cfg.timeout_ms, 5_000);
        assert_eq!(cfg.token_env, "TB_TRANSPORT_TOKEN");
        assert!(cfg.base_url.ends_with("/v1/send"));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg: TransportConfig = toml::from_str("timeout_ms = 1500").unwrap();
        assert_eq!(cfg.timeout_ms, 1_500);
        assert_eq!(cfg.token_env, "TB_TRANSPORT_TOKEN");
    }
}
