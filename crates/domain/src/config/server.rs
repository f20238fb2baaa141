use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP API server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Env var consulted for the bearer token when `api_token` is unset.
    #[serde(default = "d_api_token_env")]
    pub api_token_env: String,
    #[serde(default)]
    pub api_token: Option<String>,
    /// Per-client-IP token bucket; absent means unlimited.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            cors: CorsConfig::default(),
            api_token_env: d_api_token_env(),
            api_token: None,
            rate_limit: None,
        }
    }
}

/// Where the bearer token protecting `/v1/*` came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    Config,
    Env(String),
}

impl std::fmt::Display for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config => f.write_str("config"),
            Self::Env(var) => write!(f, "env:{var}"),
        }
    }
}

impl ServerConfig {
    /// Resolve the API token: inline `api_token` first, then the env var.
    /// Empty values count as unset. `None` leaves the API open.
    pub fn resolve_api_token(&self) -> Option<(TokenSource, String)> {
        self.resolve_api_token_with(|var| std::env::var(var).ok())
    }

    fn resolve_api_token_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Option<(TokenSource, String)> {
        if let Some(t) = self.api_token.as_deref().filter(|t| !t.is_empty()) {
            return Some((TokenSource::Config, t.to_string()));
        }
        lookup(&self.api_token_env)
            .filter(|t| !t.is_empty())
            .map(|t| (TokenSource::Env(self.api_token_env.clone()), t))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u64,
    pub burst_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Exact origins, `scheme://host:*` for any port, or `["*"]`.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    3300
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}
fn d_api_token_env() -> String {
    "TB_API_TOKEN".into()
}
