//! Message transport: hands a single text message to the SMS gateway.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tb_domain::config::TransportConfig;
use tb_domain::{Error, Result};

/// Sends one message. `true` means the gateway accepted it; every other
/// outcome (rejection, connection error, timeout) is `false`.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(&self, delivery_id: u64, phone: &str, text: &str) -> bool;
}

#[derive(Debug, Serialize, PartialEq)]
struct SendPayload<'a> {
    id: u64,
    phone: u64,
    text: &'a str,
}

/// `POST {base_url}/{delivery_id}` with `{"id", "phone", "text"}`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("building transport client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Build from config, reading the gateway token from `token_env`.
    pub fn from_config(cfg: &TransportConfig) -> Result<Self> {
        let token = std::env::var(&cfg.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty());
        if token.is_none() {
            tracing::warn!(
                env = %cfg.token_env,
                "transport token not set, messages will be sent without Authorization"
            );
        }
        Self::new(
            cfg.base_url.clone(),
            token,
            Duration::from_millis(cfg.timeout_ms),
        )
    }

    fn endpoint(&self, delivery_id: u64) -> String {
        format!("{}/{}", self.base_url, delivery_id)
    }
}

#[async_trait]
impl MessageTransport for HttpTransport {
    async fn send(&self, delivery_id: u64, phone: &str, text: &str) -> bool {
        let Ok(phone_num) = phone.parse::<u64>() else {
            tracing::warn!(delivery_id, "phone is not numeric, not sending");
            return false;
        };
        let payload = SendPayload {
            id: delivery_id,
            phone: phone_num,
            text,
        };

        let mut req = self.client.post(self.endpoint(delivery_id)).json(&payload);
        if let Some(token) = &self.token {
            req = req.header(reqwest::header::AUTHORIZATION, token.as_str());
        }

        match req.send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => true,
            Ok(resp) => {
                tracing::warn!(delivery_id, status = %resp.status(), "gateway rejected message");
                false
            }
            Err(e) if e.is_timeout() => {
                tracing::warn!(delivery_id, "gateway timed out");
                false
            }
            Err(e) => {
                tracing::warn!(delivery_id, error = %e, "gateway request failed");
                false
            }
        }
    }
}
