use std::sync::Arc;

use tb_domain::config::Config;
use tb_mailing::{DeliveryStore, DispatchEngine, MailingService, RunStore};

/// Shared state handed to every handler and background task.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: Arc<MailingService>,
    pub engine: Arc<DispatchEngine>,
    pub runs: Arc<RunStore>,
    pub delivery_store: Arc<DeliveryStore>,
    /// SHA-256 of the API bearer token; `None` disables auth.
    pub api_token_hash: Option<Vec<u8>>,
}
