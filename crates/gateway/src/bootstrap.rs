//! AppState construction and background-task spawning.
//!
//! Shared by `serve` and the offline CLI commands (`dispatch`, `stats`) so
//! every entry point sees the same stores and the same dispatch engine.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sha2::{Digest, Sha256};

use tb_domain::config::{Config, ConfigSeverity};
use tb_mailing::{
    DeliveryStore, DirectoryStore, DispatchEngine, HttpTransport, MailingService,
    MessageTransport, RunStore,
};

use crate::state::AppState;

const DELIVERY_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Validate config, open the stores and wire the production HTTP transport.
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    check_config(&config)?;
    let transport = HttpTransport::from_config(&config.transport)
        .context("building message transport")?;
    assemble(config, Arc::new(transport))
}

fn check_config(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("{errors} config error(s), refusing to start");
    }
    Ok(())
}

/// Wire the stores, service and engine around an arbitrary transport.
pub fn assemble(
    config: Arc<Config>,
    transport: Arc<dyn MessageTransport>,
) -> anyhow::Result<AppState> {
    // ── State directory ─────────────────────────────────────────────
    let state_path = &config.workspace.state_path;
    std::fs::create_dir_all(state_path)
        .with_context(|| format!("creating state dir {}", state_path.display()))?;

    // ── Stores ──────────────────────────────────────────────────────
    let directory = Arc::new(DirectoryStore::new(state_path));
    let runs = Arc::new(RunStore::new(state_path));
    let delivery_store = Arc::new(DeliveryStore::new(state_path));
    tracing::info!(path = %state_path.display(), "stores ready");

    let service = Arc::new(MailingService::new(
        directory.clone(),
        runs.clone(),
        delivery_store.clone(),
    ));
    let engine = Arc::new(DispatchEngine::new(
        directory,
        delivery_store.clone(),
        transport,
        &config.transport,
        &config.dispatch,
    ));

    // ── API token (read once, hash for constant-time comparison) ────
    let api_token_hash = match config.server.resolve_api_token() {
        Some((source, token)) => {
            tracing::info!(source = %source, "API bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        None => {
            tracing::warn!(
                env = %config.server.api_token_env,
                "API bearer-token auth DISABLED, set server.api_token or the env var"
            );
            None
        }
    };

    Ok(AppState {
        config,
        service,
        engine,
        runs,
        delivery_store,
        api_token_hash,
    })
}

/// Start the run ticker and the periodic delivery flush.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Run ticker ──────────────────────────────────────────────────
    {
        let engine = state.engine.clone();
        let runs = state.runs.clone();
        let every = Duration::from_secs(state.config.dispatch.clamped().tick_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let fired = engine.fire_due(&runs, chrono::Utc::now()).await;
                if !fired.is_empty() {
                    tracing::debug!(count = fired.len(), "due runs dispatched");
                }
            }
        });
        tracing::info!(tick_secs = every.as_secs(), "run ticker started");
    }

    // ── Periodic delivery flush ──────────────────────────────────────
    {
        let delivery_store = state.delivery_store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(DELIVERY_FLUSH_INTERVAL);
            loop {
                interval.tick().await;
                delivery_store.flush_if_dirty().await;
            }
        });
    }
    tracing::info!("background tasks spawned");
}
