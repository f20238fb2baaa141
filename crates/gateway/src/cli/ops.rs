//! One-shot operational commands that run against the state directory
//! without starting the server.

use std::sync::Arc;

use uuid::Uuid;

use tb_domain::config::Config;

use crate::bootstrap;

/// Dispatch one newsletter immediately and print the report as JSON.
pub async fn dispatch(config: Arc<Config>, newsletter_id: Uuid) -> anyhow::Result<()> {
    let state = bootstrap::build_app_state(config).await?;

    let result = state.engine.run(newsletter_id, None).await;
    // Persist whatever was recorded, even if the run aborted midway.
    state.delivery_store.flush_if_dirty().await;

    let report = result?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Print delivery statistics for one newsletter, or for all of them.
pub async fn stats(config: Arc<Config>, newsletter_id: Option<Uuid>) -> anyhow::Result<()> {
    let state = bootstrap::build_app_state(config).await?;

    let output = match newsletter_id {
        Some(id) => {
            let stats = state.service.stats(&id).await?;
            serde_json::to_string_pretty(&stats)?
        }
        None => serde_json::to_string_pretty(&state.service.stats_all().await)?,
    };
    println!("{output}");
    Ok(())
}
