use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// `GET /health`: liveness plus a few cheap counters.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (customers, newsletters) = state
        .service
        .directory()
        .read(|d| (d.customers().count(), d.newsletters().count()))
        .await;
    let pending_runs = state
        .runs
        .list()
        .await
        .iter()
        .filter(|r| r.enabled)
        .count();

    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "customers": customers,
        "newsletters": newsletters,
        "pending_runs": pending_runs,
    }))
}
