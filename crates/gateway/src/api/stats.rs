//! Delivery outcome counts per newsletter.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use uuid::Uuid;

use super::service_error;
use crate::state::AppState;

/// `GET /v1/stats`: every newsletter with its success / ongoing / failure /
/// canceled counts.
pub async fn list_stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.service.stats_all().await;
    let count = stats.len();
    Json(serde_json::json!({
        "stats": stats,
        "count": count,
    }))
}

/// `GET /v1/stats/:id`
pub async fn get_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.service.stats(&id).await {
        Ok(stats) => Json(serde_json::json!({ "stats": stats })).into_response(),
        Err(e) => service_error(e),
    }
}
