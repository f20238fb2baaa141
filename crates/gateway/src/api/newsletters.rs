//! Newsletter CRUD, delivery listing and manual dispatch.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use tb_mailing::validation::NewsletterDraft;
use uuid::Uuid;

use super::{api_error, service_error};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/newsletters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_newsletters(State(state): State<AppState>) -> impl IntoResponse {
    let newsletters = state.service.list_newsletters().await;
    let count = newsletters.len();
    Json(serde_json::json!({
        "newsletters": newsletters,
        "count": count,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/newsletters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn create_newsletter(
    State(state): State<AppState>,
    Json(draft): Json<NewsletterDraft>,
) -> impl IntoResponse {
    match state
        .service
        .create_newsletter(draft, chrono::Utc::now())
        .await
    {
        Ok(newsletter) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "newsletter": newsletter })),
        )
            .into_response(),
        Err(e) => service_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/newsletters/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Newsletter detail including its current recipients and run.
pub async fn get_newsletter(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.service.newsletter_detail(&id).await {
        Ok(detail) => Json(serde_json::json!({ "newsletter": detail })).into_response(),
        Err(e) => service_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PUT /v1/newsletters/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn update_newsletter(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(draft): Json<NewsletterDraft>,
) -> impl IntoResponse {
    match state
        .service
        .update_newsletter(&id, draft, chrono::Utc::now())
        .await
    {
        Ok(newsletter) => Json(serde_json::json!({ "newsletter": newsletter })).into_response(),
        Err(e) => service_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/newsletters/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_newsletter(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.service.delete_newsletter(&id).await {
        Ok(_) => Json(serde_json::json!({ "deleted": true })).into_response(),
        Err(e) => service_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/newsletters/:id/deliveries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const MAX_PAGE_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct DeliveriesQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn list_newsletter_deliveries(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeliveriesQuery>,
) -> impl IntoResponse {
    let limit = query.limit.clamp(1, MAX_PAGE_LIMIT);
    match state
        .service
        .newsletter_deliveries(&id, limit, query.offset)
        .await
    {
        Ok((deliveries, total)) => Json(serde_json::json!({
            "deliveries": deliveries,
            "total": total,
            "limit": limit,
            "offset": query.offset,
        }))
        .into_response(),
        Err(e) => service_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/newsletters/:id/dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Dispatch to the current members right away, outside the schedule. The
/// run proceeds in the background; progress shows up on the SSE stream.
pub async fn dispatch_now(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    if state.service.directory().newsletter(&id).await.is_none() {
        return api_error(StatusCode::NOT_FOUND, "newsletter not found");
    }

    let engine = state.engine.clone();
    tokio::spawn(async move {
        match engine.run(id, None).await {
            Ok(report) => tracing::info!(
                newsletter_id = %id,
                recipients = report.recipients,
                success = report.outcome.success,
                failure = report.outcome.failure,
                canceled = report.outcome.canceled,
                "manual dispatch finished"
            ),
            Err(e) => tracing::warn!(newsletter_id = %id, error = %e, "manual dispatch aborted"),
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "newsletter_id": id,
            "message": "dispatch started",
        })),
    )
        .into_response()
}
