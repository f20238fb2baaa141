//! Customer CRUD API.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use tb_mailing::validation::CustomerDraft;
use uuid::Uuid;

use super::service_error;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/customers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_customers(State(state): State<AppState>) -> impl IntoResponse {
    let customers = state.service.list_customers().await;
    let count = customers.len();
    Json(serde_json::json!({
        "customers": customers,
        "count": count,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/customers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn create_customer(
    State(state): State<AppState>,
    Json(draft): Json<CustomerDraft>,
) -> impl IntoResponse {
    match state.service.create_customer(draft, chrono::Utc::now()).await {
        Ok(customer) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "customer": customer })),
        )
            .into_response(),
        Err(e) => service_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/customers/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_customer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.service.get_customer(&id).await {
        Ok(customer) => Json(serde_json::json!({ "customer": customer })).into_response(),
        Err(e) => service_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PUT /v1/customers/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Partial update: omitted fields keep their stored values.
pub async fn update_customer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(draft): Json<CustomerDraft>,
) -> impl IntoResponse {
    match state
        .service
        .update_customer(&id, draft, chrono::Utc::now())
        .await
    {
        Ok(customer) => Json(serde_json::json!({ "customer": customer })).into_response(),
        Err(e) => service_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/customers/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_customer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.service.delete_customer(&id).await {
        Ok(_) => Json(serde_json::json!({ "deleted": true })).into_response(),
        Err(e) => service_error(e),
    }
}
