pub mod auth;
pub mod customers;
pub mod deliveries;
pub mod health;
pub mod newsletters;
pub mod stats;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tb_domain::Error;
use tb_mailing::ServiceError;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the bearer-token middleware).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/health", get(health::health));

    let protected = Router::new()
        // Customers
        .route(
            "/v1/customers",
            get(customers::list_customers).post(customers::create_customer),
        )
        .route(
            "/v1/customers/:id",
            get(customers::get_customer)
                .put(customers::update_customer)
                .delete(customers::delete_customer),
        )
        // Newsletters
        .route(
            "/v1/newsletters",
            get(newsletters::list_newsletters).post(newsletters::create_newsletter),
        )
        .route(
            "/v1/newsletters/:id",
            get(newsletters::get_newsletter)
                .put(newsletters::update_newsletter)
                .delete(newsletters::delete_newsletter),
        )
        .route(
            "/v1/newsletters/:id/deliveries",
            get(newsletters::list_newsletter_deliveries),
        )
        .route(
            "/v1/newsletters/:id/dispatch",
            post(newsletters::dispatch_now),
        )
        // Stats
        .route("/v1/stats", get(stats::list_stats))
        .route("/v1/stats/:id", get(stats::get_stats))
        // Delivery status stream
        .route("/v1/deliveries/events", get(deliveries::delivery_events_sse))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected)
}

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Map a service failure onto an HTTP status.
pub(crate) fn service_error(err: ServiceError) -> Response {
    match err {
        ServiceError::Invalid(fields) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "validation failed",
                "fields": fields,
            })),
        )
            .into_response(),
        ServiceError::Domain(e) => domain_error(e),
    }
}

pub(crate) fn domain_error(err: Error) -> Response {
    let status = match &err {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        _ => {
            tracing::error!(error = %err, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    api_error(status, err.to_string())
}
