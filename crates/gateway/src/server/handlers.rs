//! Built-in request handlers.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::{protocol::HealthResponse, ServiceError};

use super::{error::ApiError, state::AppState};

/// `GET /health`: liveness and readiness check.
///
/// Returns `200 OK` when the database pool is open and the media client is
/// configured, `503 Service Unavailable` otherwise.
pub async fn health(State(state): State<AppState>) -> Response {
    let database = state.database_ready();
    let media = state.media_ready();

    let (status_code, status_str) = if database && media {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let body = HealthResponse {
        status: status_str.into(),
        database,
        media,
    };
    (status_code, Json(body)).into_response()
}

/// Catch-all 404 handler.
pub async fn not_found() -> ApiError {
    ServiceError::NotFound("the requested resource does not exist".into()).into()
}
