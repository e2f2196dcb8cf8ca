//! Rendering of per-request errors as JSON responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::{protocol::ErrorResponse, ServiceError};

/// Axum-facing wrapper around [`ServiceError`].
///
/// Handlers and pipeline stages return `Result<_, ApiError>`; the error is
/// turned into `{"code": ..., "message": ...}` with the matching status.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(ServiceError::BadRequest(message.into()))
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self(ServiceError::Unavailable(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorResponse::from(&self.0))).into_response()
    }
}
