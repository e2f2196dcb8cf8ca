//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use sqlx::PgPool;

use super::error::ApiError;
use super::middleware::BodyLimit;
use crate::cors::CorsPolicy;
use crate::media::MediaClient;
use crate::session::SessionCookiePolicy;

/// Application state shared across all request handlers.
///
/// Every field is cheap to clone (`PgPool` and the policies are `Arc`-backed),
/// so Axum clones the state per request without copying data.
#[derive(Clone)]
pub struct AppState {
    /// Connection pool established during bootstrap.
    pub db: PgPool,
    /// `None` when the media client failed to configure at startup.
    media: Option<MediaClient>,
    pub session_policy: Arc<SessionCookiePolicy>,
    pub cors_policy: Arc<CorsPolicy>,
    pub body_limit: BodyLimit,
}

impl AppState {
    pub fn new(
        db: PgPool,
        media: Option<MediaClient>,
        session_policy: Arc<SessionCookiePolicy>,
        cors_policy: Arc<CorsPolicy>,
        body_limit: BodyLimit,
    ) -> Self {
        Self {
            db,
            media,
            session_policy,
            cors_policy,
            body_limit,
        }
    }

    /// The media client, or `503` when media features are unavailable.
    pub fn media(&self) -> Result<&MediaClient, ApiError> {
        self.media
            .as_ref()
            .ok_or_else(|| ApiError::unavailable("media features are unavailable"))
    }

    pub fn media_ready(&self) -> bool {
        self.media.is_some()
    }

    pub fn database_ready(&self) -> bool {
        !self.db.is_closed()
    }
}
