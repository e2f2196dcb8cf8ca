//! CORS enforcement stage.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{
        header::{COOKIE, ORIGIN, SET_COOKIE},
        Method,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::policy::{CorsPolicy, OriginCheck};

/// Stage: answer preflights and attach CORS headers to every other response.
///
/// This stage wraps everything mounted beneath it, so responses produced by
/// later stages (body parse errors, timeouts, 404s) carry CORS headers too.
///
/// - `OPTIONS` requests are answered here and never forwarded.
/// - Requests from a disallowed origin are served without CORS headers, with
///   their `Cookie` header removed and any `Set-Cookie` stripped, so no
///   session is attached to or leaked from them.
pub async fn enforce(
    State(policy): State<Arc<CorsPolicy>>,
    mut req: Request,
    next: Next,
) -> Response {
    let origin = req.headers().get(ORIGIN).cloned();

    if req.method() == Method::OPTIONS {
        debug!(origin = ?origin, path = %req.uri().path(), "answering preflight");
        return policy.preflight_response(origin.as_ref()).into_response();
    }

    let rejected = policy.check_origin(origin.as_ref()) == OriginCheck::Rejected;
    if rejected {
        debug!(origin = ?origin, "request from disallowed origin; session withheld");
        req.headers_mut().remove(COOKIE);
    }

    let mut response = next.run(req).await;
    if rejected {
        response.headers_mut().remove(SET_COOKIE);
    }
    policy.decorate(origin.as_ref(), response.headers_mut());
    response
}
