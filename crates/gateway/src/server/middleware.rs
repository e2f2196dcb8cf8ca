//! Axum middleware stages applied to the router.
//!
//! The CORS and session stages live with their policies in [`crate::cors`]
//! and [`crate::session`]; this module holds the transport-level stages:
//! cookie extraction and JSON body parsing.

use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header::CONTENT_LENGTH, header::CONTENT_TYPE, HeaderMap},
    middleware::Next,
    response::Response,
};
use common::ServiceError;
use serde_json::Value;
use tracing::debug;

use super::error::ApiError;
use super::extract::{Cookies, JsonBody};

/// Default per-request timeout applied to all routes.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum accepted size of a buffered JSON body.
#[derive(Debug, Clone, Copy)]
pub struct BodyLimit(pub usize);

/// Stage: parse the `Cookie` header(s) into a [`Cookies`] extension.
pub async fn extract_cookies(mut req: Request, next: Next) -> Response {
    let cookies = Cookies::from_headers(req.headers());
    req.extensions_mut().insert(cookies);
    next.run(req).await
}

/// Stage: buffer and parse JSON request bodies into a [`JsonBody`] extension.
///
/// Requests without a JSON content type, and empty bodies, pass through
/// untouched. The buffered bytes are put back so handlers may still use
/// `axum::Json<T>`.
pub async fn parse_json_body(
    State(BodyLimit(limit)): State<BodyLimit>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !is_json(req.headers()) {
        return Ok(next.run(req).await);
    }

    if declared_length(req.headers()).is_some_and(|len| len > limit) {
        return Err(too_large(limit));
    }

    let (mut parts, body) = req.into_parts();
    // A declared length within the limit means the read only fails if the
    // stream overruns it or breaks off; either way the body is unusable.
    let bytes = to_bytes(body, limit).await.map_err(|e| {
        debug!(error = %e, "failed to buffer JSON body");
        too_large(limit)
    })?;

    if !bytes.iter().all(u8::is_ascii_whitespace) {
        let value = parse_strict(&bytes)?;
        parts.extensions.insert(JsonBody(value));
    }

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}

/// Only objects and arrays are accepted at the top level.
fn parse_strict(bytes: &[u8]) -> Result<Value, ApiError> {
    let first = bytes.iter().find(|b| !b.is_ascii_whitespace());
    if !matches!(first, Some(b'{') | Some(b'[')) {
        return Err(ApiError::bad_request(
            "JSON body must be an object or an array",
        ));
    }
    serde_json::from_slice(bytes).map_err(|e| {
        debug!(error = %e, "rejecting malformed JSON body");
        ApiError::bad_request(format!("malformed JSON body: {e}"))
    })
}

fn is_json(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json"
        || (essence.starts_with("application/") && essence.ends_with("+json"))
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn too_large(limit: usize) -> ApiError {
    ServiceError::PayloadTooLarge(format!("request body exceeds {limit} bytes")).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{HeaderValue, StatusCode},
        middleware::{from_fn, from_fn_with_state},
        routing::post,
        Json, Router,
    };
    use serde_json::json;
    use tower::ServiceExt;

    async fn echo(body: Option<JsonBody>) -> Json<Value> {
        Json(body.map(JsonBody::into_inner).unwrap_or(Value::Null))
    }

    async fn count_cookies(cookies: Cookies) -> String {
        cookies.len().to_string()
    }

    fn json_app(limit: usize) -> Router {
        Router::new()
            .route("/x", post(echo))
            .layer(from_fn_with_state(BodyLimit(limit), parse_json_body))
    }

    fn post_json(body: &'static str) -> Request {
        Request::builder()
            .method("POST")
            .uri("/x")
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn valid_json_is_attached() {
        let resp = json_app(1024)
            .oneshot(post_json(r#"{"title":"Loft"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"title": "Loft"}));
    }

    #[tokio::test]
    async fn malformed_json_is_a_structured_bad_request() {
        let resp = json_app(1024).oneshot(post_json("{not json")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["code"], "bad_request");
    }

    #[tokio::test]
    async fn scalar_top_level_is_rejected() {
        let resp = json_app(1024).oneshot(post_json("42")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let resp = json_app(8)
            .oneshot(post_json(r#"{"title":"a much longer value"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body_json(resp).await["code"], "payload_too_large");
    }

    #[tokio::test]
    async fn empty_json_body_passes_through() {
        let resp = json_app(1024).oneshot(post_json("")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, Value::Null);
    }

    #[tokio::test]
    async fn non_json_content_is_not_parsed() {
        let req = Request::builder()
            .method("POST")
            .uri("/x")
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::from("{not json"))
            .unwrap();
        let resp = json_app(1024).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn json_content_types() {
        let mut headers = HeaderMap::new();
        for (value, expected) in [
            ("application/json", true),
            ("Application/JSON; charset=utf-8", true),
            ("application/vnd.api+json", true),
            ("text/json", false),
            ("multipart/form-data", false),
        ] {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(value));
            assert_eq!(is_json(&headers), expected, "{value}");
        }
    }

    #[tokio::test]
    async fn cookie_stage_attaches_cookies() {
        let app = Router::new()
            .route("/x", post(count_cookies))
            .layer(from_fn(extract_cookies));
        let req = Request::builder()
            .method("POST")
            .uri("/x")
            .header("cookie", "a=1; b=2")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"2");
    }
}
