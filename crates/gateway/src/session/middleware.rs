//! Session attachment stage.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::SET_COOKIE, HeaderValue},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use cookie::Cookie;
use tracing::{debug, warn};

use super::codec;
use super::handle::{Outcome, Session};
use super::policy::SessionCookiePolicy;
use crate::server::extract::Cookies;

/// Stage: restore the [`Session`] from its signed cookie, run the rest of the
/// pipeline, then write back whatever the handler left in it.
///
/// A missing, malformed, expired, or unverifiable cookie yields an empty new
/// session; the request itself never fails here.
pub async fn attach(
    State(policy): State<Arc<SessionCookiePolicy>>,
    mut req: Request,
    next: Next,
) -> Response {
    let now_ms = Utc::now().timestamp_millis();
    let session = restore(&policy, &req, now_ms);
    req.extensions_mut().insert(session.clone());

    let mut response = next.run(req).await;

    match session.outcome() {
        Outcome::Unchanged => {}
        Outcome::Write(data) => {
            match codec::encode(&policy.name, &data, policy.expires_at_ms(now_ms), &policy.signing_keys) {
                Ok(value) => append_set_cookie(&mut response, &policy.cookie(value)),
                Err(e) => warn!(error = %e, "failed to encode session; cookie left unchanged"),
            }
        }
        Outcome::Remove => append_set_cookie(&mut response, &policy.removal_cookie()),
    }
    response
}

fn restore(policy: &SessionCookiePolicy, req: &Request, now_ms: i64) -> Session {
    let parsed;
    let cookies = match req.extensions().get::<Cookies>() {
        Some(cookies) => cookies,
        None => {
            parsed = Cookies::from_headers(req.headers());
            &parsed
        }
    };

    let Some(value) = cookies.get(&policy.name) else {
        return Session::new();
    };

    match codec::decode(&policy.name, value, &policy.signing_keys, now_ms) {
        Ok(decoded) => {
            if decoded.key_index > 0 {
                debug!(key_index = decoded.key_index, "session signed with a retired key; re-signing");
            }
            Session::restored(decoded.data, decoded.key_index > 0)
        }
        Err(reason) => {
            debug!(%reason, "ignoring session cookie");
            Session::new()
        }
    }
}

fn append_set_cookie(response: &mut Response, cookie: &Cookie<'_>) {
    match HeaderValue::from_str(&cookie.encoded().to_string()) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(e) => warn!(error = %e, "session cookie is not a valid header value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CookiePolicyMode;
    use crate::session::keys::SigningKeys;
    use crate::test_support::profile;
    use axum::{
        body::{to_bytes, Body},
        http::{header::COOKIE, StatusCode},
        middleware::from_fn_with_state,
        routing::{get, post},
        Router,
    };
    use serde_json::{json, Map, Value};
    use tower::ServiceExt;

    const FAR_FUTURE: i64 = i64::MAX / 2;

    fn policy_with_keys(keys: &[&str]) -> Arc<SessionCookiePolicy> {
        let mut policy =
            SessionCookiePolicy::resolve(&profile(true, CookiePolicyMode::Environment));
        policy.signing_keys =
            SigningKeys::new(keys.iter().map(|k| k.to_string()).collect()).unwrap();
        Arc::new(policy)
    }

    async fn login(session: Session) -> StatusCode {
        session.insert("user_id", 42).unwrap();
        StatusCode::OK
    }

    async fn whoami(session: Session) -> String {
        session
            .get::<u64>("user_id")
            .map(|id| id.to_string())
            .unwrap_or_else(|| "anonymous".into())
    }

    async fn logout(session: Session) -> StatusCode {
        session.destroy();
        StatusCode::OK
    }

    fn app(policy: Arc<SessionCookiePolicy>) -> Router {
        Router::new()
            .route("/login", post(login))
            .route("/whoami", get(whoami))
            .route("/logout", post(logout))
            .layer(from_fn_with_state(policy, attach))
    }

    fn signed_cookie(name: &str, keys: &[&str], data: Value) -> String {
        let ring = SigningKeys::new(keys.iter().map(|k| k.to_string()).collect()).unwrap();
        let data: Map<String, Value> = data.as_object().cloned().unwrap();
        let value = codec::encode(name, &data, FAR_FUTURE, &ring).unwrap();
        format!("{name}={value}")
    }

    async fn body_text(resp: Response) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get_with_cookie(uri: &str, cookie: &str) -> Request {
        Request::builder()
            .uri(uri)
            .header(COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn writing_a_session_sets_a_signed_cookie() {
        let policy = policy_with_keys(&["k1"]);
        let req = Request::builder()
            .method("POST")
            .uri("/login")
            .body(Body::empty())
            .unwrap();
        let resp = app(policy.clone()).oneshot(req).await.unwrap();
        let set_cookie = resp.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(set_cookie.starts_with("session="));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("SameSite=None"));

        let pair = set_cookie.split(';').next().unwrap().to_owned();
        let resp = app(policy).oneshot(get_with_cookie("/whoami", &pair)).await.unwrap();
        assert_eq!(body_text(resp).await, "42");
    }

    #[tokio::test]
    async fn reading_without_changes_sets_no_cookie() {
        let cookie = signed_cookie("session", &["k1"], json!({"user_id": 7}));
        let resp = app(policy_with_keys(&["k1"]))
            .oneshot(get_with_cookie("/whoami", &cookie))
            .await
            .unwrap();
        assert!(resp.headers().get(SET_COOKIE).is_none());
        assert_eq!(body_text(resp).await, "7");
    }

    #[tokio::test]
    async fn cookie_signed_with_retired_key_verifies_and_is_resigned() {
        let cookie = signed_cookie("session", &["k1"], json!({"user_id": 7}));
        let policy = policy_with_keys(&["k2", "k1"]);
        let resp = app(policy.clone())
            .oneshot(get_with_cookie("/whoami", &cookie))
            .await
            .unwrap();
        let reissued = resp.headers().get(SET_COOKIE).unwrap().to_str().unwrap().to_owned();
        assert_eq!(body_text(resp).await, "7");

        let value = reissued
            .split(';')
            .next()
            .and_then(|pair| pair.strip_prefix("session="))
            .unwrap();
        let decoded = codec::decode("session", value, &policy.signing_keys, 0).unwrap();
        assert_eq!(decoded.key_index, 0);
    }

    #[tokio::test]
    async fn cookie_signed_with_unknown_key_yields_empty_session() {
        let cookie = signed_cookie("session", &["stranger"], json!({"user_id": 7}));
        let resp = app(policy_with_keys(&["k2", "k1"]))
            .oneshot(get_with_cookie("/whoami", &cookie))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "anonymous");
    }

    #[tokio::test]
    async fn garbage_cookie_yields_empty_session() {
        let resp = app(policy_with_keys(&["k1"]))
            .oneshot(get_with_cookie("/whoami", "session=bogus"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get(SET_COOKIE).is_none());
        assert_eq!(body_text(resp).await, "anonymous");
    }

    #[tokio::test]
    async fn destroying_a_session_expires_the_cookie() {
        let cookie = signed_cookie("session", &["k1"], json!({"user_id": 7}));
        let req = Request::builder()
            .method("POST")
            .uri("/logout")
            .header(COOKIE, cookie)
            .body(Body::empty())
            .unwrap();
        let resp = app(policy_with_keys(&["k1"])).oneshot(req).await.unwrap();
        let set_cookie = resp.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(set_cookie.starts_with("session=;"));
        assert!(set_cookie.contains("Max-Age=0"));
    }
}
