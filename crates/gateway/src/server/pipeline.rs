//! Ingress pipeline assembly.

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};

use super::{handlers, middleware, state::AppState};
use crate::{cors, session};

/// Collaborator that adds application routes to the router.
///
/// Implemented for any `Fn(Router<AppState>) -> Router<AppState>`.
pub trait RouteMounter {
    fn mount(&self, router: Router<AppState>) -> Router<AppState>;
}

impl<F> RouteMounter for F
where
    F: Fn(Router<AppState>) -> Router<AppState>,
{
    fn mount(&self, router: Router<AppState>) -> Router<AppState> {
        self(router)
    }
}

/// The fully assembled request pipeline, ready to serve.
#[derive(Clone)]
pub struct Pipeline {
    router: Router,
}

impl Pipeline {
    pub fn into_router(self) -> Router {
        self.router
    }
}

/// Build the ordered ingress pipeline around the mounted routes.
///
/// Outermost first:
///
/// 1. tracing and compression
/// 2. CORS enforcement (preflights are answered here)
/// 3. request timeout
/// 4. cookie extraction
/// 5. session attachment
/// 6. JSON body parsing
/// 7. mounted routes, `GET /health`, JSON 404 fallback
pub fn assemble(state: AppState, mount: impl RouteMounter) -> Pipeline {
    let routes = mount
        .mount(Router::new())
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found);

    // `Router::layer` wraps previously added layers: the last call is outermost.
    let router = routes
        .layer(from_fn_with_state(state.body_limit, middleware::parse_json_body))
        .layer(from_fn_with_state(
            state.session_policy.clone(),
            session::middleware::attach,
        ))
        .layer(from_fn(middleware::extract_cookies))
        .layer(TimeoutLayer::new(middleware::REQUEST_TIMEOUT))
        .layer(from_fn_with_state(
            state.cors_policy.clone(),
            cors::middleware::enforce,
        ))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Pipeline { router }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::extract::JsonBody;
    use crate::session::Session;
    use crate::test_support::{media_client, state};
    use axum::{
        body::{to_bytes, Body},
        http::{
            header::{
                ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_METHODS,
                ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE, COOKIE, ORIGIN, SET_COOKIE,
            },
            Request, StatusCode,
        },
        response::Response,
        routing::post,
    };
    use serde_json::Value;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use tower::ServiceExt;

    const ALLOWED: &str = "https://allowed.example";

    async fn login(session: Session, body: JsonBody) -> StatusCode {
        match body.0.get("user").and_then(Value::as_str) {
            Some(user) => {
                session.insert("user", user).unwrap();
                StatusCode::NO_CONTENT
            }
            None => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    async fn whoami(session: Session) -> String {
        session.get::<String>("user").unwrap_or_else(|| "anonymous".into())
    }

    fn app_with_counter(hits: Arc<AtomicUsize>) -> Router {
        let mount = move |router: Router<AppState>| {
            let hits = hits.clone();
            router
                .route("/login", post(login))
                .route("/whoami", get(whoami))
                .route(
                    "/x",
                    post(move || {
                        let hits = hits.clone();
                        async move {
                            hits.fetch_add(1, Ordering::SeqCst);
                            StatusCode::OK
                        }
                    }),
                )
        };
        assemble(state(Some(media_client())), mount).into_router()
    }

    fn app() -> Router {
        app_with_counter(Arc::new(AtomicUsize::new(0)))
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn session_pair(resp: &Response) -> String {
        let set_cookie = resp.headers()[SET_COOKIE].to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_owned()
    }

    #[tokio::test]
    async fn preflight_to_any_path_is_answered_without_reaching_routes() {
        let hits = Arc::new(AtomicUsize::new(0));
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/x")
            .header(ORIGIN, ALLOWED)
            .body(Body::empty())
            .unwrap();
        let resp = app_with_counter(hits.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], ALLOWED);
        assert_eq!(resp.headers()[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert!(resp.headers().contains_key(ACCESS_CONTROL_ALLOW_METHODS));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn preflight_to_unknown_path_is_answered() {
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/anything")
            .header(ORIGIN, ALLOWED)
            .body(Body::empty())
            .unwrap();
        let resp = app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], ALLOWED);
    }

    #[tokio::test]
    async fn malformed_json_is_rejected_with_cors_headers() {
        let hits = Arc::new(AtomicUsize::new(0));
        let req = Request::builder()
            .method("POST")
            .uri("/x")
            .header(ORIGIN, ALLOWED)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let resp = app_with_counter(hits.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(resp.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], ALLOWED);
        assert_eq!(body_json(resp).await["code"], "bad_request");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn not_found_carries_cors_headers() {
        let req = Request::builder()
            .uri("/missing")
            .header(ORIGIN, ALLOWED)
            .body(Body::empty())
            .unwrap();
        let resp = app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], ALLOWED);
        assert_eq!(body_json(resp).await["code"], "not_found");
    }

    #[tokio::test]
    async fn json_body_and_session_flow_through_to_routes() {
        let req = Request::builder()
            .method("POST")
            .uri("/login")
            .header(ORIGIN, ALLOWED)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"user":"ada"}"#))
            .unwrap();
        let resp = app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let cookie = session_pair(&resp);

        let req = Request::builder()
            .uri("/whoami")
            .header(ORIGIN, ALLOWED)
            .header(COOKIE, cookie)
            .body(Body::empty())
            .unwrap();
        let resp = app().oneshot(req).await.unwrap();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"ada");
    }

    #[tokio::test]
    async fn disallowed_origin_gets_no_cors_headers_and_no_session() {
        let login_req = Request::builder()
            .method("POST")
            .uri("/login")
            .header(ORIGIN, ALLOWED)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"user":"ada"}"#))
            .unwrap();
        let cookie = session_pair(&app().oneshot(login_req).await.unwrap());

        let req = Request::builder()
            .uri("/whoami")
            .header(ORIGIN, "https://evil.example")
            .header(COOKIE, cookie)
            .body(Body::empty())
            .unwrap();
        let resp = app().oneshot(req).await.unwrap();
        assert!(resp.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert!(resp.headers().get(SET_COOKIE).is_none());
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"anonymous");
    }

    #[tokio::test]
    async fn disallowed_origin_cannot_start_a_session() {
        let req = Request::builder()
            .method("POST")
            .uri("/login")
            .header(ORIGIN, "https://evil.example")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"user":"mallory"}"#))
            .unwrap();
        let resp = app().oneshot(req).await.unwrap();
        assert!(resp.headers().get(SET_COOKIE).is_none());
        assert!(resp.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn health_is_mounted() {
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }
}
