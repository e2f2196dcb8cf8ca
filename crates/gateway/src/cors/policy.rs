//! Cross-origin policy resolution and preflight answers.

use std::collections::BTreeSet;
use std::time::Duration;

use axum::{
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
            ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE,
            AUTHORIZATION, CONTENT_TYPE, VARY,
        },
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
};

use crate::config::{AllowedOrigins, ConfigError, EnvironmentProfile};

/// Methods every policy permits.
pub const REQUIRED_METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
];

/// Request headers every policy permits.
pub const REQUIRED_HEADERS: [HeaderName; 2] = [CONTENT_TYPE, AUTHORIZATION];

/// Origins a [`CorsPolicy`] accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    /// Any origin (`*`). Only valid without credentials.
    Any,
    /// An explicit, finite set of normalised origins.
    Exact(BTreeSet<String>),
}

/// How a request's `Origin` header relates to the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginCheck {
    /// No `Origin` header: not a cross-origin browser request.
    Absent,
    Allowed,
    Rejected,
}

/// Resolved cross-origin policy, computed once and evaluated per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsPolicy {
    pub allowed_origins: CorsOrigins,
    pub allow_credentials: bool,
    pub allowed_methods: Vec<Method>,
    pub allowed_headers: Vec<HeaderName>,
    pub max_age: Option<Duration>,
}

/// Status and headers answering a preflight request.
#[derive(Debug, Clone)]
pub struct PreflightResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl IntoResponse for PreflightResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers).into_response()
    }
}

impl CorsPolicy {
    /// Derive the policy from the deployment profile.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a wildcard origin is combined with
    /// credentials (browsers refuse that combination) or when an extra allowed
    /// header is not a valid header name.
    pub fn resolve(profile: &EnvironmentProfile) -> Result<Self, ConfigError> {
        let allowed_origins = match &profile.allowed_origins {
            AllowedOrigins::Any if profile.allow_credentials => {
                return Err(ConfigError::Invalid {
                    name: "CLIENT_URL",
                    reason: "`*` cannot be used while CORS_ALLOW_CREDENTIALS is true; \
                             list the allowed origins explicitly"
                        .into(),
                });
            }
            AllowedOrigins::Any => CorsOrigins::Any,
            AllowedOrigins::List(origins) => CorsOrigins::Exact(origins.iter().cloned().collect()),
        };

        let mut allowed_headers = REQUIRED_HEADERS.to_vec();
        for raw in &profile.extra_allowed_headers {
            let name = HeaderName::from_bytes(raw.trim().as_bytes()).map_err(|_| {
                ConfigError::Invalid {
                    name: "CORS_ALLOWED_HEADERS",
                    reason: format!("{raw:?} is not a valid header name"),
                }
            })?;
            if !allowed_headers.contains(&name) {
                allowed_headers.push(name);
            }
        }

        Ok(Self {
            allowed_origins,
            allow_credentials: profile.allow_credentials,
            allowed_methods: REQUIRED_METHODS.to_vec(),
            allowed_headers,
            max_age: profile.cors_max_age_secs.map(Duration::from_secs),
        })
    }

    /// Classify the request's `Origin` header.
    pub fn check_origin(&self, origin: Option<&HeaderValue>) -> OriginCheck {
        let Some(origin) = origin else {
            return OriginCheck::Absent;
        };
        match &self.allowed_origins {
            CorsOrigins::Any => OriginCheck::Allowed,
            CorsOrigins::Exact(set) => match origin.to_str() {
                Ok(o) if set.contains(o) => OriginCheck::Allowed,
                _ => OriginCheck::Rejected,
            },
        }
    }

    /// Value for `Access-Control-Allow-Origin`, if the origin is allowed.
    fn allow_origin_value(&self, origin: Option<&HeaderValue>) -> Option<HeaderValue> {
        match (&self.allowed_origins, self.check_origin(origin)) {
            (CorsOrigins::Any, OriginCheck::Allowed) => Some(HeaderValue::from_static("*")),
            (CorsOrigins::Exact(_), OriginCheck::Allowed) => origin.cloned(),
            _ => None,
        }
    }

    /// Answer a preflight (`OPTIONS`) request.
    ///
    /// Always `200`; the `Access-Control-*` headers are present only when the
    /// origin is allowed.
    pub fn preflight_response(&self, request_origin: Option<&HeaderValue>) -> PreflightResponse {
        let mut headers = HeaderMap::new();
        if let Some(allow_origin) = self.allow_origin_value(request_origin) {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
            if self.allow_credentials {
                headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
            }
            headers.insert(ACCESS_CONTROL_ALLOW_METHODS, join(self.allowed_methods.iter().map(Method::as_str)));
            headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, join(self.allowed_headers.iter().map(HeaderName::as_str)));
            if let Some(max_age) = self.max_age {
                headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(max_age.as_secs()));
            }
        }
        self.append_vary(&mut headers);
        PreflightResponse {
            status: StatusCode::OK,
            headers,
        }
    }

    /// Add the non-preflight CORS headers to an outgoing response.
    pub fn decorate(&self, request_origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        if let Some(allow_origin) = self.allow_origin_value(request_origin) {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
            if self.allow_credentials {
                headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
            }
        }
        self.append_vary(headers);
    }

    /// Responses differ per origin for explicit policies; caches must key on it.
    fn append_vary(&self, headers: &mut HeaderMap) {
        if matches!(self.allowed_origins, CorsOrigins::Exact(_)) {
            headers.append(VARY, HeaderValue::from_static("Origin"));
        }
    }
}

fn join<'a>(items: impl Iterator<Item = &'a str>) -> HeaderValue {
    let joined = items.collect::<Vec<_>>().join(", ");
    // Method and header names are tokens, which are always valid header values.
    HeaderValue::from_str(&joined).unwrap_or_else(|_| HeaderValue::from_static(""))
}
