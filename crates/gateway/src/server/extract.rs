//! Extractors exposing what the ingress stages attached to the request.

use std::collections::HashMap;
use std::convert::Infallible;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::COOKIE, request::Parts, HeaderMap},
};
use cookie::Cookie;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::ApiError;

/// Request cookies, name → decoded value.
///
/// When a name appears more than once the first occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookies(HashMap<String, String>);

impl Cookies {
    /// Parse every `Cookie` header on the request. Unparseable pairs are skipped.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut map = HashMap::new();
        for header in headers.get_all(COOKIE) {
            let Ok(raw) = header.to_str() else {
                continue;
            };
            for cookie in Cookie::split_parse_encoded(raw).flatten() {
                map.entry(cookie.name().to_owned())
                    .or_insert_with(|| cookie.value().to_owned());
            }
        }
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Cookies
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Cookies>()
            .cloned()
            .unwrap_or_else(|| Cookies::from_headers(&parts.headers)))
    }
}

/// The parsed JSON request body.
///
/// Present only for requests with a JSON content type and a non-empty body;
/// malformed bodies never reach a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonBody(pub Value);

impl JsonBody {
    pub fn into_inner(self) -> Value {
        self.0
    }

    /// Deserialize the body into a typed value.
    ///
    /// # Errors
    ///
    /// Returns a `400` error when the JSON does not have the expected shape.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_value(self.0.clone())
            .map_err(|e| ApiError::bad_request(format!("unexpected JSON body: {e}")))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for JsonBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<JsonBody>()
            .cloned()
            .ok_or_else(|| ApiError::bad_request("expected a JSON request body"))
    }
}
