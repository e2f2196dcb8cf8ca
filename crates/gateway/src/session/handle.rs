//! Request-scoped [`Session`] handle shared between the session stage and
//! route handlers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use common::ServiceError;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::server::error::ApiError;

/// Client-held session data attached to the current request.
///
/// Cloning is cheap; every clone refers to the same request-scoped state.
/// Handlers mutate it through [`Session::insert`], [`Session::remove`] and
/// [`Session::destroy`]; the session stage turns the final state into a
/// `Set-Cookie` header once the handler has returned.
#[derive(Clone, Debug, Default)]
pub struct Session {
    inner: Arc<Mutex<SessionState>>,
}

#[derive(Debug, Default)]
struct SessionState {
    data: Map<String, Value>,
    /// No valid cookie arrived with the request.
    is_new: bool,
    modified: bool,
    destroyed: bool,
    /// The cookie verified under a retired key and should be re-signed.
    reissue: bool,
}

/// What the session stage must do with the response cookie.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Unchanged,
    Write(Map<String, Value>),
    Remove,
}

impl Session {
    /// A fresh, empty session.
    pub fn new() -> Self {
        Self::with_state(SessionState {
            is_new: true,
            ..SessionState::default()
        })
    }

    /// A session restored from a verified cookie.
    pub(crate) fn restored(data: Map<String, Value>, reissue: bool) -> Self {
        Self::with_state(SessionState {
            data,
            reissue,
            ..SessionState::default()
        })
    }

    fn with_state(state: SessionState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Typed read of `key`. Returns `None` when absent or of another shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.state().data.get(key).cloned()?;
        serde_json::from_value(value).ok()
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.state().data.get(key).cloned()
    }

    /// Store `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be represented as JSON.
    pub fn insert<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: T,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        let mut state = self.state();
        state.data.insert(key.into(), value);
        state.modified = true;
        state.destroyed = false;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut state = self.state();
        let removed = state.data.remove(key);
        if removed.is_some() {
            state.modified = true;
        }
        removed
    }

    /// Drop all session data and expire the cookie on the client.
    pub fn destroy(&self) {
        let mut state = self.state();
        state.data.clear();
        state.destroyed = true;
        state.modified = true;
    }

    /// `true` when no valid session cookie arrived with the request.
    pub fn is_new(&self) -> bool {
        self.state().is_new
    }

    pub fn is_empty(&self) -> bool {
        self.state().data.is_empty()
    }

    pub(crate) fn outcome(&self) -> Outcome {
        let state = self.state();
        let had_cookie = !state.is_new;

        if state.destroyed || (state.modified && state.data.is_empty()) {
            return if had_cookie {
                Outcome::Remove
            } else {
                Outcome::Unchanged
            };
        }
        if (state.modified || state.reissue) && !state.data.is_empty() {
            return Outcome::Write(state.data.clone());
        }
        Outcome::Unchanged
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Session>().cloned().ok_or_else(|| {
            ApiError::from(ServiceError::Internal(
                "session stage is not installed".into(),
            ))
        })
    }
}
