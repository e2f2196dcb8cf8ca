//! Session cookie value codec.
//!
//! ```text
//! <base64url-no-pad(json record)>.<base64url-no-pad(hmac-sha256("<name>=<payload>"))>
//! ```
//!
//! The record carries an absolute expiry so a cookie replayed after its
//! `Max-Age` has elapsed is rejected even if the browser kept it.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::keys::SigningKeys;

/// Why a cookie value was not accepted. Callers treat every variant as
/// "no session"; the distinction exists for logging.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("cookie value is not `<payload>.<signature>`")]
    Malformed,

    #[error("signature does not match any signing key")]
    BadSignature,

    #[error("session record could not be decoded")]
    InvalidPayload,

    #[error("session expired")]
    Expired,
}

#[derive(Serialize, Deserialize)]
struct Record {
    data: Map<String, Value>,
    /// Expiry as unix milliseconds.
    exp: i64,
}

/// A verified session cookie.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub data: Map<String, Value>,
    pub expires_at_ms: i64,
    /// Position of the verifying key in the ring; non-zero means a retired key.
    pub key_index: usize,
}

/// Encode and sign `data` for the cookie called `name`.
pub fn encode(
    name: &str,
    data: &Map<String, Value>,
    expires_at_ms: i64,
    keys: &SigningKeys,
) -> Result<String, serde_json::Error> {
    let record = serde_json::to_vec(&RecordRef {
        data,
        exp: expires_at_ms,
    })?;
    let payload = URL_SAFE_NO_PAD.encode(record);
    let signature = keys.sign(signed_message(name, &payload).as_bytes());
    Ok(format!("{payload}.{signature}"))
}

/// Verify and decode a cookie value read from the cookie called `name`.
///
/// # Errors
///
/// Returns a [`CodecError`] describing why the value was rejected.
pub fn decode(
    name: &str,
    value: &str,
    keys: &SigningKeys,
    now_ms: i64,
) -> Result<Decoded, CodecError> {
    let (payload, signature) = value.rsplit_once('.').ok_or(CodecError::Malformed)?;
    if payload.is_empty() || signature.is_empty() {
        return Err(CodecError::Malformed);
    }

    let key_index = keys
        .verify(signed_message(name, payload).as_bytes(), signature)
        .ok_or(CodecError::BadSignature)?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| CodecError::InvalidPayload)?;
    let record: Record =
        serde_json::from_slice(&bytes).map_err(|_| CodecError::InvalidPayload)?;

    if record.exp <= now_ms {
        return Err(CodecError::Expired);
    }

    Ok(Decoded {
        data: record.data,
        expires_at_ms: record.exp,
        key_index,
    })
}

#[derive(Serialize)]
struct RecordRef<'a> {
    data: &'a Map<String, Value>,
    exp: i64,
}

fn signed_message(name: &str, payload: &str) -> String {
    format!("{name}={payload}")
}
