//! [`SigningKeys`]: ordered HMAC-SHA256 key ring used to sign session cookies.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Errors produced when building a key ring.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// No usable key was supplied.
    #[error("at least one non-empty signing key is required")]
    Empty,
}

/// Priority-ordered signing keys.
///
/// The first key signs every new cookie. Verification tries each key in order,
/// so retired keys can stay in the ring until the cookies they signed expire.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKeys {
    keys: Vec<String>,
}

impl SigningKeys {
    /// Build a key ring from keys in priority order (newest first).
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Empty`] if `keys` is empty or contains an empty key.
    pub fn new(keys: Vec<String>) -> Result<Self, KeyError> {
        if keys.is_empty() || keys.iter().any(|k| k.is_empty()) {
            return Err(KeyError::Empty);
        }
        Ok(Self { keys })
    }

    /// The key used to sign new cookies.
    pub fn primary(&self) -> &str {
        &self.keys[0]
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    /// Sign `message` with the primary key; returns unpadded base64url.
    pub fn sign(&self, message: &[u8]) -> String {
        let tag = mac(self.primary(), message).finalize().into_bytes();
        URL_SAFE_NO_PAD.encode(tag)
    }

    /// Verify `signature` over `message` against every key in priority order.
    ///
    /// Returns the index of the first key that verifies, or `None`. Index `0`
    /// means the cookie is signed with the current primary key.
    pub fn verify(&self, message: &[u8], signature: &str) -> Option<usize> {
        let tag = URL_SAFE_NO_PAD.decode(signature).ok()?;
        self.keys
            .iter()
            .position(|key| mac(key, message).verify_slice(&tag).is_ok())
    }
}

impl fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material is never printed.
        write!(f, "SigningKeys([REDACTED; {}])", self.keys.len())
    }
}

fn mac(key: &str, message: &[u8]) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message);
    mac
}
