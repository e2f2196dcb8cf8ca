//! Hosted media service client configuration and request signing.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// Base of the media service upload API. The cloud name is appended.
pub const API_BASE: &str = "https://api.cloudinary.com/v1_1/";

/// Parameters never included in the signature.
const UNSIGNED_PARAMS: [&str; 4] = ["file", "api_key", "resource_type", "signature"];

/// Errors raised while configuring the media client.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media credential {0} is empty")]
    MissingCredential(&'static str),

    #[error("media credential {name} is invalid: {reason}")]
    InvalidCredential { name: &'static str, reason: String },

    #[error("failed to build media endpoint URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Account credentials for the hosted media service.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaCredentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

impl fmt::Debug for MediaCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaCredentials")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// Configured media client, shared by route handlers through `AppState`.
#[derive(Clone)]
pub struct MediaClient {
    credentials: Arc<MediaCredentials>,
    base_url: Url,
}

impl fmt::Debug for MediaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaClient")
            .field("cloud_name", &self.credentials.cloud_name)
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl MediaClient {
    /// Validate `credentials` and build the client.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError`] if a credential is blank or malformed. No network
    /// call is made.
    pub fn configure(credentials: MediaCredentials) -> Result<Self, MediaError> {
        let cloud_name = credentials.cloud_name.trim();
        if cloud_name.is_empty() {
            return Err(MediaError::MissingCredential("CLOUDINARY_NAME"));
        }
        if !cloud_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(MediaError::InvalidCredential {
                name: "CLOUDINARY_NAME",
                reason: "only letters, digits, '-' and '_' are allowed".into(),
            });
        }
        if credentials.api_key.trim().is_empty() {
            return Err(MediaError::MissingCredential("CLOUDINARY_API_KEY"));
        }
        if credentials.api_key.chars().any(char::is_whitespace) {
            return Err(MediaError::InvalidCredential {
                name: "CLOUDINARY_API_KEY",
                reason: "must not contain whitespace".into(),
            });
        }
        if credentials.api_secret.trim().is_empty() {
            return Err(MediaError::MissingCredential("CLOUDINARY_API_SECRET"));
        }

        let base_url = Url::parse(API_BASE)?.join(&format!("{cloud_name}/"))?;
        let cloud_name = cloud_name.to_owned();
        Ok(Self {
            credentials: Arc::new(MediaCredentials {
                cloud_name,
                ..credentials
            }),
            base_url,
        })
    }

    pub fn cloud_name(&self) -> &str {
        &self.credentials.cloud_name
    }

    pub fn api_key(&self) -> &str {
        &self.credentials.api_key
    }

    /// Upload endpoint for `resource_type` (`image`, `video`, `raw`, `auto`).
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::Url`] if `resource_type` does not form a valid path.
    pub fn upload_url(&self, resource_type: &str) -> Result<Url, MediaError> {
        Ok(self.base_url.join(&format!("{resource_type}/upload"))?)
    }

    /// Signature over `params`: hex SHA-256 of the sorted `key=value` pairs
    /// joined with `&`, followed by the API secret.
    ///
    /// Empty values and transport parameters (`file`, `api_key`,
    /// `resource_type`, `signature`) are excluded.
    pub fn sign_params(&self, params: &BTreeMap<String, String>) -> String {
        let canonical = params
            .iter()
            .filter(|(k, v)| !v.is_empty() && !UNSIGNED_PARAMS.contains(&k.as_str()))
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hasher.update(self.credentials.api_secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Complete a signed upload form: adds `timestamp`, `api_key`,
    /// `signature_algorithm` and `signature` to `params`.
    pub fn signed_upload_params(
        &self,
        mut params: BTreeMap<String, String>,
        timestamp: i64,
    ) -> BTreeMap<String, String> {
        params.insert("timestamp".into(), timestamp.to_string());
        params.insert("signature_algorithm".into(), "sha256".into());
        let signature = self.sign_params(&params);
        params.insert("api_key".into(), self.credentials.api_key.clone());
        params.insert("signature".into(), signature);
        params
    }
}
