//! Configuration loading and validation for the gateway.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any required variable is missing or invalid.
//!
//! [`Config`] is the raw, validated view of the environment. [`Config::profile`]
//! derives the immutable [`EnvironmentProfile`] consumed by the session and CORS
//! policy resolvers.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::media::MediaCredentials;
use crate::session::keys::SigningKeys;

/// Milliseconds in one day; `COOKIE_TIME` is day-denominated.
pub const MILLIS_PER_DAY: u64 = 86_400_000;

/// Signing keys shorter than this are accepted but logged as weak.
const RECOMMENDED_KEY_LEN: usize = 32;

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The environment could not be read or a value could not be coerced
    /// (missing required field, non-numeric port, ...).
    #[error("failed to load configuration: {0}")]
    Source(#[from] config::ConfigError),

    /// A required value is present but empty.
    #[error("{0} is required and must not be empty")]
    Missing(&'static str),

    /// A value is present but violates a constraint.
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name,
            reason: reason.into(),
        }
    }
}

/// Validated gateway configuration.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Postgres connection string. **Required.**
    pub database_url: String,

    /// Media service account (cloud) name. **Required.**
    pub cloudinary_name: String,

    /// Media service API key. **Required.**
    pub cloudinary_api_key: String,

    /// Media service API secret. **Required.**
    pub cloudinary_api_secret: String,

    /// Comma-separated session signing keys, newest first. **Required.**
    pub session_secret: String,

    /// Session cookie lifetime in days; fractions are allowed. **Required.**
    pub cookie_time: f64,

    /// Allowed origin(s): a single URL, a comma-separated list, or `*`. **Required.**
    pub client_url: String,

    /// Deployment environment name (`production`, `development`, ...).
    #[serde(default = "default_app_env")]
    pub app_env: String,

    /// Cookie policy mode: `environment` or `always_secure`.
    #[serde(default = "default_cookie_policy")]
    pub cookie_policy: String,

    /// Name of the session cookie.
    #[serde(default = "default_session_cookie_name")]
    pub session_cookie_name: String,

    /// Whether credentials (cookies) may be shared with allowed origins.
    #[serde(default = "default_cors_allow_credentials")]
    pub cors_allow_credentials: bool,

    /// Extra request headers permitted cross-origin, comma-separated.
    #[serde(default)]
    pub cors_allowed_headers: String,

    /// How long (seconds) browsers may cache a preflight answer.
    #[serde(default)]
    pub cors_max_age_secs: Option<u64>,

    /// Address the HTTP listener binds to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the HTTP listener binds to.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted JSON body size in bytes.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,

    /// Maximum number of pooled database connections.
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// How long (seconds) to wait for a database connection.
    #[serde(default = "default_db_connect_timeout")]
    pub db_connect_timeout_secs: u64,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_app_env() -> String {
    "development".into()
}
fn default_cookie_policy() -> String {
    "environment".into()
}
fn default_session_cookie_name() -> String {
    "session".into()
}
fn default_cors_allow_credentials() -> bool {
    true
}
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}
fn default_body_limit() -> usize {
    100 * 1024
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_connect_timeout() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".into()
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Connection string and secrets are never printed.
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("cloudinary_name", &self.cloudinary_name)
            .field("cloudinary_api_key", &self.cloudinary_api_key)
            .field("cloudinary_api_secret", &"[REDACTED]")
            .field("session_secret", &"[REDACTED]")
            .field("cookie_time", &self.cookie_time)
            .field("client_url", &self.client_url)
            .field("app_env", &self.app_env)
            .field("cookie_policy", &self.cookie_policy)
            .field("session_cookie_name", &self.session_cookie_name)
            .field("cors_allow_credentials", &self.cors_allow_credentials)
            .field("cors_allowed_headers", &self.cors_allowed_headers)
            .field("cors_max_age_secs", &self.cors_max_age_secs)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("body_limit_bytes", &self.body_limit_bytes)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_connect_timeout_secs", &self.db_connect_timeout_secs)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(config::Environment::default())
    }

    /// Load and validate configuration from an explicit variable map instead of
    /// the process environment. Keys use the environment variable names.
    pub fn from_map(vars: config::Map<String, String>) -> Result<Self, ConfigError> {
        Self::load(config::Environment::default().source(Some(vars)))
    }

    fn load(source: config::Environment) -> Result<Self, ConfigError> {
        let cfg = config::Config::builder().add_source(source).build()?;
        let c: Config = cfg.try_deserialize()?;
        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<(), ConfigError> {
        ensure_non_empty(&self.database_url, "DATABASE_URL")?;
        ensure_non_empty(&self.cloudinary_name, "CLOUDINARY_NAME")?;
        ensure_non_empty(&self.cloudinary_api_key, "CLOUDINARY_API_KEY")?;
        ensure_non_empty(&self.cloudinary_api_secret, "CLOUDINARY_API_SECRET")?;
        ensure_non_empty(&self.session_secret, "SESSION_SECRET")?;
        ensure_non_empty(&self.client_url, "CLIENT_URL")?;

        days_to_millis(self.cookie_time)?;
        if self.body_limit_bytes == 0 {
            return Err(ConfigError::invalid("BODY_LIMIT_BYTES", "must be > 0"));
        }
        if self.db_max_connections == 0 {
            return Err(ConfigError::invalid("DB_MAX_CONNECTIONS", "must be > 0"));
        }
        if self.db_connect_timeout_secs == 0 {
            return Err(ConfigError::invalid("DB_CONNECT_TIMEOUT_SECS", "must be > 0"));
        }
        if !is_cookie_name(&self.session_cookie_name) {
            return Err(ConfigError::invalid(
                "SESSION_COOKIE_NAME",
                "must be a non-empty cookie token",
            ));
        }
        self.app_env.parse::<DeploymentEnvironment>()?;
        self.cookie_policy.parse::<CookiePolicyMode>()?;
        Ok(())
    }

    /// Derive the immutable [`EnvironmentProfile`] from this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the signing keys or allowed origins are unusable.
    pub fn profile(&self) -> Result<EnvironmentProfile, ConfigError> {
        let keys: Vec<String> = split_list(&self.session_secret)
            .into_iter()
            .map(str::to_owned)
            .collect();
        if keys.iter().any(|k| k.len() < RECOMMENDED_KEY_LEN) {
            warn!(
                recommended_len = RECOMMENDED_KEY_LEN,
                "SESSION_SECRET contains a short signing key"
            );
        }
        let session_secret_keys =
            SigningKeys::new(keys).map_err(|_| ConfigError::Missing("SESSION_SECRET"))?;

        let cookie_max_age_millis = days_to_millis(self.cookie_time)?;

        Ok(EnvironmentProfile {
            is_production: self.app_env.parse::<DeploymentEnvironment>()?
                == DeploymentEnvironment::Production,
            allowed_origins: AllowedOrigins::parse(&self.client_url)?,
            cookie_max_age_days: self.cookie_time,
            cookie_max_age_millis,
            session_secret_keys,
            port: self.port,
            cookie_policy: self.cookie_policy.parse()?,
            session_cookie_name: self.session_cookie_name.clone(),
            allow_credentials: self.cors_allow_credentials,
            extra_allowed_headers: split_list(&self.cors_allowed_headers)
                .into_iter()
                .map(str::to_owned)
                .collect(),
            cors_max_age_secs: self.cors_max_age_secs,
        })
    }

    /// Credentials handed to the media client at startup.
    pub fn media_credentials(&self) -> MediaCredentials {
        MediaCredentials {
            cloud_name: self.cloudinary_name.clone(),
            api_key: self.cloudinary_api_key.clone(),
            api_secret: self.cloudinary_api_secret.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Environment profile
// ---------------------------------------------------------------------------

/// Deployment environment flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentEnvironment {
    Production,
    Development,
}

impl FromStr for DeploymentEnvironment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" | "local" | "test" | "staging" => Ok(Self::Development),
            other => Err(ConfigError::invalid(
                "APP_ENV",
                format!("unknown environment {other:?}"),
            )),
        }
    }
}

/// Which session cookie policy table applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookiePolicyMode {
    /// Secure + `SameSite=None` in production, plain + `SameSite=Lax` elsewhere.
    Environment,
    /// Secure + `SameSite=None` regardless of environment (HTTPS everywhere).
    AlwaysSecure,
}

impl FromStr for CookiePolicyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "environment" => Ok(Self::Environment),
            "always_secure" => Ok(Self::AlwaysSecure),
            other => Err(ConfigError::invalid(
                "COOKIE_POLICY",
                format!("expected `environment` or `always_secure`, got {other:?}"),
            )),
        }
    }
}

/// Origins permitted to make cross-origin requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// `*`: any origin. Never valid together with credentials.
    Any,
    /// Explicit, normalised origins in configuration order.
    List(Vec<String>),
}

impl AllowedOrigins {
    /// Parse a single origin, a comma-separated list, or `*`.
    ///
    /// Each origin is normalised to `scheme://host[:port]`.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let items = split_list(raw);
        if items.is_empty() {
            return Err(ConfigError::Missing("CLIENT_URL"));
        }
        if items.contains(&"*") {
            if items.len() > 1 {
                return Err(ConfigError::invalid(
                    "CLIENT_URL",
                    "`*` cannot be combined with explicit origins",
                ));
            }
            return Ok(Self::Any);
        }

        let mut origins: Vec<String> = Vec::with_capacity(items.len());
        for item in items {
            let origin = normalise_origin(item)?;
            if !origins.contains(&origin) {
                origins.push(origin);
            }
        }
        Ok(Self::List(origins))
    }
}

/// Immutable, process-wide deployment parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentProfile {
    pub is_production: bool,
    pub allowed_origins: AllowedOrigins,
    pub cookie_max_age_days: f64,
    pub cookie_max_age_millis: u64,
    pub session_secret_keys: SigningKeys,
    pub port: u16,
    pub cookie_policy: CookiePolicyMode,
    pub session_cookie_name: String,
    pub allow_credentials: bool,
    pub extra_allowed_headers: Vec<String>,
    pub cors_max_age_secs: Option<u64>,
}

fn normalise_origin(raw: &str) -> Result<String, ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::invalid("CLIENT_URL", format!("{raw:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(
            "CLIENT_URL",
            format!("{raw:?}: scheme must be http or https"),
        ));
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(ConfigError::invalid(
            "CLIENT_URL",
            format!("{raw:?}: an origin must not carry a path, query or fragment"),
        ));
    }
    Ok(url.origin().ascii_serialization())
}

/// Convert a `COOKIE_TIME` day count to whole milliseconds.
///
/// The result must be at least one millisecond and fit an `i64`, which is
/// what the cookie `Max-Age` and expiry arithmetic use.
fn days_to_millis(days: f64) -> Result<u64, ConfigError> {
    if !days.is_finite() || days <= 0.0 {
        return Err(ConfigError::invalid("COOKIE_TIME", "must be a finite number of days > 0"));
    }
    let millis = (days * MILLIS_PER_DAY as f64).round();
    if millis < 1.0 {
        return Err(ConfigError::invalid("COOKIE_TIME", "lifetime rounds to zero milliseconds"));
    }
    if millis >= i64::MAX as f64 {
        return Err(ConfigError::invalid("COOKIE_TIME", "lifetime overflows milliseconds"));
    }
    Ok(millis as u64)
}

fn split_list(raw: &str) -> Vec<&str> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b))
}

fn ensure_non_empty(value: &str, name: &'static str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(name));
    }
    Ok(())
}
