//! Session cookie policy resolution.

use cookie::time::Duration;
use cookie::{Cookie, SameSite};

use super::keys::SigningKeys;
use crate::config::{ConfigError, CookiePolicyMode, EnvironmentProfile};

/// Concrete attributes of the session cookie, derived once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookiePolicy {
    pub name: String,
    pub max_age_millis: u64,
    pub secure: bool,
    pub same_site: SameSite,
    /// Always `true`: the session cookie is never readable from page script.
    pub http_only: bool,
    pub signing_keys: SigningKeys,
}

impl SessionCookiePolicy {
    /// Derive the cookie policy from the deployment profile.
    ///
    /// | mode | environment | secure | same-site |
    /// |---|---|---|---|
    /// | `environment` | production | `true` | `None` |
    /// | `environment` | other | `false` | `Lax` |
    /// | `always_secure` | any | `true` | `None` |
    pub fn resolve(profile: &EnvironmentProfile) -> Self {
        let (secure, same_site) = match (profile.cookie_policy, profile.is_production) {
            (CookiePolicyMode::AlwaysSecure, _) | (CookiePolicyMode::Environment, true) => {
                (true, SameSite::None)
            }
            (CookiePolicyMode::Environment, false) => (false, SameSite::Lax),
        };

        Self {
            name: profile.session_cookie_name.clone(),
            max_age_millis: profile.cookie_max_age_millis,
            secure,
            same_site,
            http_only: true,
            signing_keys: profile.session_secret_keys.clone(),
        }
    }

    /// Check the browser constraints on the resolved attributes.
    ///
    /// # Errors
    ///
    /// Browsers drop `SameSite=None` cookies that are not `Secure`.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.same_site == SameSite::None && !self.secure {
            return Err(ConfigError::Invalid {
                name: "COOKIE_POLICY",
                reason: "SameSite=None requires a Secure cookie".into(),
            });
        }
        if !self.http_only {
            return Err(ConfigError::Invalid {
                name: "COOKIE_POLICY",
                reason: "session cookie must be HttpOnly".into(),
            });
        }
        Ok(())
    }

    /// Absolute expiry (unix millis) for a cookie issued at `now_ms`.
    pub fn expires_at_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_add(i64::try_from(self.max_age_millis).unwrap_or(i64::MAX))
    }

    /// Build the `Set-Cookie` cookie carrying `value`.
    pub fn cookie(&self, value: String) -> Cookie<'static> {
        let max_age = Duration::milliseconds(i64::try_from(self.max_age_millis).unwrap_or(i64::MAX));
        self.with_attributes(Cookie::build((self.name.clone(), value)).max_age(max_age))
    }

    /// Build a `Set-Cookie` cookie that makes the browser drop the session.
    pub fn removal_cookie(&self) -> Cookie<'static> {
        self.with_attributes(Cookie::build((self.name.clone(), String::new())).max_age(Duration::ZERO))
    }

    fn with_attributes(&self, builder: cookie::CookieBuilder<'static>) -> Cookie<'static> {
        builder
            .path("/")
            .secure(self.secure)
            .http_only(self.http_only)
            .same_site(self.same_site)
            .build()
    }
}
