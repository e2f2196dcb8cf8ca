//! Signed, client-held sessions.
//!
//! Session state lives entirely in one HMAC-signed cookie; nothing is stored
//! server-side.
//!
//! # Lifecycle
//!
//! 1. At startup [`SessionCookiePolicy::resolve`] fixes the cookie attributes
//!    (secure flag, same-site mode, lifetime, signing keys) from the
//!    [`EnvironmentProfile`](crate::config::EnvironmentProfile).
//! 2. Per request, [`middleware::attach`] verifies the cookie against every
//!    signing key and attaches a [`Session`] to the request. Verification
//!    failure means "no session", never an error.
//! 3. Handlers read and mutate the [`Session`] extractor.
//! 4. On the way out, modified sessions are re-signed with the primary key and
//!    destroyed sessions are expired on the client.
//!
//! # Security invariants
//!
//! - The cookie is always `HttpOnly`.
//! - `SameSite=None` is only ever issued together with `Secure`.
//! - Signing keys are never logged.

pub mod codec;
pub mod handle;
pub mod keys;
pub mod middleware;
pub mod policy;

pub use handle::Session;
pub use keys::SigningKeys;
pub use policy::SessionCookiePolicy;
