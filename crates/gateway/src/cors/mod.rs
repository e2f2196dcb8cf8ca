//! Cross-origin resource sharing.
//!
//! [`CorsPolicy::resolve`] turns the configured origins into an explicit
//! policy at startup (rejecting a wildcard combined with credentials), and
//! [`middleware::enforce`] applies it to every request.

pub mod middleware;
pub mod policy;

pub use policy::{CorsOrigins, CorsPolicy, OriginCheck, PreflightResponse};
