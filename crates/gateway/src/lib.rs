//! Session and cross-origin ingress gateway.
//!
//! Resolves deployment configuration into session-cookie and CORS policies,
//! assembles the ordered request pipeline around application routes, and
//! sequences startup (database, media client, listener).

pub mod bootstrap;
pub mod config;
pub mod cors;
pub mod db;
pub mod error;
pub mod media;
pub mod server;
pub mod session;
pub mod telemetry;

pub use bootstrap::{start, RunningServer};
pub use config::{Config, ConfigError, EnvironmentProfile};
pub use error::BootstrapError;
