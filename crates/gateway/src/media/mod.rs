//! Hosted media service integration.
//!
//! The client is configured once at startup. A configuration failure is not
//! fatal: the server runs without media features and [`AppState::media`]
//! answers `503` to handlers that need it.
//!
//! [`AppState::media`]: crate::server::state::AppState::media

pub mod client;

pub use client::{MediaClient, MediaCredentials, MediaError};
