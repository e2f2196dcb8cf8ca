//! Axum ingress pipeline, shared state and built-in routes.
//!
//! # Responsibilities
//! - Compose the middleware stages into one ordered [`pipeline::Pipeline`].
//! - Expose the per-request extractors (`Cookies`, `JsonBody`) to handlers.
//! - Inject shared application state (`AppState`) into handlers.

pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod pipeline;
pub mod state;

pub use pipeline::{assemble, Pipeline, RouteMounter};
pub use state::AppState;
