//! Common types, wire definitions, and errors shared across the gateway crates.

pub mod error;
pub mod protocol;

pub use error::ServiceError;
