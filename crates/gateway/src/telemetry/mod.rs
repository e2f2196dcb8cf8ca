//! Structured logging.
//!
//! # Telemetry invariants
//!
//! - **No secrets** (signing keys, media API secret, database password) may
//!   appear in any log field. Types holding them implement a redacting `Debug`.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`), overridden
//!   by `RUST_LOG`.

pub mod init;

pub use init::init_telemetry;
