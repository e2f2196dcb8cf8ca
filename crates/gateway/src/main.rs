//! `gateway` binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise structured logging.
//! 3. Run the bootstrap sequence (policies, database, media, pipeline, listen).
//! 4. Serve until Ctrl-C / SIGTERM.

use anyhow::Result;
use tracing::{error, info};

use gateway::{config::Config, db::PostgresConnector, server::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Logging is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    gateway::telemetry::init_telemetry(&cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = cfg.port,
        "gateway starting"
    );

    // -----------------------------------------------------------------------
    // 3. Bootstrap
    // -----------------------------------------------------------------------
    let connector = PostgresConnector::from_config(&cfg);
    let server = gateway::start(&cfg, &connector, |router: axum::Router<AppState>| router)
        .await
        .map_err(|e| {
            error!(error = %e, "startup failed");
            e
        })?;

    // -----------------------------------------------------------------------
    // 4. Serve
    // -----------------------------------------------------------------------
    server.run_until_signal().await?;
    info!("gateway stopped");
    Ok(())
}
