//! Startup sequencing.
//!
//! Order is fixed:
//! 1. Resolve the environment profile, session and CORS policies (no I/O).
//! 2. Connect to the database. Failure aborts startup.
//! 3. Configure the media client. Failure degrades media features only.
//! 4. Assemble the ingress pipeline.
//! 5. Bind the listener and serve until shut down.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::cors::CorsPolicy;
use crate::db::DatabaseConnector;
use crate::error::BootstrapError;
use crate::media::MediaClient;
use crate::server::{middleware::BodyLimit, pipeline, AppState, RouteMounter};
use crate::session::SessionCookiePolicy;

/// A server that has completed startup and is accepting connections.
pub struct RunningServer {
    local_addr: SocketAddr,
    media_ready: bool,
    shutdown: CancellationToken,
    task: JoinHandle<io::Result<()>>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the media client configured successfully.
    pub fn media_ready(&self) -> bool {
        self.media_ready
    }

    /// Stop accepting connections, drain in-flight requests and wait for the
    /// server task to finish.
    pub async fn shutdown(self) -> io::Result<()> {
        self.shutdown.cancel();
        join(self.task).await
    }

    /// Serve until Ctrl-C or SIGTERM, then shut down gracefully.
    pub async fn run_until_signal(self) -> io::Result<()> {
        let Self {
            shutdown, mut task, ..
        } = self;
        tokio::select! {
            _ = shutdown_signal() => {}
            result = &mut task => return flatten(result),
        }
        info!("shutting down gracefully");
        shutdown.cancel();
        join(task).await
    }
}

/// Run the startup sequence and start serving.
///
/// # Errors
///
/// - [`BootstrapError::Configuration`] before any I/O when the profile or a
///   policy cannot be resolved.
/// - [`BootstrapError::DatabaseConnection`] when `connector` fails.
/// - [`BootstrapError::Listen`] when the address cannot be bound.
pub async fn start(
    config: &Config,
    connector: &dyn DatabaseConnector,
    mount: impl RouteMounter,
) -> Result<RunningServer, BootstrapError> {
    // -----------------------------------------------------------------------
    // 1. Policies
    // -----------------------------------------------------------------------
    let profile = config.profile()?;
    let session_policy = SessionCookiePolicy::resolve(&profile);
    session_policy.check()?;
    let cors_policy = CorsPolicy::resolve(&profile)?;
    info!(
        production = profile.is_production,
        cookie_policy = ?profile.cookie_policy,
        secure = session_policy.secure,
        same_site = ?session_policy.same_site,
        signing_keys = session_policy.signing_keys.len(),
        allow_credentials = cors_policy.allow_credentials,
        "policies resolved"
    );

    // -----------------------------------------------------------------------
    // 2. Database
    // -----------------------------------------------------------------------
    let db = connector
        .connect()
        .await
        .map_err(BootstrapError::DatabaseConnection)?;

    // -----------------------------------------------------------------------
    // 3. Media client
    // -----------------------------------------------------------------------
    let media = match MediaClient::configure(config.media_credentials()) {
        Ok(client) => {
            info!(cloud_name = client.cloud_name(), "media client configured");
            Some(client)
        }
        Err(e) => {
            warn!(error = %e, "media client unavailable; continuing without media features");
            None
        }
    };
    let media_ready = media.is_some();

    // -----------------------------------------------------------------------
    // 4. Pipeline
    // -----------------------------------------------------------------------
    let state = AppState::new(
        db,
        media,
        Arc::new(session_policy),
        Arc::new(cors_policy),
        BodyLimit(config.body_limit_bytes),
    );
    let router = pipeline::assemble(state, mount).into_router();

    // -----------------------------------------------------------------------
    // 5. Listener
    // -----------------------------------------------------------------------
    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(BootstrapError::Listen)?;
    let local_addr = listener.local_addr().map_err(BootstrapError::Listen)?;
    info!(addr = %local_addr, "listening");

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let task = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
    });

    Ok(RunningServer {
        local_addr,
        media_ready,
        shutdown,
        task,
    })
}

async fn join(task: JoinHandle<io::Result<()>>) -> io::Result<()> {
    flatten(task.await)
}

fn flatten(result: Result<io::Result<()>, tokio::task::JoinError>) -> io::Result<()> {
    result.map_err(io::Error::other)?
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
