//! Database capability.
//!
//! Bootstrap depends on [`DatabaseConnector`] rather than on a concrete pool
//! builder so that connection failure can be exercised without a server.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use url::Url;

use crate::config::Config;

/// Establishes the application's connection pool.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    /// Connect and return a ready pool.
    async fn connect(&self) -> Result<PgPool, sqlx::Error>;
}

/// [`DatabaseConnector`] for Postgres built from [`Config`].
#[derive(Clone)]
pub struct PostgresConnector {
    url: String,
    max_connections: u32,
    acquire_timeout: Duration,
}

impl PostgresConnector {
    pub fn new(url: impl Into<String>, max_connections: u32, acquire_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            max_connections,
            acquire_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.database_url.clone(),
            config.db_max_connections,
            Duration::from_secs(config.db_connect_timeout_secs),
        )
    }

    /// Connection URL with any password masked, for logs.
    pub fn redacted_url(&self) -> String {
        match Url::parse(&self.url) {
            Ok(mut url) => {
                if url.password().is_some() {
                    let _ = url.set_password(Some("****"));
                }
                url.to_string()
            }
            Err(_) => "[unparseable]".into(),
        }
    }
}

impl fmt::Debug for PostgresConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConnector")
            .field("url", &self.redacted_url())
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

#[async_trait]
impl DatabaseConnector for PostgresConnector {
    async fn connect(&self) -> Result<PgPool, sqlx::Error> {
        info!(url = %self.redacted_url(), "connecting to database");
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(&self.url)
            .await?;
        info!(max_connections = self.max_connections, "database connected");
        Ok(pool)
    }
}
