//! Fatal startup errors.

use thiserror::Error;

use crate::config::ConfigError;

/// Reasons the bootstrap sequence aborts. All are fatal.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("database connection failed: {0}")]
    DatabaseConnection(#[source] sqlx::Error),

    #[error("failed to bind listener: {0}")]
    Listen(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_convert() {
        let err: BootstrapError = ConfigError::Missing("DATABASE_URL").into();
        assert!(matches!(err, BootstrapError::Configuration(_)));
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn database_error_is_displayed() {
        let err = BootstrapError::DatabaseConnection(sqlx::Error::PoolTimedOut);
        assert!(err.to_string().starts_with("database connection failed"));
    }
}
