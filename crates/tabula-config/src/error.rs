//! Error types for settings synchronization and loading.

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting was not supplied.
    #[error("missing required setting `{name}`")]
    MissingSetting {
        /// Name of the missing setting.
        name: &'static str,
    },
    /// A setting contained an invalid value.
    #[error("invalid value for setting `{field}`: {reason}")]
    InvalidField {
        /// Setting that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Underlying database operation failed.
    #[error("database operation failed")]
    Database {
        /// Operation identifier.
        operation: &'static str,
        /// Source database error.
        source: sqlx::Error,
    },
    /// Data layer operation failed.
    #[error("data access failed")]
    DataAccess {
        /// Operation identifier.
        operation: &'static str,
        /// Source data-layer error.
        source: tabula_data::DataError,
    },
    /// Protecting or unprotecting a secret value failed.
    #[error("secret protection failed")]
    Protection {
        /// Operation identifier.
        operation: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// Converting a settings value to its flat form failed.
    #[error("settings serialization failed")]
    Serialization {
        /// Operation identifier.
        operation: &'static str,
        /// Source serialization error.
        source: serde_json::Error,
    },
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

pub(crate) fn map_db_err(
    operation: &'static str,
) -> impl FnOnce(tabula_data::DataError) -> ConfigError {
    move |source| ConfigError::DataAccess { operation, source }
}

pub(crate) fn map_sqlx_err(operation: &'static str) -> impl FnOnce(sqlx::Error) -> ConfigError {
    move |source| ConfigError::Database { operation, source }
}
