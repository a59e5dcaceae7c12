//! Default values for settings sources.
//!
//! # Design
//! - Centralize defaults so options, environment parsing, and the CLI agree.

use std::time::Duration;

/// Table used when none is configured.
pub const DEFAULT_TABLE_NAME: &str = "app_settings";
/// Interval between freshness polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Upper bound on pooled connections.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;
/// Maximum time to wait for a pooled connection.
pub(crate) const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variable holding the connection string.
pub const ENV_DATABASE_URL: &str = "TABULA_DATABASE_URL";
/// Environment variable overriding the table name.
pub const ENV_TABLE_NAME: &str = "TABULA_TABLE_NAME";
/// Environment variable toggling reload-on-change.
pub const ENV_RELOAD_ON_CHANGE: &str = "TABULA_RELOAD_ON_CHANGE";
/// Environment variable overriding the poll interval, in seconds.
pub const ENV_POLL_INTERVAL_SECS: &str = "TABULA_POLL_INTERVAL_SECS";
/// Environment variable holding a base64 AES-256 key for secret values.
pub const ENV_SECRET_KEY: &str = "TABULA_SECRET_KEY";
