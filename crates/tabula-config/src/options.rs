//! Options recognised by a settings source.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::defaults::{
    DEFAULT_MAX_CONNECTIONS, DEFAULT_POLL_INTERVAL, DEFAULT_TABLE_NAME, ENV_DATABASE_URL,
    ENV_POLL_INTERVAL_SECS, ENV_RELOAD_ON_CHANGE, ENV_SECRET_KEY, ENV_TABLE_NAME,
};
use crate::error::{ConfigError, ConfigResult};
use crate::flatten::{Flattener, JsonFlattener};
use crate::protect::{AeadProtector, PassthroughProtector, SecretProtector};

/// Construction options for [`crate::SettingsSource`].
#[derive(Clone)]
pub struct SettingsOptions {
    pub(crate) connection_string: Option<String>,
    pub(crate) reload_on_change: bool,
    pub(crate) table_name: String,
    pub(crate) poll_interval: Duration,
    pub(crate) max_connections: u32,
    pub(crate) protector: Arc<dyn SecretProtector>,
    pub(crate) flattener: Arc<dyn Flattener>,
}

impl SettingsOptions {
    /// Options with defaults and no connection string.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connection_string: None,
            reload_on_change: true,
            table_name: DEFAULT_TABLE_NAME.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            protector: Arc::new(PassthroughProtector),
            flattener: Arc::new(JsonFlattener),
        }
    }

    /// Read options from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when a variable is present but
    /// cannot be parsed. A missing connection string is reported later by
    /// [`Self::validate`].
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read options through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::new();
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            options.connection_string = Some(url);
        }
        if let Some(table) = lookup(ENV_TABLE_NAME).filter(|value| !value.trim().is_empty()) {
            options.table_name = table.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_RELOAD_ON_CHANGE) {
            options.reload_on_change = parse_bool(&raw).ok_or(ConfigError::InvalidField {
                field: "reload_on_change",
                reason: "must be true or false",
                value: Some(raw),
            })?;
        }
        if let Some(raw) = lookup(ENV_POLL_INTERVAL_SECS) {
            let secs = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidField {
                    field: "poll_interval",
                    reason: "must be a whole number of seconds",
                    value: Some(raw.clone()),
                })?;
            options.poll_interval = Duration::from_secs(secs);
        }
        if let Some(key) = lookup(ENV_SECRET_KEY).filter(|value| !value.trim().is_empty()) {
            options.protector = Arc::new(AeadProtector::from_base64_key(&key)?);
        }
        Ok(options)
    }

    /// Set the connection string.
    #[must_use]
    pub fn connection_string(mut self, value: impl Into<String>) -> Self {
        self.connection_string = Some(value.into());
        self
    }

    /// Enable or disable reload-on-change.
    #[must_use]
    pub const fn reload_on_change(mut self, enabled: bool) -> Self {
        self.reload_on_change = enabled;
        self
    }

    /// Set the backing table, optionally schema-qualified.
    #[must_use]
    pub fn table_name(mut self, table: impl Into<String>) -> Self {
        self.table_name = table.into();
        self
    }

    /// Set the freshness poll interval.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the connection pool size.
    #[must_use]
    pub const fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Replace the secret protector.
    #[must_use]
    pub fn protector(mut self, protector: Arc<dyn SecretProtector>) -> Self {
        self.protector = protector;
        self
    }

    /// Replace the flattener.
    #[must_use]
    pub fn flattener(mut self, flattener: Arc<dyn Flattener>) -> Self {
        self.flattener = flattener;
        self
    }

    /// Whether reload-on-change is enabled.
    #[must_use]
    pub const fn reloads_on_change(&self) -> bool {
        self.reload_on_change
    }

    /// Configured table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table_name
    }

    /// Configured poll interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.poll_interval
    }

    /// Check the options without touching the database.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSetting`] for an absent or blank
    /// connection string and [`ConfigError::InvalidField`] for any other
    /// unusable value.
    pub fn validate(&self) -> ConfigResult<()> {
        if self
            .connection_string
            .as_deref()
            .is_none_or(|value| value.trim().is_empty())
        {
            return Err(ConfigError::MissingSetting {
                name: "connection_string",
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidField {
                field: "poll_interval",
                reason: "must be greater than zero",
                value: None,
            });
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidField {
                field: "max_connections",
                reason: "must be greater than zero",
                value: None,
            });
        }
        tabula_data::settings::validate_table_name(&self.table_name).map_err(|_| {
            ConfigError::InvalidField {
                field: "table_name",
                reason: "must be a plain [schema.]table identifier",
                value: Some(self.table_name.clone()),
            }
        })
    }
}

impl Default for SettingsOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SettingsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsOptions")
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "[REDACTED]"),
            )
            .field("reload_on_change", &self.reload_on_change)
            .field("table_name", &self.table_name)
            .field("poll_interval", &self.poll_interval)
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
