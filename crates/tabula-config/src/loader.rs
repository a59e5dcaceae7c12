//! Bulk load and freshness polling over the settings table.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tabula_data::settings::{fetch_all, fetch_last_update};
use tracing::instrument;

use crate::error::{ConfigResult, map_db_err, map_sqlx_err};
use crate::source::SourceState;

/// Render a timestamp as a freshness marker.
///
/// RFC 3339 in UTC with fixed microsecond precision, so lexicographic order
/// equals chronological order.
#[must_use]
pub fn format_marker(stamp: DateTime<Utc>) -> String {
    stamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Read handle over the whole table.
///
/// Secret values are returned exactly as stored (protected).
#[derive(Clone)]
pub struct SettingsLoader {
    state: Arc<SourceState>,
}

impl SettingsLoader {
    pub(crate) const fn new(state: Arc<SourceState>) -> Self {
        Self { state }
    }

    /// Create the backing table if this source has not done so yet.
    ///
    /// # Errors
    ///
    /// Returns an error when a connection cannot be acquired or the table
    /// cannot be created; a later call retries.
    pub async fn ensure_ready(&self) -> ConfigResult<()> {
        self.state.ensure_ready().await
    }

    /// Every stored key mapped to its stored value; `None` for SQL `NULL`.
    ///
    /// # Errors
    ///
    /// Returns an error when initialisation or the select fails.
    #[instrument(name = "settings_loader.load_all", skip(self), fields(table = self.state.statements.table()))]
    pub async fn load_all(&self) -> ConfigResult<BTreeMap<String, Option<String>>> {
        self.ensure_ready().await?;
        let mut conn = self
            .state
            .pool
            .acquire()
            .await
            .map_err(map_sqlx_err("settings.load_all.acquire"))?;
        let rows = fetch_all(&mut *conn, &self.state.statements)
            .await
            .map_err(map_db_err("settings.load_all"))?;
        Ok(rows.into_iter().map(|row| (row.key, row.value)).collect())
    }

    /// Newest `last_update_dt` in the table, or `None` when it is empty.
    ///
    /// # Errors
    ///
    /// Returns an error when initialisation or the aggregate query fails.
    pub async fn last_update(&self) -> ConfigResult<Option<DateTime<Utc>>> {
        self.ensure_ready().await?;
        let mut conn = self
            .state
            .pool
            .acquire()
            .await
            .map_err(map_sqlx_err("settings.last_update.acquire"))?;
        fetch_last_update(&mut *conn, &self.state.statements)
            .await
            .map_err(map_db_err("settings.last_update"))
    }

    /// Opaque marker that changes whenever a synchronisation commits.
    ///
    /// # Errors
    ///
    /// See [`Self::last_update`].
    pub async fn freshness_marker(&self) -> ConfigResult<Option<String>> {
        Ok(self.last_update().await?.map(format_marker))
    }
}
