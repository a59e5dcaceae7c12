//! Minimal-diff synchronisation of a settings sub-tree into the table.
//!
//! # Design
//! - Flatten, read the scoped rows, diff on plaintext, then write in one
//!   transaction; an empty diff never opens a transaction.
//! - Scoping and key identity use [`normalize_key`](crate::keys::normalize_key)
//!   in Rust; SQL only ever matches exact stored key text.
//! - Every commit stamps a timestamp strictly after the stored maximum, so
//!   the freshness marker advances even for delete-only changes.
//! - Values are protected before the transaction begins so a protector
//!   failure leaves the table untouched.
//! - The change watcher fires only after a successful commit.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{Connection, PgConnection};
use tabula_data::settings::{apply_writes, fetch_all, fetch_last_update};
use tabula_data::{PendingWrite, SettingRow, WriteBatch};
use tracing::{debug, info, instrument, warn};

use crate::error::{ConfigError, ConfigResult, map_db_err, map_sqlx_err};
use crate::flatten::SecretPolicy;
use crate::keys::{KEY_DELIMITER, in_scope, is_secret_key};
use crate::loader::format_marker;
use crate::plan::DiffPlan;
use crate::protect::{protect_value, unprotect_value};
use crate::source::SourceState;
use crate::watch::ChangeWatcher;

/// Row counts and marker of a synchronisation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    /// Rows inserted.
    pub inserted: usize,
    /// Rows updated.
    pub updated: usize,
    /// Rows deleted.
    pub deleted: usize,
    /// Freshness marker of the commit; `None` when nothing was written.
    pub marker: Option<String>,
}

impl SyncOutcome {
    /// Whether the call wrote nothing.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

/// Persists a settings value under a root key.
#[async_trait]
pub trait SettingsWriter: Send + Sync {
    /// Replace the sub-tree rooted at `name` with `value`.
    ///
    /// A blank `name` or an absent `value` is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error when protection, the read, or the transaction fails;
    /// nothing is written in that case.
    async fn update_settings(
        &self,
        name: &str,
        value: Option<&Value>,
        policy: &SecretPolicy,
    ) -> ConfigResult<SyncOutcome>;
}

/// Write handle for one settings source.
#[derive(Clone)]
pub struct SettingsRepository {
    state: Arc<SourceState>,
    watcher: Arc<dyn ChangeWatcher>,
}

impl SettingsRepository {
    pub(crate) fn new(state: Arc<SourceState>) -> Self {
        let watcher: Arc<dyn ChangeWatcher> = Arc::new(state.notifier.clone());
        Self { state, watcher }
    }

    /// Notify `watcher` instead of the source's notifier.
    #[must_use]
    pub fn with_watcher(mut self, watcher: Arc<dyn ChangeWatcher>) -> Self {
        self.watcher = watcher;
        self
    }

    /// Serialise and synchronise `value` with no secret fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Serialization`] when `value` cannot be
    /// represented as JSON, otherwise see [`SettingsWriter::update_settings`].
    pub async fn synchronize<T>(&self, name: &str, value: Option<&T>) -> ConfigResult<SyncOutcome>
    where
        T: Serialize + Sync + ?Sized,
    {
        self.synchronize_with_secrets(name, value, &SecretPolicy::none())
            .await
    }

    /// Serialise and synchronise `value`, protecting the fields in `policy`.
    ///
    /// # Errors
    ///
    /// See [`Self::synchronize`].
    pub async fn synchronize_with_secrets<T>(
        &self,
        name: &str,
        value: Option<&T>,
        policy: &SecretPolicy,
    ) -> ConfigResult<SyncOutcome>
    where
        T: Serialize + Sync + ?Sized,
    {
        let Some(value) = value else {
            return self.update_settings(name, None, policy).await;
        };
        let value = serde_json::to_value(value).map_err(|source| ConfigError::Serialization {
            operation: "settings.sync.serialize",
            source,
        })?;
        self.update_settings(name, Some(&value), policy).await
    }

    /// Rows under `name` with secret values unprotected.
    ///
    /// Keys keep their stored text, including the secret sentinel.
    ///
    /// # Errors
    ///
    /// Returns an error when the read or unprotection fails.
    pub async fn get_scoped(&self, name: &str) -> ConfigResult<BTreeMap<String, Option<String>>> {
        self.state.ensure_ready().await?;
        let mut conn = self
            .state
            .pool
            .acquire()
            .await
            .map_err(map_sqlx_err("settings.get_scoped.acquire"))?;
        let rows = self.fetch_scoped(&mut conn, name).await?;
        self.unprotect_rows(rows).collect()
    }

    /// Stored rows under `name`, scoped with [`in_scope`].
    async fn fetch_scoped(
        &self,
        conn: &mut PgConnection,
        name: &str,
    ) -> ConfigResult<Vec<SettingRow>> {
        let mut rows = fetch_all(conn, &self.state.statements)
            .await
            .map_err(map_db_err("settings.fetch_scoped"))?;
        rows.retain(|row| in_scope(name, &row.key));
        Ok(rows)
    }

    fn unprotect_rows(
        &self,
        rows: Vec<SettingRow>,
    ) -> impl Iterator<Item = ConfigResult<(String, Option<String>)>> + '_ {
        rows.into_iter().map(|row| {
            let value = if is_secret_key(&row.key) {
                unprotect_value(self.state.protector.as_ref(), row.value.as_deref())?
            } else {
                row.value
            };
            Ok((row.key, value))
        })
    }

    fn build_batch(&self, plan: &DiffPlan) -> ConfigResult<WriteBatch> {
        let pending = |key: &String| -> ConfigResult<PendingWrite> {
            let value = plan.value_for(key);
            let stored = if is_secret_key(key) {
                protect_value(self.state.protector.as_ref(), value)?
            } else {
                value.map(str::to_string)
            };
            Ok(PendingWrite::new(key.clone(), stored))
        };

        Ok(WriteBatch {
            inserts: plan
                .to_insert()
                .iter()
                .map(pending)
                .collect::<ConfigResult<_>>()?,
            updates: plan
                .to_update()
                .iter()
                .map(pending)
                .collect::<ConfigResult<_>>()?,
            deletes: plan.to_delete().to_vec(),
        })
    }
}

#[async_trait]
impl SettingsWriter for SettingsRepository {
    #[instrument(
        name = "settings_repository.update_settings",
        skip(self, value, policy),
        fields(table = self.state.statements.table())
    )]
    async fn update_settings(
        &self,
        name: &str,
        value: Option<&Value>,
        policy: &SecretPolicy,
    ) -> ConfigResult<SyncOutcome> {
        let Some(value) = value.filter(|_| !name.trim().is_empty()) else {
            debug!("blank name or absent value; skipping synchronisation");
            return Ok(SyncOutcome::default());
        };

        if name.starts_with(KEY_DELIMITER) {
            return Err(ConfigError::InvalidField {
                field: "name",
                reason: "must not start with the key delimiter",
                value: Some(name.to_string()),
            });
        }

        self.state.ensure_ready().await?;
        let flat = self.state.flattener.flatten(value, name, policy);

        let mut conn = self
            .state
            .pool
            .acquire()
            .await
            .map_err(map_sqlx_err("settings.sync.acquire"))?;
        let rows = self.fetch_scoped(&mut conn, name).await?;
        let existing = self
            .unprotect_rows(rows)
            .collect::<ConfigResult<Vec<_>>>()?;

        let plan = DiffPlan::compute(existing, flat);
        if plan.is_empty() {
            debug!("settings unchanged; nothing to write");
            return Ok(SyncOutcome::default());
        }

        let batch = self.build_batch(&plan)?;

        let mut tx = conn
            .begin()
            .await
            .map_err(map_sqlx_err("settings.sync.begin"))?;
        let written = match fetch_last_update(&mut *tx, &self.state.statements).await {
            Ok(previous) => {
                let stamp = next_stamp(Utc::now(), previous);
                apply_writes(&mut tx, &self.state.statements, &batch, stamp)
                    .await
                    .map(|()| stamp)
            }
            Err(err) => Err(err),
        };
        let stamp = match written {
            Ok(stamp) => stamp,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = ?rollback_err, "rollback after failed synchronisation failed");
                }
                return Err(map_db_err("settings.sync.apply")(err));
            }
        };
        tx.commit()
            .await
            .map_err(map_sqlx_err("settings.sync.commit"))?;

        let marker = format_marker(stamp);
        self.watcher.notify_changed(&marker);

        let outcome = SyncOutcome {
            inserted: batch.inserts.len(),
            updated: batch.updates.len(),
            deleted: batch.deletes.len(),
            marker: Some(marker),
        };
        info!(
            inserted = outcome.inserted,
            updated = outcome.updated,
            deleted = outcome.deleted,
            marker = outcome.marker.as_deref(),
            "settings synchronised"
        );
        Ok(outcome)
    }
}

/// Microsecond-precision stamp strictly after `previous`.
///
/// Falls back to `previous + 1µs` when the clock has not moved past the
/// stored maximum, so consecutive commits always yield increasing markers.
fn next_stamp(now: DateTime<Utc>, previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = now.trunc_subsecs(6);
    match previous {
        Some(previous) if previous >= now => {
            previous.trunc_subsecs(6) + TimeDelta::microseconds(1)
        }
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stamps_move_strictly_forward() {
        let Some(now) = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single() else {
            panic!("valid timestamp");
        };
        let now = now + TimeDelta::nanoseconds(1_500);

        assert_eq!(next_stamp(now, None), now.trunc_subsecs(6));
        let earlier = now - TimeDelta::seconds(1);
        assert_eq!(next_stamp(now, Some(earlier)), now.trunc_subsecs(6));

        let same = now.trunc_subsecs(6);
        assert_eq!(next_stamp(now, Some(same)), same + TimeDelta::microseconds(1));

        let ahead = now + TimeDelta::seconds(1);
        let stamp = next_stamp(now, Some(ahead));
        assert!(stamp > ahead);
        assert_eq!(format_marker(stamp).len(), format_marker(ahead).len());
    }

    #[test]
    fn default_outcome_is_noop() {
        let outcome = SyncOutcome::default();
        assert!(outcome.is_noop());
        assert_eq!(outcome.marker, None);

        let written = SyncOutcome {
            deleted: 1,
            marker: Some("2024-01-01T00:00:00.000000Z".into()),
            ..SyncOutcome::default()
        };
        assert!(!written.is_noop());
    }
}
