//! Statements and helpers for the flat settings table.
//!
//! The table carries no primary key: keys may exceed index length limits,
//! so uniqueness is maintained by the synchronization logic. Case-insensitive
//! key identity is resolved by the caller; statements here match stored key
//! text exactly, so results never depend on the cluster's collation.
//!
//! Every applied batch also re-stamps the reserved [`SYNC_MARKER_KEY`] row,
//! so `max(last_update_dt)` advances even when a batch only deletes.

use crate::error::{DataError, Result};
use chrono::{DateTime, Utc};
use sqlx::{Connection, Executor, FromRow, PgConnection, Postgres};
use tracing::debug;

/// Maximum length of a single PostgreSQL identifier part.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Reserved key of the row stamped by every applied batch.
///
/// Hidden from [`fetch_all`]; its timestamp only feeds [`fetch_last_update`].
pub const SYNC_MARKER_KEY: &str = ":sync";

fn map_query_err(operation: &'static str) -> impl FnOnce(sqlx::Error) -> DataError {
    move |source| DataError::QueryFailed { operation, source }
}

/// One persisted `(key, value)` pair.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct SettingRow {
    /// Colon-delimited key, possibly ending in the secret sentinel.
    pub key: String,
    /// Stored value; secret values are kept protected.
    pub value: Option<String>,
}

/// A single row to insert or update, with its value already protected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    /// Key to write.
    pub key: String,
    /// Value to persist.
    pub value: Option<String>,
}

impl PendingWrite {
    /// Construct a pending write.
    #[must_use]
    pub fn new(key: impl Into<String>, value: Option<String>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Rows to apply in a single transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    /// Keys absent from the table.
    pub inserts: Vec<PendingWrite>,
    /// Keys whose stored value changed.
    pub updates: Vec<PendingWrite>,
    /// Keys no longer present in the incoming settings.
    pub deletes: Vec<String>,
}

impl WriteBatch {
    /// Whether the batch would touch no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Total number of statements the batch executes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }
}

/// SQL statements rendered for a specific settings table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStatements {
    table: String,
    create: String,
    select_all: String,
    insert: String,
    update: String,
    delete: String,
    last_update: String,
}

impl TableStatements {
    /// Render every statement for `table`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::InvalidTableName`] when `table` is not a plain,
    /// optionally schema-qualified identifier.
    pub fn new(table: &str) -> Result<Self> {
        validate_table_name(table)?;
        Ok(Self {
            table: table.to_string(),
            create: format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 key TEXT NOT NULL, \
                 value TEXT NULL, \
                 last_update_dt TIMESTAMPTZ NOT NULL)"
            ),
            select_all: format!(
                "SELECT key, value FROM {table} WHERE key <> '{SYNC_MARKER_KEY}'"
            ),
            insert: format!(
                "INSERT INTO {table} (key, value, last_update_dt) VALUES ($1, $2, $3)"
            ),
            update: format!(
                "UPDATE {table} SET value = $2, last_update_dt = $3 WHERE key = $1"
            ),
            delete: format!("DELETE FROM {table} WHERE key = $1"),
            last_update: format!("SELECT max(last_update_dt) FROM {table}"),
        })
    }

    /// Table the statements target.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Conditional `CREATE TABLE` statement.
    #[must_use]
    pub fn create(&self) -> &str {
        &self.create
    }

    /// Select over every settings row, excluding the sync marker.
    #[must_use]
    pub fn select_all(&self) -> &str {
        &self.select_all
    }

    /// Aggregate returning the newest `last_update_dt`.
    #[must_use]
    pub fn last_update(&self) -> &str {
        &self.last_update
    }
}

/// Validate a table name as `[schema.]table` with plain identifier parts.
///
/// # Errors
///
/// Returns [`DataError::InvalidTableName`] describing the first violation.
pub fn validate_table_name(table: &str) -> Result<()> {
    let invalid = |reason: &'static str| DataError::InvalidTableName {
        value: table.to_string(),
        reason,
    };

    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() > 2 {
        return Err(invalid("too many qualifiers"));
    }

    for part in parts {
        let mut chars = part.chars();
        let Some(first) = chars.next() else {
            return Err(invalid("empty identifier"));
        };
        if !(first.is_ascii_alphabetic() || first == '_') {
            return Err(invalid("identifier must start with a letter or underscore"));
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid("identifier contains invalid characters"));
        }
        if part.len() > MAX_IDENTIFIER_LEN {
            return Err(invalid("identifier exceeds 63 bytes"));
        }
    }
    Ok(())
}

/// Create the settings table if it does not exist.
///
/// Creation runs under a transaction-scoped advisory lock keyed on the table
/// name so that processes racing to create the same table serialise.
///
/// # Errors
///
/// Returns an error when the lock, the statement, or the commit fails.
pub async fn create_table(conn: &mut PgConnection, statements: &TableStatements) -> Result<()> {
    let mut tx = conn
        .begin()
        .await
        .map_err(map_query_err("settings.create_table.begin"))?;
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(statements.table())
        .execute(&mut *tx)
        .await
        .map_err(map_query_err("settings.create_table.lock"))?;
    sqlx::query(statements.create())
        .execute(&mut *tx)
        .await
        .map_err(map_query_err("settings.create_table"))?;
    tx.commit()
        .await
        .map_err(map_query_err("settings.create_table.commit"))?;
    debug!(table = statements.table(), "settings table ready");
    Ok(())
}

/// Load every settings row in the table.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn fetch_all<'e, E>(executor: E, statements: &TableStatements) -> Result<Vec<SettingRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, SettingRow>(statements.select_all())
        .fetch_all(executor)
        .await
        .map_err(map_query_err("settings.fetch_all"))
}

/// Fetch the newest `last_update_dt`, or `None` for an empty table.
///
/// # Errors
///
/// Returns an error if the aggregate query fails.
pub async fn fetch_last_update<'e, E>(
    executor: E,
    statements: &TableStatements,
) -> Result<Option<DateTime<Utc>>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar::<_, Option<DateTime<Utc>>>(statements.last_update())
        .fetch_one(executor)
        .await
        .map_err(map_query_err("settings.fetch_last_update"))
}

/// Insert a single row outside of a batch.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub async fn insert_row<'e, E>(
    executor: E,
    statements: &TableStatements,
    row: &PendingWrite,
    stamp: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(&statements.insert)
        .bind(&row.key)
        .bind(row.value.as_deref())
        .bind(stamp)
        .execute(executor)
        .await
        .map_err(map_query_err("settings.insert"))?;
    Ok(())
}

/// Apply `batch` on `conn` in insert, update, delete order with a shared
/// timestamp, then re-stamp the sync marker row.
///
/// Updates and deletes target stored key text exactly. The caller owns the
/// transaction; statements are cached per connection so each set reuses one
/// prepared statement.
///
/// # Errors
///
/// Returns the first statement failure; rows already written are left for
/// the caller's rollback.
pub async fn apply_writes(
    conn: &mut PgConnection,
    statements: &TableStatements,
    batch: &WriteBatch,
    stamp: DateTime<Utc>,
) -> Result<()> {
    for row in &batch.inserts {
        insert_row(&mut *conn, statements, row, stamp).await?;
    }

    for row in &batch.updates {
        sqlx::query(&statements.update)
            .bind(&row.key)
            .bind(row.value.as_deref())
            .bind(stamp)
            .execute(&mut *conn)
            .await
            .map_err(map_query_err("settings.update"))?;
    }

    for key in &batch.deletes {
        sqlx::query(&statements.delete)
            .bind(key)
            .execute(&mut *conn)
            .await
            .map_err(map_query_err("settings.delete"))?;
    }

    stamp_sync_marker(conn, statements, stamp).await
}

/// Replace every sync marker row with one carrying `stamp`.
async fn stamp_sync_marker(
    conn: &mut PgConnection,
    statements: &TableStatements,
    stamp: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(&statements.delete)
        .bind(SYNC_MARKER_KEY)
        .execute(&mut *conn)
        .await
        .map_err(map_query_err("settings.sync_marker.clear"))?;
    sqlx::query(&statements.insert)
        .bind(SYNC_MARKER_KEY)
        .bind(None::<String>)
        .bind(stamp)
        .execute(&mut *conn)
        .await
        .map_err(map_query_err("settings.sync_marker.stamp"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_target_configured_table() -> Result<()> {
        let statements = TableStatements::new("config.app_settings")?;
        assert_eq!(statements.table(), "config.app_settings");
        assert!(
            statements
                .create()
                .starts_with("CREATE TABLE IF NOT EXISTS config.app_settings (")
        );
        assert_eq!(
            statements.select_all(),
            "SELECT key, value FROM config.app_settings WHERE key <> ':sync'"
        );
        assert_eq!(
            statements.last_update(),
            "SELECT max(last_update_dt) FROM config.app_settings"
        );
        assert!(statements.update.ends_with("WHERE key = $1"));
        assert!(statements.delete.ends_with("WHERE key = $1"));
        assert!(!statements.select_all().contains("lower("));
        Ok(())
    }

    #[test]
    fn table_names_reject_injection() {
        for bad in [
            "",
            "settings; DROP TABLE x",
            "1settings",
            "a.b.c",
            "settings-table",
            "schema.",
            "\"quoted\"",
        ] {
            assert!(
                matches!(
                    validate_table_name(bad),
                    Err(DataError::InvalidTableName { .. })
                ),
                "expected {bad:?} to be rejected"
            );
        }
        assert!(validate_table_name(&"x".repeat(64)).is_err());
        assert!(validate_table_name("_settings").is_ok());
        assert!(validate_table_name("public.Settings2").is_ok());
    }

    #[test]
    fn write_batch_counts_statements() {
        let mut batch = WriteBatch::default();
        assert!(batch.is_empty());
        batch.inserts.push(PendingWrite::new("A", Some("1".into())));
        batch.updates.push(PendingWrite::new("B", None));
        batch.deletes.push("C".into());
        assert!(!batch.is_empty());
        assert_eq!(batch.len(), 3);
    }
}
