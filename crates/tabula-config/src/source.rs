//! Entry point tying options, pool, and shared state together.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tabula_data::TableStatements;
use tabula_data::settings::create_table;
use tracing::{debug, instrument};

use crate::defaults::ACQUIRE_TIMEOUT;
use crate::error::{ConfigError, ConfigResult, map_db_err, map_sqlx_err};
use crate::flatten::Flattener;
use crate::init::{InitGuard, InitState};
use crate::loader::SettingsLoader;
use crate::options::SettingsOptions;
use crate::protect::SecretProtector;
use crate::provider::SettingsProvider;
use crate::repository::SettingsRepository;
use crate::watch::ChangeNotifier;

/// State shared by every handle created from one source.
pub(crate) struct SourceState {
    pub(crate) pool: PgPool,
    pub(crate) statements: TableStatements,
    pub(crate) init: InitGuard,
    pub(crate) protector: Arc<dyn SecretProtector>,
    pub(crate) flattener: Arc<dyn Flattener>,
    pub(crate) notifier: ChangeNotifier,
}

impl SourceState {
    /// Create the backing table once for this source.
    pub(crate) async fn ensure_ready(&self) -> ConfigResult<()> {
        self.init
            .ensure(|| async {
                let mut conn = self
                    .pool
                    .acquire()
                    .await
                    .map_err(map_sqlx_err("settings.init.acquire"))?;
                create_table(&mut conn, &self.statements)
                    .await
                    .map_err(map_db_err("settings.init.create_table"))?;
                debug!(table = self.statements.table(), "settings source initialised");
                Ok::<(), ConfigError>(())
            })
            .await
    }
}

/// A configured settings table and the handles that operate on it.
///
/// Constructing a source performs no I/O; the pool connects on first use
/// and the table is created by whichever handle runs first.
#[derive(Clone)]
pub struct SettingsSource {
    state: Arc<SourceState>,
    reload_on_change: bool,
    poll_interval: Duration,
}

impl SettingsSource {
    /// Build a source from validated options.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSetting`] when no connection string is
    /// configured, [`ConfigError::InvalidField`] for other invalid options,
    /// and [`ConfigError::Database`] when the connection string cannot be
    /// parsed.
    #[instrument(name = "settings_source.new", skip(options), fields(table = options.table()))]
    pub fn new(options: SettingsOptions) -> ConfigResult<Self> {
        options.validate()?;
        let connection_string =
            options
                .connection_string
                .as_deref()
                .ok_or(ConfigError::MissingSetting {
                    name: "connection_string",
                })?;

        let statements =
            TableStatements::new(&options.table_name).map_err(map_db_err("settings.statements"))?;
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy(connection_string)
            .map_err(map_sqlx_err("settings.connect"))?;

        Ok(Self {
            state: Arc::new(SourceState {
                pool,
                statements,
                init: InitGuard::new(),
                protector: options.protector,
                flattener: options.flattener,
                notifier: ChangeNotifier::new(),
            }),
            reload_on_change: options.reload_on_change,
            poll_interval: options.poll_interval,
        })
    }

    /// Build a source from `TABULA_*` environment variables.
    ///
    /// # Errors
    ///
    /// See [`SettingsOptions::from_env`] and [`Self::new`].
    pub fn from_env() -> ConfigResult<Self> {
        Self::new(SettingsOptions::from_env()?)
    }

    /// Read path over the whole table.
    #[must_use]
    pub fn loader(&self) -> SettingsLoader {
        SettingsLoader::new(Arc::clone(&self.state))
    }

    /// Write path notifying this source's [`ChangeNotifier`].
    #[must_use]
    pub fn repository(&self) -> SettingsRepository {
        SettingsRepository::new(Arc::clone(&self.state))
    }

    /// Consumer snapshot holder with reload support.
    #[must_use]
    pub fn provider(&self) -> SettingsProvider {
        SettingsProvider::new(
            self.loader(),
            Arc::clone(&self.state.protector),
            self.reload_on_change.then(|| self.state.notifier.subscribe()),
            self.poll_interval,
        )
    }

    /// Notifier fired after every committed synchronisation.
    #[must_use]
    pub fn notifier(&self) -> &ChangeNotifier {
        &self.state.notifier
    }

    /// Whether providers reload when the table changes.
    #[must_use]
    pub const fn reload_on_change(&self) -> bool {
        self.reload_on_change
    }

    /// Interval between freshness polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Table backing this source.
    #[must_use]
    pub fn table(&self) -> &str {
        self.state.statements.table()
    }

    /// Current one-time initialisation state.
    #[must_use]
    pub fn init_state(&self) -> InitState {
        self.state.init.state()
    }

    /// Underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.state.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_connection_string_fails_before_io() {
        let result = SettingsSource::new(SettingsOptions::new());
        assert!(matches!(
            result,
            Err(ConfigError::MissingSetting {
                name: "connection_string"
            })
        ));
    }

    #[tokio::test]
    async fn construction_is_lazy() -> ConfigResult<()> {
        let source = SettingsSource::new(
            SettingsOptions::new()
                .connection_string("postgres://tabula@127.0.0.1:1/unreachable")
                .table_name("config.app_settings")
                .reload_on_change(false),
        )?;
        assert_eq!(source.table(), "config.app_settings");
        assert!(!source.reload_on_change());
        assert_eq!(source.init_state(), InitState::Uninitialized);
        assert_eq!(source.notifier().current(), None);
        Ok(())
    }
}
