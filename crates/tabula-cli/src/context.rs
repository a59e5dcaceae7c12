//! Shared source construction and error types for the CLI.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use tabula_config::{AeadProtector, ConfigError, SettingsOptions, SettingsSource};

use crate::cli::{Cli, OutputFormat};

/// CLI-level error type to distinguish validation from operational failures.
#[derive(Debug)]
pub(crate) enum CliError {
    Validation(String),
    Failure(anyhow::Error),
}

/// Convenience alias for functions returning a `CliError`.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("cli error")
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::MissingSetting {
                name: "connection_string",
            } => Self::validation(
                "database URL is required (pass --database-url or set TABULA_DATABASE_URL)",
            ),
            ConfigError::MissingSetting { .. } | ConfigError::InvalidField { .. } => {
                Self::validation(err.to_string())
            }
            other => Self::failure(other),
        }
    }
}

/// Application context passed to command handlers.
pub(crate) struct AppContext {
    pub(crate) source: SettingsSource,
    pub(crate) output: OutputFormat,
}

impl AppContext {
    /// Build the settings source described by the global flags.
    pub(crate) fn from_cli(cli: &Cli) -> CliResult<Self> {
        let source = SettingsSource::new(build_options(cli)?)?;
        Ok(Self {
            source,
            output: cli.output,
        })
    }
}

pub(crate) fn build_options(cli: &Cli) -> CliResult<SettingsOptions> {
    let mut options = SettingsOptions::new()
        .table_name(cli.table.trim())
        .reload_on_change(cli.reload_on_change)
        .poll_interval(Duration::from_secs(cli.poll_interval_secs));
    if let Some(url) = &cli.database_url {
        options = options.connection_string(url.as_str());
    }
    if let Some(key) = cli.secret_key.as_deref().filter(|key| !key.trim().is_empty()) {
        options = options.protector(Arc::new(AeadProtector::from_base64_key(key)?));
    }
    options.validate()?;
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> anyhow::Result<Cli> {
        Ok(Cli::try_parse_from(
            ["tabula", "--database-url", "postgres://localhost/app"]
                .into_iter()
                .chain(args.iter().copied()),
        )?)
    }

    #[test]
    fn error_exit_codes_distinguish_validation_from_failure() {
        let validation = CliError::validation("bad input");
        assert_eq!(validation.exit_code(), 2);
        assert_eq!(validation.display_message(), "bad input");

        let failure = CliError::failure(anyhow::anyhow!("boom"));
        assert_eq!(failure.exit_code(), 3);
        assert_eq!(failure.display_message(), "boom");
    }

    #[test]
    fn config_errors_are_classified() {
        let missing = CliError::from(ConfigError::MissingSetting {
            name: "connection_string",
        });
        assert_eq!(missing.exit_code(), 2);
        assert!(missing.display_message().contains("--database-url"));

        let protection = CliError::from(ConfigError::Protection {
            operation: "unprotect",
            reason: "authentication failed",
        });
        assert_eq!(protection.exit_code(), 3);
    }

    #[test]
    fn options_follow_global_flags() -> anyhow::Result<()> {
        let parsed = cli(&["--table", "config.settings", "--poll-interval-secs", "9", "marker"])?;
        let options = build_options(&parsed).map_err(|err| anyhow::anyhow!(err.display_message()))?;
        assert_eq!(options.table(), "config.settings");
        assert_eq!(options.interval(), Duration::from_secs(9));
        Ok(())
    }

    #[test]
    fn invalid_secret_key_is_a_validation_error() -> anyhow::Result<()> {
        let parsed = cli(&["--secret-key", "not-a-key", "marker"])?;
        let err = build_options(&parsed)
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected invalid key to fail"))?;
        assert_eq!(err.exit_code(), 2);
        Ok(())
    }

    #[test]
    fn invalid_table_name_is_a_validation_error() -> anyhow::Result<()> {
        let parsed = cli(&["--table", "settings; drop", "marker"])?;
        let err = build_options(&parsed)
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected invalid table to fail"))?;
        assert_eq!(err.exit_code(), 2);
        Ok(())
    }
}
