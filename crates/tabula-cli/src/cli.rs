//! Command-line surface for inspecting and updating settings.

use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use tabula_config::defaults::{
    DEFAULT_TABLE_NAME, ENV_DATABASE_URL, ENV_POLL_INTERVAL_SECS, ENV_RELOAD_ON_CHANGE,
    ENV_SECRET_KEY, ENV_TABLE_NAME,
};
use tabula_telemetry::{LogFormat, LoggingConfig, init_logging};
use tracing::debug;

use crate::commands::settings::{handle_get, handle_load, handle_marker, handle_set};
use crate::commands::watch::handle_watch;
use crate::context::{AppContext, CliResult};

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Parses CLI arguments, executes the requested command, and returns the
/// process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        format: cli.log_format.unwrap_or_else(LogFormat::infer),
        ..LoggingConfig::default()
    };
    if let Err(err) = init_logging(&logging) {
        eprintln!("warning: {err}");
    }

    match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

async fn dispatch(cli: Cli) -> CliResult<()> {
    let ctx = AppContext::from_cli(&cli)?;
    debug!(
        command = command_label(&cli.command),
        table = ctx.source.table(),
        "dispatching command"
    );

    match cli.command {
        Command::Load(args) => handle_load(&ctx, args).await,
        Command::Marker => handle_marker(&ctx).await,
        Command::Get(args) => handle_get(&ctx, args).await,
        Command::Set(args) => handle_set(&ctx, args).await,
        Command::Watch(args) => handle_watch(&ctx, args).await,
    }
}

const fn command_label(command: &Command) -> &'static str {
    match command {
        Command::Load(_) => "load",
        Command::Marker => "marker",
        Command::Get(_) => "get",
        Command::Set(_) => "set",
        Command::Watch(_) => "watch",
    }
}

#[derive(Parser)]
#[command(
    name = "tabula",
    about = "Inspect and update settings stored in a PostgreSQL table"
)]
pub(crate) struct Cli {
    #[arg(long, global = true, env = ENV_DATABASE_URL, hide_env_values = true)]
    pub(crate) database_url: Option<String>,
    #[arg(
        long = "table",
        global = true,
        env = ENV_TABLE_NAME,
        default_value = DEFAULT_TABLE_NAME
    )]
    pub(crate) table: String,
    #[arg(long, global = true, env = ENV_SECRET_KEY, hide_env_values = true)]
    pub(crate) secret_key: Option<String>,
    #[arg(
        long,
        global = true,
        env = ENV_POLL_INTERVAL_SECS,
        default_value_t = DEFAULT_POLL_INTERVAL_SECS
    )]
    pub(crate) poll_interval_secs: u64,
    #[arg(
        long,
        global = true,
        env = ENV_RELOAD_ON_CHANGE,
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub(crate) reload_on_change: bool,
    #[arg(
        long = "output",
        alias = "format",
        global = true,
        value_enum,
        default_value_t = OutputFormat::Table,
        help = "Select output format for commands that render structured data"
    )]
    pub(crate) output: OutputFormat,
    #[arg(
        long,
        global = true,
        env = "TABULA_LOG_FORMAT",
        help = "Log output format: json, pretty, or text"
    )]
    pub(crate) log_format: Option<LogFormat>,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Print every stored row; secret values stay protected.
    Load(LoadArgs),
    /// Print the current freshness marker.
    Marker,
    /// Print one setting from a freshly loaded snapshot.
    Get(GetArgs),
    /// Synchronise a JSON value under a root key.
    Set(SetArgs),
    /// Print each snapshot reloaded after a change.
    Watch(WatchArgs),
}

#[derive(Args)]
pub(crate) struct LoadArgs {
    #[arg(long, help = "Only print keys under this root")]
    pub(crate) prefix: Option<String>,
}

#[derive(Args)]
pub(crate) struct GetArgs {
    #[arg(help = "Colon-delimited key, matched case-insensitively")]
    pub(crate) key: String,
}

#[derive(Args)]
pub(crate) struct SetArgs {
    #[arg(help = "Root key to replace")]
    pub(crate) name: String,
    #[arg(
        help = "JSON value to store",
        required_unless_present = "file",
        conflicts_with = "file"
    )]
    pub(crate) value: Option<String>,
    #[arg(long, help = "Read the JSON value from a file")]
    pub(crate) file: Option<PathBuf>,
    #[arg(
        long = "secret",
        value_name = "PATH",
        help = "Field path to store protected (repeatable, e.g. Database.Password)"
    )]
    pub(crate) secrets: Vec<String>,
    #[arg(long, conflicts_with = "secrets", help = "Store every value protected")]
    pub(crate) secret_all: bool,
}

#[derive(Args)]
pub(crate) struct WatchArgs {
    #[arg(long, help = "Exit after this many reloads")]
    pub(crate) count: Option<usize>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Table,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("tabula").chain(args.iter().copied()))
    }

    #[test]
    fn global_flags_apply_after_subcommand() -> Result<(), clap::Error> {
        let cli = parse(&[
            "get",
            "Account:Name",
            "--database-url",
            "postgres://localhost/app",
            "--table",
            "config.settings",
            "--output",
            "json",
        ])?;
        assert_eq!(cli.database_url.as_deref(), Some("postgres://localhost/app"));
        assert_eq!(cli.table, "config.settings");
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(cli.command, Command::Get(ref args) if args.key == "Account:Name"));
        Ok(())
    }

    #[test]
    fn set_accepts_inline_value_and_secret_paths() -> Result<(), clap::Error> {
        let cli = parse(&[
            "set",
            "Account",
            r#"{"Name":"demo","Password":"pw"}"#,
            "--secret",
            "Password",
            "--secret",
            "Database.Password",
        ])?;
        let Command::Set(args) = cli.command else {
            panic!("expected set command");
        };
        assert_eq!(args.name, "Account");
        assert!(args.value.is_some());
        assert_eq!(args.secrets, vec!["Password", "Database.Password"]);
        assert!(!args.secret_all);
        Ok(())
    }

    #[test]
    fn set_requires_exactly_one_value_source() {
        assert!(parse(&["set", "Account"]).is_err());
        assert!(parse(&["set", "Account", "1", "--file", "value.json"]).is_err());
        assert!(parse(&["set", "Account", "--file", "value.json"]).is_ok());
        assert!(parse(&["set", "Token", "\"x\"", "--secret-all", "--secret", "a"]).is_err());
    }

    #[test]
    fn reload_flag_accepts_boolish_values() -> Result<(), clap::Error> {
        let cli = parse(&["watch", "--reload-on-change", "off", "--count", "2"])?;
        assert!(!cli.reload_on_change);
        assert!(matches!(cli.command, Command::Watch(WatchArgs { count: Some(2) })));
        Ok(())
    }

    #[test]
    fn log_format_accepts_telemetry_names() -> Result<(), clap::Error> {
        let cli = parse(&["marker", "--log-format", "TEXT"])?;
        assert_eq!(cli.log_format, Some(LogFormat::Pretty));
        let cli = parse(&["--log-format", "json", "marker"])?;
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert!(parse(&["--log-format", "xml", "marker"]).is_err());
        Ok(())
    }

    #[test]
    fn command_labels_are_stable() -> Result<(), clap::Error> {
        assert_eq!(command_label(&parse(&["marker"])?.command), "marker");
        assert_eq!(command_label(&parse(&["load"])?.command), "load");
        Ok(())
    }
}
