use std::fs;

use anyhow::Context;
use serde_json::Value;
use tabula_config::keys::in_scope;
use tabula_config::{SecretPolicy, SettingsWriter};

use crate::cli::{GetArgs, LoadArgs, SetArgs};
use crate::context::{AppContext, CliError, CliResult};
use crate::output::{render_entry, render_marker, render_outcome, render_rows};

pub(crate) async fn handle_load(ctx: &AppContext, args: LoadArgs) -> CliResult<()> {
    let mut rows = ctx.source.loader().load_all().await?;
    if let Some(prefix) = args.prefix.as_deref().filter(|p| !p.trim().is_empty()) {
        rows.retain(|key, _| in_scope(prefix, key));
    }
    println!("{}", render_rows(&rows, ctx.output)?);
    Ok(())
}

pub(crate) async fn handle_marker(ctx: &AppContext) -> CliResult<()> {
    let marker = ctx.source.loader().freshness_marker().await?;
    println!("{}", render_marker(marker.as_deref(), ctx.output)?);
    Ok(())
}

pub(crate) async fn handle_get(ctx: &AppContext, args: GetArgs) -> CliResult<()> {
    let snapshot = ctx.source.provider().load().await?;
    let entry = snapshot
        .entry(&args.key)
        .ok_or_else(|| CliError::validation(format!("setting `{}` not found", args.key)))?;
    println!("{}", render_entry(entry, ctx.output)?);
    Ok(())
}

pub(crate) async fn handle_set(ctx: &AppContext, args: SetArgs) -> CliResult<()> {
    let value = read_value(&args)?;
    let policy = secret_policy(&args);
    let outcome = ctx
        .source
        .repository()
        .update_settings(&args.name, Some(&value), &policy)
        .await?;
    println!("{}", render_outcome(&outcome, ctx.output)?);
    Ok(())
}

fn read_value(args: &SetArgs) -> CliResult<Value> {
    let payload = match (&args.value, &args.file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))
            .map_err(CliError::failure)?,
        (None, None) => return Err(CliError::validation("a JSON value or --file is required")),
    };
    parse_value(&payload)
}

fn parse_value(payload: &str) -> CliResult<Value> {
    serde_json::from_str(payload)
        .map_err(|err| CliError::validation(format!("value is not valid JSON: {err}")))
}

fn secret_policy(args: &SetArgs) -> SecretPolicy {
    if args.secret_all {
        SecretPolicy::entire_value()
    } else {
        SecretPolicy::fields(args.secrets.iter().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_args(value: Option<&str>, secrets: &[&str], secret_all: bool) -> SetArgs {
        SetArgs {
            name: "Account".into(),
            value: value.map(str::to_string),
            file: None,
            secrets: secrets.iter().map(|s| (*s).to_string()).collect(),
            secret_all,
        }
    }

    #[test]
    fn inline_value_is_parsed_as_json() -> CliResult<()> {
        let value = read_value(&set_args(Some(r#"{"Name":"demo"}"#), &[], false))?;
        assert_eq!(value["Name"], "demo");
        Ok(())
    }

    #[test]
    fn invalid_json_is_a_validation_error() {
        let err = parse_value("{not json").err();
        assert!(matches!(err, Some(CliError::Validation(ref msg)) if msg.contains("not valid JSON")));
    }

    #[test]
    fn missing_file_is_a_failure() {
        let mut args = set_args(None, &[], false);
        args.file = Some("/nonexistent/tabula/value.json".into());
        let err = read_value(&args).err();
        assert!(matches!(err, Some(CliError::Failure(_))));
    }

    #[test]
    fn policy_follows_flags() {
        let all = secret_policy(&set_args(Some("\"x\""), &[], true));
        assert_eq!(all, SecretPolicy::entire_value());

        let fields = secret_policy(&set_args(Some("{}"), &["Password"], false));
        assert_eq!(fields, SecretPolicy::fields(["Password"]));

        let none = secret_policy(&set_args(Some("{}"), &[], false));
        assert_eq!(none, SecretPolicy::none());
    }
}
