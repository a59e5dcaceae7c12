//! Output renderers and formatting helpers for CLI commands.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use anyhow::anyhow;
use serde::Serialize;
use serde_json::json;
use tabula_config::{SettingsSnapshot, SnapshotEntry, SyncOutcome};

use crate::cli::OutputFormat;
use crate::context::{CliError, CliResult};

const NULL_PLACEHOLDER: &str = "<null>";
const SECRET_PLACEHOLDER: &str = "<secret>";

pub(crate) fn render_rows(
    rows: &BTreeMap<String, Option<String>>,
    format: OutputFormat,
) -> CliResult<String> {
    match format {
        OutputFormat::Json => to_json(rows),
        OutputFormat::Table => {
            let width = rows.keys().map(String::len).max().unwrap_or(3).max(3);
            let mut text = format!("{:<width$} VALUE\n", "KEY");
            for (key, value) in rows {
                let _ = writeln!(
                    text,
                    "{key:<width$} {}",
                    value.as_deref().unwrap_or(NULL_PLACEHOLDER)
                );
            }
            let _ = write!(text, "{} row(s)", rows.len());
            Ok(text)
        }
    }
}

pub(crate) fn render_marker(marker: Option<&str>, format: OutputFormat) -> CliResult<String> {
    match format {
        OutputFormat::Json => to_json(&json!({ "marker": marker })),
        OutputFormat::Table => Ok(marker.unwrap_or("<empty table>").to_string()),
    }
}

pub(crate) fn render_entry(entry: &SnapshotEntry, format: OutputFormat) -> CliResult<String> {
    match format {
        OutputFormat::Json => to_json(entry),
        OutputFormat::Table => {
            let mut text = format!("key: {}\n", entry.key);
            let _ = writeln!(
                text,
                "value: {}",
                entry.value.as_deref().unwrap_or(NULL_PLACEHOLDER)
            );
            let _ = write!(text, "secret: {}", entry.secret);
            Ok(text)
        }
    }
}

/// Render a snapshot with secret values masked.
pub(crate) fn render_snapshot(
    snapshot: &SettingsSnapshot,
    format: OutputFormat,
) -> CliResult<String> {
    match format {
        OutputFormat::Json => {
            let entries: Vec<_> = snapshot
                .entries()
                .map(|entry| {
                    json!({
                        "key": entry.key,
                        "value": masked_value(entry),
                        "secret": entry.secret,
                    })
                })
                .collect();
            to_json(&json!({
                "marker": snapshot.marker(),
                "entries": entries,
            }))
        }
        OutputFormat::Table => {
            let mut text = format!(
                "marker: {}\n",
                snapshot.marker().unwrap_or("<empty table>")
            );
            for entry in snapshot.entries() {
                let _ = writeln!(
                    text,
                    "{} = {}",
                    entry.key,
                    masked_value(entry).unwrap_or(NULL_PLACEHOLDER)
                );
            }
            let _ = write!(text, "{} entr(ies)", snapshot.len());
            Ok(text)
        }
    }
}

pub(crate) fn render_outcome(outcome: &SyncOutcome, format: OutputFormat) -> CliResult<String> {
    match format {
        OutputFormat::Json => to_json(outcome),
        OutputFormat::Table => {
            if outcome.is_noop() {
                return Ok("no changes".to_string());
            }
            Ok(format!(
                "inserted: {}, updated: {}, deleted: {}\nmarker: {}",
                outcome.inserted,
                outcome.updated,
                outcome.deleted,
                outcome.marker.as_deref().unwrap_or("<none>")
            ))
        }
    }
}

fn masked_value(entry: &SnapshotEntry) -> Option<&str> {
    if entry.secret && entry.value.is_some() {
        Some(SECRET_PLACEHOLDER)
    } else {
        entry.value.as_deref()
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> CliResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))
}
