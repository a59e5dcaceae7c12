use anyhow::anyhow;
use tabula_config::ConfigError;
use tracing::info;

use crate::cli::WatchArgs;
use crate::context::{AppContext, CliError, CliResult};
use crate::output::render_snapshot;

pub(crate) async fn handle_watch(ctx: &AppContext, args: WatchArgs) -> CliResult<()> {
    let provider = ctx.source.provider();
    let mut watcher = provider.watch().map_err(|err| match err {
        ConfigError::InvalidField {
            field: "reload_on_change",
            ..
        } => CliError::validation("watch requires --reload-on-change=true"),
        other => CliError::from(other),
    })?;

    let snapshot = provider.load().await?;
    println!("{}", render_snapshot(&snapshot, ctx.output)?);

    let mut reloads = 0_usize;
    while args.count.is_none_or(|limit| reloads < limit) {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|err| CliError::failure(anyhow!("failed to listen for ctrl-c: {err}")))?;
                info!(reloads, "interrupted; stopping watch");
                break;
            }
            next = watcher.next() => {
                let snapshot = next?;
                reloads += 1;
                println!("{}", render_snapshot(&snapshot, ctx.output)?);
            }
        }
    }
    Ok(())
}
