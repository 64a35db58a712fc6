//! `download`, `list`, `resume` and `cancel` command handlers.

use anyhow::{Result, bail};
use gamegrab_core::{Transfer, TransferEngine, TransferStatus};
use indicatif::HumanBytes;
use tracing::info;

use super::context::AppContext;
use super::watch::{WatchOutcome, watch_transfer};
use crate::cli::{DownloadArgs, IdArgs, ListArgs};

/// Name used when neither `--name` nor the magnet's `dn` is available.
const FALLBACK_NAME: &str = "Unnamed transfer";

pub async fn run_download_command(
    ctx: &AppContext,
    args: &DownloadArgs,
    show_progress: bool,
) -> Result<()> {
    if !args.locator.starts_with("magnet:") {
        bail!(
            "Not a magnet locator: '{}'\n  Suggestion: Run `gamegrab resolve <source> <detail-url>` to get one",
            args.locator
        );
    }

    let engine = ctx.open_engine().await?;
    let id = args.id.clone().unwrap_or_else(generate_transfer_id);
    let name = args
        .name
        .clone()
        .or_else(|| display_name_from_locator(&args.locator))
        .unwrap_or_else(|| FALLBACK_NAME.to_string());

    // Subscribe before adding so the first progress event is not missed.
    let events = engine.publisher().subscribe();
    let transfer = match engine.add(&id, &args.locator, &name).await {
        Ok(transfer) => transfer,
        Err(error) => {
            engine.shutdown().await;
            return Err(error.into());
        }
    };
    if transfer.status == TransferStatus::Error {
        engine.shutdown().await;
        let message = transfer
            .error
            .unwrap_or_else(|| "transfer client rejected the locator".to_string());
        return report_outcome(&id, WatchOutcome::Failed { message });
    }
    info!(id = %transfer.id, name = %transfer.name, "download started");
    println!("Started {} ({})", transfer.id, transfer.name);

    let outcome = watch_transfer(&engine, events, &id, show_progress).await;
    engine.shutdown().await;
    report_outcome(&id, outcome?)
}

pub async fn run_list_command(ctx: &AppContext, args: &ListArgs) -> Result<()> {
    let engine = ctx.open_engine().await?;
    let transfers = engine.get_all().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&transfers)?);
        return Ok(());
    }
    if transfers.is_empty() {
        println!("No transfers recorded.");
        return Ok(());
    }
    for transfer in &transfers {
        println!("{}", render_transfer_row(transfer));
    }
    Ok(())
}

pub async fn run_resume_command(
    ctx: &AppContext,
    args: &IdArgs,
    show_progress: bool,
) -> Result<()> {
    let engine = ctx.open_engine().await?;
    let events = engine.publisher().subscribe();

    let result = resume_transfer(&engine, &args.id).await;
    if let Err(error) = result {
        engine.shutdown().await;
        return Err(error);
    }
    println!("Resumed {}", args.id);

    let outcome = watch_transfer(&engine, events, &args.id, show_progress).await;
    engine.shutdown().await;
    report_outcome(&args.id, outcome?)
}

async fn resume_transfer(engine: &TransferEngine, id: &str) -> Result<()> {
    let transfer = engine.restore(id).await?;
    if transfer.status == TransferStatus::Paused {
        engine.resume(id).await?;
    }
    Ok(())
}

pub async fn run_cancel_command(ctx: &AppContext, args: &IdArgs) -> Result<()> {
    let engine = ctx.open_engine().await?;
    let result = engine.cancel(&args.id).await;
    engine.shutdown().await;
    result?;
    println!("Cancelled {}", args.id);
    Ok(())
}

fn report_outcome(id: &str, outcome: WatchOutcome) -> Result<()> {
    match outcome {
        WatchOutcome::Completed { save_path } => {
            match save_path {
                Some(path) => println!("Completed {id}: {path}"),
                None => println!("Completed {id}"),
            }
            Ok(())
        }
        WatchOutcome::Failed { message } => bail!(
            "Transfer {id} failed: {message}\n  Suggestion: Run `gamegrab resume {id}` to retry"
        ),
        WatchOutcome::Interrupted => {
            println!("Paused {id}. Run `gamegrab resume {id}` to continue.");
            Ok(())
        }
    }
}

fn generate_transfer_id() -> String {
    format!("t{:08x}", rand::random::<u32>())
}

/// Reads the `dn` (display name) parameter of a magnet locator.
fn display_name_from_locator(locator: &str) -> Option<String> {
    let (_, query) = locator.split_once('?')?;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("dn="))
        .map(|raw| raw.replace('+', " "))
        .and_then(|raw| urlencoding::decode(&raw).ok().map(|name| name.trim().to_string()))
        .filter(|name| !name.is_empty())
}

fn render_transfer_row(transfer: &Transfer) -> String {
    let size = if transfer.total_size == 0 {
        "?".to_string()
    } else {
        HumanBytes(transfer.total_size).to_string()
    };
    let mut row = format!(
        "{id:<12} {status:<11} {progress:>5.1}% {size:>10}  {name}",
        id = transfer.id,
        status = transfer.status.as_str(),
        progress = transfer.progress,
        name = transfer.name,
    );
    if let Some(error) = &transfer.error {
        row.push_str(&format!("\n             error: {error}"));
    }
    row
}
