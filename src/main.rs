//! CLI entry point for gamegrab.

use std::io::{self, IsTerminal};

use anyhow::Result;
use clap::Parser;
use tracing::debug;

mod app_config;
mod cli;
mod commands;

use app_config::{VerbositySetting, load_file_config};
use cli::{Cli, Command};
use commands::AppContext;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();
    let file_config = load_file_config(cli.config.as_deref())?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config verbosity > info
    let default_level = default_log_level(&cli, file_config.verbosity);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?cli, "CLI arguments parsed");
    debug!(
        config_verbosity = file_config.verbosity.map(VerbositySetting::as_str),
        "config file loaded"
    );

    let ctx = AppContext::resolve(&cli, &file_config);
    debug!(?ctx, "effective settings resolved");
    let show_progress = !cli.quiet && io::stderr().is_terminal();

    match &cli.command {
        Command::Search(args) => commands::run_search_command(&ctx, args).await,
        Command::Resolve(args) => commands::run_resolve_command(&ctx, args).await,
        Command::Download(args) => {
            commands::run_download_command(&ctx, args, show_progress).await
        }
        Command::List(args) => commands::run_list_command(&ctx, args).await,
        Command::Resume(args) => commands::run_resume_command(&ctx, args, show_progress).await,
        Command::Cancel(args) => commands::run_cancel_command(&ctx, args).await,
    }
}

fn default_log_level(cli: &Cli, configured: Option<VerbositySetting>) -> &'static str {
    if cli.quiet {
        return "error";
    }
    match cli.verbose {
        0 => {}
        1 => return "debug",
        _ => return "trace",
    }
    match configured {
        None | Some(VerbositySetting::Default) => "info",
        Some(VerbositySetting::Verbose) => "debug",
        Some(VerbositySetting::Quiet) => "error",
        Some(VerbositySetting::Debug) => "trace",
    }
}
