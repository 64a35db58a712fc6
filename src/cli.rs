//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Find game releases across catalog sites and download them over BitTorrent.
///
/// Searching and resolving only scrape catalog pages. Downloading hands the
/// magnet to a running aria2 (`aria2c --enable-rpc`) and tracks its progress
/// in a local database.
#[derive(Parser, Debug)]
#[command(name = "gamegrab")]
#[command(author, version, about)]
#[command(subcommand_required = true, arg_required_else_help = true)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Transfer database path (overrides `database_path` in the config file)
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Config file path (defaults to $XDG_CONFIG_HOME/gamegrab/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search every catalog site for a title
    Search(SearchArgs),
    /// Extract the magnet locator from a candidate's detail page
    Resolve(ResolveArgs),
    /// Start a transfer and watch it until it completes
    Download(DownloadArgs),
    /// Show every recorded transfer
    List(ListArgs),
    /// Re-attach a recorded transfer to the client and watch it
    Resume(IdArgs),
    /// Stop a transfer and delete its record
    Cancel(IdArgs),
}

/// Arguments for `search`.
#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Title to search for
    #[arg(required = true, num_args = 1..)]
    pub query: Vec<String>,

    /// Print candidates as JSON
    #[arg(long)]
    pub json: bool,
}

impl SearchArgs {
    /// The query words joined into one string.
    #[must_use]
    pub fn query_text(&self) -> String {
        self.query.join(" ")
    }
}

/// Arguments for `resolve`.
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Source label (fitgirl, dodi, 1337x)
    pub source: String,

    /// Detail page URL from a search result
    pub detail_url: String,
}

/// Arguments for `download`.
#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Magnet locator
    pub locator: String,

    /// Display name (defaults to the magnet's dn parameter)
    #[arg(long)]
    pub name: Option<String>,

    /// Transfer id (defaults to a generated id)
    #[arg(long)]
    pub id: Option<String>,
}

/// Arguments for `list`.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Print transfers as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments naming one transfer.
#[derive(Args, Debug)]
pub struct IdArgs {
    /// Transfer id
    pub id: String,
}
