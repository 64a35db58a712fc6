//! Runtime settings merged from CLI flags, config file and defaults.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use gamegrab_core::transfer::DEFAULT_RPC_URL;
use gamegrab_core::{
    Aria2Connector, DEFAULT_RETRIES, Database, Discovery, EngineOptions, Fetcher,
    ProgressPublisher, TransferEngine, TransferStore, default_adapters,
};
use tracing::debug;

use crate::app_config::{FileConfig, resolve_default_database_path};
use crate::cli::Cli;

/// Effective settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppContext {
    pub database_path: PathBuf,
    pub download_dir: PathBuf,
    pub aria2_rpc_url: String,
    pub aria2_rpc_secret: Option<String>,
    pub fetch_retries: u32,
}

impl AppContext {
    /// Merges settings; CLI flags beat the config file, which beats defaults.
    pub fn resolve(cli: &Cli, file: &FileConfig) -> Self {
        Self {
            database_path: cli
                .db
                .clone()
                .or_else(|| file.database_path.clone())
                .unwrap_or_else(resolve_default_database_path),
            download_dir: file
                .download_dir
                .clone()
                .unwrap_or_else(|| EngineOptions::default().download_dir),
            aria2_rpc_url: file
                .aria2_rpc_url
                .clone()
                .unwrap_or_else(|| DEFAULT_RPC_URL.to_string()),
            aria2_rpc_secret: file.aria2_rpc_secret.clone(),
            fetch_retries: file.fetch_retries.unwrap_or(DEFAULT_RETRIES),
        }
    }

    /// Builds the discovery aggregator over the default sources.
    pub fn discovery(&self) -> Result<Discovery> {
        let fetcher = Fetcher::new()
            .context("Failed to build HTTP client")?
            .with_retries(self.fetch_retries);
        Ok(Discovery::new(default_adapters(&fetcher)))
    }

    /// Opens the transfer database and builds an engine over aria2.
    ///
    /// The aria2 connection itself is made lazily by the first transfer operation.
    pub async fn open_engine(&self) -> Result<TransferEngine> {
        if let Some(parent) = self.database_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory '{}'", parent.display())
            })?;
        }
        let db = Database::new(&self.database_path).await.with_context(|| {
            format!(
                "Failed to open transfer database '{}'",
                self.database_path.display()
            )
        })?;
        debug!(path = %self.database_path.display(), "transfer database opened");

        let download_dir = std::path::absolute(&self.download_dir)
            .unwrap_or_else(|_| self.download_dir.clone());
        let connector = Aria2Connector::new(&self.aria2_rpc_url, self.aria2_rpc_secret.clone());
        Ok(TransferEngine::new(
            TransferStore::new(db),
            ProgressPublisher::default(),
            Arc::new(connector),
            EngineOptions {
                download_dir,
                ..EngineOptions::default()
            },
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_db_flag_beats_config_file() {
        let cli = Cli::try_parse_from(["gamegrab", "list", "--db", "/tmp/cli.db"]).unwrap();
        let file = FileConfig {
            database_path: Some(PathBuf::from("/tmp/file.db")),
            fetch_retries: Some(5),
            ..FileConfig::default()
        };
        let ctx = AppContext::resolve(&cli, &file);
        assert_eq!(ctx.database_path, PathBuf::from("/tmp/cli.db"));
        assert_eq!(ctx.fetch_retries, 5);
    }

    #[test]
    fn test_defaults_apply_without_config() {
        let cli = Cli::try_parse_from(["gamegrab", "list"]).unwrap();
        let ctx = AppContext::resolve(&cli, &FileConfig::default());
        assert_eq!(ctx.aria2_rpc_url, DEFAULT_RPC_URL);
        assert_eq!(ctx.fetch_retries, DEFAULT_RETRIES);
        assert!(ctx.aria2_rpc_secret.is_none());
    }
}
