//! `SQLite` handle for the transfer store.
//!
//! One file holds every transfer record. It is opened in WAL mode so `list`
//! can read while a running `download` keeps writing samples, and the schema
//! in `migrations/` is applied on every open.
//!
//! # Example
//!
//! ```no_run
//! use gamegrab_core::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("transfers.db")).await?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

/// File-level locking makes a large pool pointless.
const MAX_CONNECTIONS: u32 = 5;

/// How long a writer waits on a locked file before `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors opening the transfer database.
#[derive(Error, Debug)]
pub enum DbError {
    /// The file could not be opened or configured.
    #[error(
        "failed to open database {path}: {source}\n  Suggestion: Check that the directory exists and is writable, or pass --db"
    )]
    Open {
        /// Database file.
        path: PathBuf,
        /// Driver error.
        #[source]
        source: sqlx::Error,
    },

    /// A query against an open database failed.
    #[error("database query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// The schema could not be brought up to date.
    #[error("failed to apply transfer schema: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Pooled connection to the transfer database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at `db_path` and migrates it.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Open`] if the file cannot be opened, or
    /// [`DbError::Migration`] if the schema cannot be applied.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|source| DbError::Open {
                path: db_path.to_path_buf(),
                source,
            })?;

        Self::migrated(pool).await
    }

    /// Opens a private in-memory database, mainly for tests.
    ///
    /// Limited to one connection; each new connection would see its own empty database.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Open`] or [`DbError::Migration`].
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::new().in_memory(true))
            .await
            .map_err(|source| DbError::Open {
                path: PathBuf::from(":memory:"),
                source,
            })?;

        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self, DbError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!("transfer schema up to date");
        Ok(Self { pool })
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Whether the journal is in WAL mode (never true for in-memory databases).
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Query`] if the pragma cannot be read.
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(mode.eq_ignore_ascii_case("wal"))
    }

    /// Closes every pooled connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
