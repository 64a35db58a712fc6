//! Durable transfer records.
//!
//! [`TransferStore`] is the single source of truth for transfer state. Every
//! write to one record goes through a per-id async lock, so the sampler, the
//! event pump and control operations never interleave a read-modify-write.

use std::sync::Arc;

use dashmap::DashMap;
use sqlx::FromRow;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::record::{NewTransfer, Transfer, TransferStatus};
use crate::db::Database;

/// Errors from the transfer store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error(
        "transfer database error: {0}\n  Suggestion: Check that the database file is writable and not held by another process"
    )]
    Database(#[from] sqlx::Error),

    /// A stored row could not be mapped back to a [`Transfer`].
    #[error(
        "transfer record '{id}' is invalid: {reason}\n  Suggestion: Cancel the transfer to remove the damaged record"
    )]
    InvalidRecord {
        /// Record id.
        id: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, FromRow)]
struct TransferRow {
    id: String,
    name: String,
    resource_locator: String,
    #[sqlx(rename = "status")]
    status_str: String,
    progress: f64,
    downloaded: i64,
    total_size: i64,
    download_speed: i64,
    upload_speed: i64,
    peers: i64,
    save_path: Option<String>,
    error: Option<String>,
    created_at: String,
    completed_at: Option<String>,
    updated_at: String,
}

impl TryFrom<TransferRow> for Transfer {
    type Error = StoreError;

    fn try_from(row: TransferRow) -> Result<Self> {
        let status = row
            .status_str
            .parse::<TransferStatus>()
            .map_err(|reason| StoreError::InvalidRecord {
                id: row.id.clone(),
                reason,
            })?;
        Ok(Self {
            id: row.id,
            name: row.name,
            resource_locator: row.resource_locator,
            status,
            progress: row.progress,
            downloaded: from_db(row.downloaded),
            total_size: from_db(row.total_size),
            download_speed: from_db(row.download_speed),
            upload_speed: from_db(row.upload_speed),
            peers: u32::try_from(row.peers).unwrap_or(0),
            save_path: row.save_path,
            error: row.error,
            created_at: row.created_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        })
    }
}

fn from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Transfer persistence with per-record write serialization.
///
/// Cheap to clone; clones share the pool and the lock table.
#[derive(Debug, Clone)]
pub struct TransferStore {
    db: Database,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl TransferStore {
    /// Creates a store over an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db,
            locks: Arc::new(DashMap::new()),
        }
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Creates a fresh `queued` record, replacing any existing record with the same id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the write fails.
    #[instrument(skip(self, transfer), fields(id = %transfer.id))]
    pub async fn replace(&self, transfer: &NewTransfer<'_>) -> Result<Transfer> {
        let lock = self.lock_for(transfer.id);
        let _guard = lock.lock().await;

        sqlx::query(
            r"INSERT OR REPLACE INTO transfers (id, name, resource_locator, status)
              VALUES (?, ?, ?, 'queued')",
        )
        .bind(transfer.id)
        .bind(transfer.name)
        .bind(transfer.resource_locator)
        .execute(self.db.pool())
        .await?;

        debug!("transfer record replaced");
        self.fetch(transfer.id)
            .await?
            .ok_or_else(|| StoreError::InvalidRecord {
                id: transfer.id.to_string(),
                reason: "record vanished after insert".to_string(),
            })
    }

    /// Applies `mutate` to the current record under the per-id lock.
    ///
    /// `mutate` returns whether to write the change back. Returns the record
    /// as stored afterwards, or `None` if no record exists. Moving into
    /// `Completed` stamps `completed_at` once; any other status clears it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if reading or writing fails.
    pub async fn update<F>(&self, id: &str, mutate: F) -> Result<Option<Transfer>>
    where
        F: FnOnce(&mut Transfer) -> bool + Send,
    {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let Some(mut transfer) = self.fetch(id).await? else {
            return Ok(None);
        };
        if !mutate(&mut transfer) {
            return Ok(Some(transfer));
        }

        sqlx::query(
            r"UPDATE transfers SET
                name = ?, status = ?, progress = ?, downloaded = ?, total_size = ?,
                download_speed = ?, upload_speed = ?, peers = ?, save_path = ?, error = ?,
                completed_at = CASE WHEN ? = 'completed'
                    THEN COALESCE(completed_at, datetime('now')) ELSE NULL END,
                updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(&transfer.name)
        .bind(transfer.status.as_str())
        .bind(transfer.progress)
        .bind(to_db(transfer.downloaded))
        .bind(to_db(transfer.total_size))
        .bind(to_db(transfer.download_speed))
        .bind(to_db(transfer.upload_speed))
        .bind(i64::from(transfer.peers))
        .bind(&transfer.save_path)
        .bind(&transfer.error)
        .bind(transfer.status.as_str())
        .bind(id)
        .execute(self.db.pool())
        .await?;

        self.fetch(id).await
    }

    /// Reads one record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails or the row is malformed.
    pub async fn get(&self, id: &str) -> Result<Option<Transfer>> {
        self.fetch(id).await
    }

    async fn fetch(&self, id: &str) -> Result<Option<Transfer>> {
        let row = sqlx::query_as::<_, TransferRow>(r"SELECT * FROM transfers WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        row.map(Transfer::try_from).transpose()
    }

    /// Reads every record, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails or a row is malformed.
    #[instrument(skip(self))]
    pub async fn get_all(&self) -> Result<Vec<Transfer>> {
        let rows = sqlx::query_as::<_, TransferRow>(
            r"SELECT * FROM transfers ORDER BY created_at ASC, rowid ASC",
        )
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(Transfer::try_from).collect()
    }

    /// Reads records whose status is one of `statuses`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails or a row is malformed.
    pub async fn list_by_status(&self, statuses: &[TransferStatus]) -> Result<Vec<Transfer>> {
        let all = self.get_all().await?;
        Ok(all
            .into_iter()
            .filter(|transfer| statuses.contains(&transfer.status))
            .collect())
    }

    /// Deletes a record. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let lock = self.lock_for(id);
        let deleted = {
            let _guard = lock.lock().await;
            sqlx::query(r"DELETE FROM transfers WHERE id = ?")
                .bind(id)
                .execute(self.db.pool())
                .await?
                .rows_affected()
                > 0
        };
        drop(lock);
        // A writer still holding the mutex must keep sharing it with later writers.
        self.locks
            .remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
        Ok(deleted)
    }
}
