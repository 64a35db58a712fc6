//! Transfer lifecycle management.
//!
//! A transfer is a magnet locator being fetched by an external client. This
//! module owns everything around that: durable records, the state machine,
//! periodic sampling, and event fan-out.
//!
//! # Architecture
//!
//! - [`TransferEngine`] - add/pause/resume/cancel and per-transfer tasks
//! - [`TransferStore`] - `SQLite` records, one async write lock per id
//! - [`ProgressPublisher`] - broadcast channel of [`TransferEvent`]s
//! - [`TransferClient`] / [`TransferHandle`] - backend seam
//! - [`Aria2Connector`] - aria2 JSON-RPC backend
//! - [`augment_locator`] - appends public trackers to a magnet

mod aria2;
mod client;
mod engine;
mod locator;
mod publisher;
mod record;
mod store;

pub use aria2::{Aria2Client, Aria2Connector, DEFAULT_POLL_INTERVAL, DEFAULT_RPC_URL};
pub use client::{
    AddedTransfer, ClientConnector, ClientError, ClientEvent, EVENT_CHANNEL_CAPACITY,
    ReadyConnector, TransferClient, TransferHandle, TransferSample,
};
pub use engine::{DEFAULT_SAMPLE_INTERVAL, EngineOptions, TransferEngine};
pub use locator::{MAX_TRACKERS, SUPPLEMENTARY_TRACKERS, augment_locator};
pub use publisher::{DEFAULT_EVENT_CAPACITY, ProgressPublisher, TransferEvent};
pub use record::{NewTransfer, Transfer, TransferStatus};
pub use store::{StoreError, TransferStore};

use thiserror::Error;

/// Errors from transfer control operations.
#[derive(Debug, Error)]
pub enum TransferError {
    /// No active transfer (or record) with this id.
    #[error(
        "transfer not found: {id}\n  Suggestion: Run `gamegrab list` to see known transfer ids"
    )]
    NotFound {
        /// Requested id.
        id: String,
    },

    /// The requested operation is not valid in the transfer's current status.
    #[error("transfer {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Transfer id.
        id: String,
        /// Current status.
        from: TransferStatus,
        /// Requested status.
        to: TransferStatus,
    },

    /// The backend failed an operation on a running transfer.
    #[error("transfer {id}: client operation failed: {source}")]
    Engine {
        /// Transfer id.
        id: String,
        /// Backend error.
        #[source]
        source: ClientError,
    },

    /// The backend could not be initialized.
    #[error("{0}")]
    ClientUnavailable(#[source] ClientError),

    /// Reading or writing the record failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TransferError {
    /// Creates a `NotFound` error.
    #[must_use]
    pub fn not_found(id: &str) -> Self {
        Self::NotFound { id: id.to_string() }
    }

    /// Creates an `Engine` error.
    #[must_use]
    pub fn engine(id: &str, source: ClientError) -> Self {
        Self::Engine {
            id: id.to_string(),
            source,
        }
    }
}
