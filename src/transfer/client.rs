//! Seam between the engine and whatever actually moves the bytes.
//!
//! The engine only orchestrates. A [`ClientConnector`] produces the
//! [`TransferClient`] on first use; the client turns a locator into a
//! [`TransferHandle`] plus a stream of [`ClientEvent`]s.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Capacity of the per-transfer event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Errors reported by a transfer client backend.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The backend could not be reached or initialized.
    #[error(
        "transfer client at {endpoint} is unavailable: {message}\n  Suggestion: Start aria2c with --enable-rpc or set aria2_rpc_url in the config file"
    )]
    Unavailable {
        /// Where the backend was expected.
        endpoint: String,
        /// What went wrong.
        message: String,
    },

    /// The backend rejected a call.
    #[error("transfer client call {method} failed (code {code}): {message}")]
    Rejected {
        /// Backend method name.
        method: String,
        /// Backend error code.
        code: i64,
        /// Backend error message.
        message: String,
    },

    /// The backend answered with something unexpected.
    #[error("transfer client call {method} returned an unexpected response: {message}")]
    Protocol {
        /// Backend method name.
        method: String,
        /// What was wrong with the response.
        message: String,
    },
}

impl ClientError {
    /// Creates an `Unavailable` error.
    #[must_use]
    pub fn unavailable(endpoint: &str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }

    /// Creates a `Protocol` error.
    #[must_use]
    pub fn protocol(method: &str, message: impl Into<String>) -> Self {
        Self::Protocol {
            method: method.to_string(),
            message: message.into(),
        }
    }
}

/// Asynchronous notifications from a running transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Torrent metadata became known.
    Metadata {
        /// Name from the torrent info, if any.
        name: Option<String>,
        /// Total payload bytes.
        total_size: u64,
        /// Directory or file the payload is written to.
        save_path: Option<String>,
    },
    /// All pieces received.
    Done {
        /// Final location of the payload.
        save_path: Option<String>,
    },
    /// The transfer failed.
    Error {
        /// Backend failure message.
        message: String,
    },
}

/// Point-in-time counters of a running transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransferSample {
    /// Completed fraction in `[0, 1]`.
    pub fraction: f64,
    /// Bytes received.
    pub downloaded: u64,
    /// Total payload bytes; 0 while unknown.
    pub total_size: u64,
    /// Bytes per second.
    pub download_speed: u64,
    /// Bytes per second.
    pub upload_speed: u64,
    /// Connected peers.
    pub peers: u32,
    /// Connected seeders.
    pub seeds: u32,
    /// Whether the payload is complete.
    pub done: bool,
}

/// A transfer started by a [`TransferClient`].
pub struct AddedTransfer {
    /// Control handle.
    pub handle: Arc<dyn TransferHandle>,
    /// Events for this transfer; closes when the backend stops watching it.
    pub events: mpsc::Receiver<ClientEvent>,
}

/// Starts transfers.
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Hands `locator` to the backend, writing into `download_dir`.
    async fn add(&self, locator: &str, download_dir: &Path) -> Result<AddedTransfer, ClientError>;
}

/// Controls one running transfer.
#[async_trait]
pub trait TransferHandle: Send + Sync {
    /// Reads current counters.
    async fn sample(&self) -> Result<TransferSample, ClientError>;

    /// Stops transferring without discarding data.
    async fn pause(&self) -> Result<(), ClientError>;

    /// Continues a paused or failed transfer.
    async fn resume(&self) -> Result<(), ClientError>;

    /// Removes the transfer from the backend.
    async fn destroy(&self) -> Result<(), ClientError>;
}

/// Produces the [`TransferClient`]; called at most once per successful engine init.
#[async_trait]
pub trait ClientConnector: Send + Sync {
    /// Connects to (or starts) the backend.
    async fn connect(&self) -> Result<Arc<dyn TransferClient>, ClientError>;
}

/// Connector that hands out an already-built client.
pub struct ReadyConnector(pub Arc<dyn TransferClient>);

#[async_trait]
impl ClientConnector for ReadyConnector {
    async fn connect(&self) -> Result<Arc<dyn TransferClient>, ClientError> {
        Ok(Arc::clone(&self.0))
    }
}
