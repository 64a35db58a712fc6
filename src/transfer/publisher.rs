//! Fan-out of transfer events to subscribers.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// Events buffered per subscriber before the slowest one starts lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A notification about one transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TransferEvent {
    /// Periodic sample while downloading.
    Progress {
        /// Transfer id.
        id: String,
        /// Percent complete with one decimal.
        progress: f64,
        /// Bytes per second.
        download_speed: u64,
        /// Bytes per second.
        upload_speed: u64,
        /// Bytes received.
        downloaded: u64,
        /// Total payload bytes, 0 while unknown.
        total_size: u64,
        /// Connected peers.
        peers: u32,
        /// Connected seeders.
        seeds: u32,
        /// Seconds remaining at the current speed.
        eta: Option<u64>,
    },
    /// The payload is complete.
    Completed {
        /// Transfer id.
        id: String,
        /// Final location of the payload.
        save_path: Option<String>,
    },
    /// The transfer failed.
    Error {
        /// Transfer id.
        id: String,
        /// Failure message.
        message: String,
    },
}

impl TransferEvent {
    /// Id of the transfer the event is about.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Progress { id, .. } | Self::Completed { id, .. } | Self::Error { id, .. } => id,
        }
    }
}

/// Broadcasts [`TransferEvent`]s to any number of subscribers.
///
/// Cheap to clone; clones publish into the same channel.
#[derive(Debug, Clone)]
pub struct ProgressPublisher {
    sender: broadcast::Sender<TransferEvent>,
}

impl Default for ProgressPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl ProgressPublisher {
    /// Creates a publisher buffering `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to all events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event; having no subscribers is not an error.
    pub fn publish(&self, event: TransferEvent) {
        if self.sender.send(event).is_err() {
            trace!("transfer event dropped; no subscribers");
        }
    }
}
