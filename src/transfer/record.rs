//! Transfer record types and status definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Recorded, not yet handed to the client.
    Queued,
    /// Handed to the client and being sampled.
    Downloading,
    /// Paused by the user.
    Paused,
    /// All data received. Terminal.
    Completed,
    /// The client reported a failure.
    Error,
    /// Label only; no transition leads here.
    Seeding,
}

impl TransferStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Seeding => "seeding",
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Re-adding a transfer resets it to `Queued` regardless of state and is
    /// not a transition in this sense.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Downloading)
                | (
                    Self::Downloading,
                    Self::Paused | Self::Completed | Self::Error
                )
                | (Self::Paused | Self::Error, Self::Downloading)
        )
    }

    /// Whether the transfer is expected to be running in the client.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Downloading)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "downloading" => Ok(Self::Downloading),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "seeding" => Ok(Self::Seeding),
            _ => Err(format!("invalid transfer status: {s}")),
        }
    }
}

/// Durable state of one transfer, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    /// Caller-chosen identifier.
    pub id: String,
    /// Display name; replaced by the client's name once metadata arrives.
    pub name: String,
    /// Augmented magnet locator handed to the client.
    pub resource_locator: String,
    /// Current lifecycle status.
    pub status: TransferStatus,
    /// Percent complete in `[0, 100]` with one decimal.
    pub progress: f64,
    /// Bytes received.
    pub downloaded: u64,
    /// Total payload bytes; 0 until metadata is known.
    pub total_size: u64,
    /// Bytes per second; 0 unless downloading.
    pub download_speed: u64,
    /// Bytes per second; 0 unless downloading.
    pub upload_speed: u64,
    /// Connected peers at the last sample.
    pub peers: u32,
    /// Where the payload is written, once known.
    pub save_path: Option<String>,
    /// Failure message; set only in `Error` status.
    pub error: Option<String>,
    /// When the record was created (`SQLite` datetime).
    pub created_at: String,
    /// When the transfer completed.
    pub completed_at: Option<String>,
    /// Last write time.
    pub updated_at: String,
}

impl Transfer {
    /// Remaining bytes, or `None` while the size is unknown.
    #[must_use]
    pub fn remaining(&self) -> Option<u64> {
        (self.total_size > 0).then(|| self.total_size.saturating_sub(self.downloaded))
    }

    /// Estimated seconds to completion at the last sampled speed.
    #[must_use]
    pub fn eta_secs(&self) -> Option<u64> {
        if self.download_speed == 0 {
            return None;
        }
        self.remaining()
            .map(|remaining| remaining.div_ceil(self.download_speed))
    }
}

impl fmt::Display for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transfer {{ id: {}, status: {}, progress: {:.1} }}",
            self.id, self.status, self.progress
        )
    }
}

/// Fields needed to create (or overwrite) a transfer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer<'a> {
    /// Caller-chosen identifier.
    pub id: &'a str,
    /// Initial display name.
    pub name: &'a str,
    /// Augmented locator.
    pub resource_locator: &'a str,
}
