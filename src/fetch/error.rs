//! Error types for catalog page fetching.

use thiserror::Error;

use crate::http_client::HttpClientError;

/// Errors returned by [`Fetcher::fetch`](super::Fetcher::fetch) once the
/// retry budget is exhausted.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Final response carried a non-success status.
    #[error("HTTP {status} fetching {url}")]
    Status {
        /// The URL that produced the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The request did not complete within the per-request timeout.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Connection, TLS, or body read failure.
    #[error("network error fetching {url}: {source}")]
    Transport {
        /// The URL that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The redirect chain exceeded the hop cap.
    #[error(
        "too many redirects ({count}) fetching {url}\n  Suggestion: Check for a redirect loop on the site"
    )]
    TooManyRedirects {
        /// The URL originally requested.
        url: String,
        /// Number of redirects followed.
        count: usize,
    },

    /// The URL (or a redirect Location) could not be parsed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The offending URL text.
        url: String,
    },

    /// The underlying HTTP client could not be built.
    #[error(transparent)]
    Client(#[from] HttpClientError),
}

impl FetchError {
    /// Creates a status error.
    pub fn status(url: impl Into<String>, status: u16) -> Self {
        Self::Status {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Maps a reqwest error into a timeout or transport error.
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Transport { url, source }
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Returns the HTTP status for [`FetchError::Status`].
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true when another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Status { .. } | Self::Timeout { .. } | Self::Transport { .. }
        )
    }
}
