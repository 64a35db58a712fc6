//! Resilient HTML fetching for catalog sites.
//!
//! [`Fetcher`] performs GET requests with a browser header set, follows
//! redirects itself (so the retry budget only pays for real failures), and
//! retries failed attempts with a fixed back-off.
//!
//! # Example
//!
//! ```no_run
//! use gamegrab_core::fetch::{DEFAULT_RETRIES, Fetcher};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = Fetcher::new()?;
//! let html = fetcher.fetch("https://fitgirl-repacks.site/?s=doom", DEFAULT_RETRIES).await?;
//! println!("{} bytes", html.len());
//! # Ok(())
//! # }
//! ```

mod error;

pub use error::FetchError;

use std::time::Duration;

use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::http_client::build_http_client;
use crate::user_agent::browser_headers;

/// Hard per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Fixed delay between failed attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Default retry budget used by the source adapters.
pub const DEFAULT_RETRIES: u32 = 2;

/// Maximum redirect hops followed for one fetch.
pub const MAX_REDIRECTS: usize = 10;

/// Outcome of a single HTTP exchange.
enum Attempt {
    Body(String),
    Redirect(Url),
}

/// HTTP client for catalog pages.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    retry_delay: Duration,
    retries: u32,
}

impl Fetcher {
    /// Creates a fetcher with the default 15 s timeout and 1 s retry delay.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_settings(DEFAULT_TIMEOUT, DEFAULT_RETRY_DELAY)
    }

    /// Creates a fetcher with explicit timeout and retry delay.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the HTTP client cannot be built.
    pub fn with_settings(timeout: Duration, retry_delay: Duration) -> Result<Self, FetchError> {
        let client = build_http_client("fetcher", |builder| {
            builder
                .timeout(timeout)
                .connect_timeout(timeout)
                .redirect(Policy::none())
                .gzip(false)
        })?;
        Ok(Self {
            client,
            retry_delay,
            retries: DEFAULT_RETRIES,
        })
    }

    /// Sets the retry budget adapters pass to [`Fetcher::fetch`].
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Retry budget adapters use for their page fetches.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Fetches `url` and returns the final page body.
    ///
    /// Redirects are followed without touching the retry budget. Non-2xx
    /// responses, timeouts, and transport errors consume one retry each;
    /// `retries = 2` means at most three attempts.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's [`FetchError`] when retries are exhausted,
    /// or immediately for invalid URLs and redirect loops.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch(&self, url: &str, retries: u32) -> Result<String, FetchError> {
        let mut current = Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;
        let mut retries_left = retries;
        let mut redirects: usize = 0;

        loop {
            match self.attempt(&current).await {
                Ok(Attempt::Body(body)) => {
                    debug!(bytes = body.len(), redirects, "fetch complete");
                    return Ok(body);
                }
                Ok(Attempt::Redirect(next)) => {
                    redirects += 1;
                    if redirects > MAX_REDIRECTS {
                        return Err(FetchError::TooManyRedirects {
                            url: url.to_string(),
                            count: redirects,
                        });
                    }
                    debug!(from = %current, to = %next, redirects, "following redirect");
                    current = next;
                }
                Err(error) if error.is_retryable() && retries_left > 0 => {
                    retries_left -= 1;
                    warn!(
                        url = %current,
                        error = %error,
                        retries_left,
                        "fetch attempt failed; retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn attempt(&self, url: &Url) -> Result<Attempt, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .headers(browser_headers(url))
            .send()
            .await
            .map_err(|e| FetchError::transport(url.as_str(), e))?;

        let status = response.status();
        if status.is_redirection()
            && let Some(next) = redirect_target(&response, url)?
        {
            return Ok(Attempt::Redirect(next));
        }

        if !status.is_success() {
            return Err(FetchError::status(url.as_str(), status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::transport(url.as_str(), e))?;
        Ok(Attempt::Body(body))
    }
}

/// Resolves the Location header of a redirect against the current URL.
///
/// A 3xx without Location yields `None` and is treated as a failed status.
fn redirect_target(response: &Response, current: &Url) -> Result<Option<Url>, FetchError> {
    let Some(location) = response.headers().get(LOCATION) else {
        return Ok(None);
    };
    let location = location
        .to_str()
        .map_err(|_| FetchError::invalid_url(current.as_str()))?;
    current
        .join(location)
        .map(Some)
        .map_err(|_| FetchError::invalid_url(location))
}
