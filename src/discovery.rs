//! Concurrent multi-source discovery.
//!
//! [`Discovery`] fans a query out to every registered [`SourceAdapter`] at
//! once and concatenates what comes back. A slow or broken site only costs
//! its own slot in the response.

use futures_util::future::join_all;
use tracing::{debug, info, instrument};

use crate::fetch::{FetchError, Fetcher};
use crate::source::{Candidate, Source, SourceAdapter, default_adapters};

/// Maximum candidates kept from each source in an aggregated response.
pub const MAX_RESULTS_PER_SOURCE: usize = 5;

/// Aggregates searches across the registered source adapters.
pub struct Discovery {
    adapters: Vec<Box<dyn SourceAdapter>>,
}

impl Discovery {
    /// Creates an aggregator over `adapters`; registration order is response order.
    #[must_use]
    pub fn new(adapters: Vec<Box<dyn SourceAdapter>>) -> Self {
        Self { adapters }
    }

    /// Creates an aggregator over the built-in catalog sites.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the shared HTTP client cannot be built.
    pub fn with_default_sources() -> Result<Self, FetchError> {
        let fetcher = Fetcher::new()?;
        Ok(Self::new(default_adapters(&fetcher)))
    }

    /// Searches every source concurrently.
    ///
    /// Each source contributes at most [`MAX_RESULTS_PER_SOURCE`] candidates,
    /// in source registration order. Never fails: failing sources contribute
    /// nothing.
    #[instrument(skip(self), fields(sources = self.adapters.len()))]
    pub async fn discover(&self, query: &str) -> Vec<Candidate> {
        let searches = self.adapters.iter().map(|adapter| adapter.search(query));
        let per_source = join_all(searches).await;

        let mut candidates = Vec::new();
        for (adapter, mut found) in self.adapters.iter().zip(per_source) {
            debug!(source = %adapter.source(), found = found.len(), "source finished");
            found.truncate(MAX_RESULTS_PER_SOURCE);
            candidates.extend(found);
        }

        info!(total = candidates.len(), "discovery complete");
        candidates
    }

    /// Resolves a candidate's detail page through the adapter named by `source`.
    ///
    /// `source` is matched case-insensitively as a substring against the
    /// adapter identifiers; an unrecognized label yields `None`.
    #[instrument(skip(self))]
    pub async fn resolve_locator(&self, source: &str, detail_url: &str) -> Option<String> {
        let Some(wanted) = Source::from_label(source) else {
            debug!("no adapter matches source label");
            return None;
        };
        let adapter = self
            .adapters
            .iter()
            .find(|adapter| adapter.source() == wanted)?;
        adapter.resolve(detail_url).await
    }
}
