//! FitGirl catalog adapter.
//!
//! Search results are WordPress post titles; the post page embeds the magnet
//! link directly. The catalog mixes releases with site news (update digests,
//! "Top N" roundups, upcoming-repack lists) which are filtered out by title.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};
use url::Url;

use super::extract::{
    ListingPattern, build_candidates, compile_static_regex, extract_listing, extract_magnet,
};
use super::{Candidate, Source, SourceAdapter, search_url};
use crate::fetch::{FetchError, Fetcher};

const DEFAULT_BASE_URL: &str = "https://fitgirl-repacks.site";
const SEARCH_TEMPLATE: &str = "/?s={query}";

static ENTRY_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<h[12][^>]*class="[^"]*entry-title[^"]*"[^>]*>\s*<a[^>]*href="(?P<url>[^"]+)"[^>]*>(?P<title>.*?)</a>"#,
    )
});
static BOOKMARK_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<a[^>]*href="(?P<url>[^"]+)"[^>]*rel="bookmark"[^>]*>(?P<title>.*?)</a>"#,
    )
});
static NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r"(?i)(updates?\s+digest|upcoming\s+repacks|changelog|\btop[\s-]+\d+|repacks?\s+of\s+the\s+(?:year|month)|^updates?\b|\bupdate\s+only\b)",
    )
});

static LISTING_PATTERNS: [ListingPattern; 2] = [
    ListingPattern {
        name: "entry_title",
        regex: &ENTRY_TITLE_RE,
    },
    ListingPattern {
        name: "bookmark_link",
        regex: &BOOKMARK_LINK_RE,
    },
];

/// Adapter for the FitGirl repack catalog.
#[derive(Debug, Clone)]
pub struct FitGirlAdapter {
    fetcher: Fetcher,
    base_url: String,
}

impl FitGirlAdapter {
    /// Creates an adapter against the public site.
    #[must_use]
    pub fn new(fetcher: Fetcher) -> Self {
        Self::with_base_url(fetcher, DEFAULT_BASE_URL)
    }

    /// Creates an adapter against a custom base URL (used by integration tests).
    #[must_use]
    pub fn with_base_url(fetcher: Fetcher, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
        }
    }

    async fn try_search(&self, query: &str) -> Result<Vec<Candidate>, FetchError> {
        let url = search_url(&self.base_url, SEARCH_TEMPLATE, query);
        let page_url = Url::parse(&url).map_err(|_| FetchError::invalid_url(&url))?;
        let html = self.fetcher.fetch(&url, self.fetcher.retries()).await?;

        let rows = extract_listing(&html, &LISTING_PATTERNS);
        debug!(rows = rows.len(), "fitgirl listing rows extracted");
        Ok(build_candidates(Source::FitGirl, rows, &page_url, is_noise))
    }
}

fn is_noise(title: &str) -> bool {
    NOISE_RE.is_match(title)
}

#[async_trait]
impl SourceAdapter for FitGirlAdapter {
    fn source(&self) -> Source {
        Source::FitGirl
    }

    #[tracing::instrument(skip(self), fields(source = "fitgirl"))]
    async fn search(&self, query: &str) -> Vec<Candidate> {
        match self.try_search(query).await {
            Ok(candidates) => {
                info!(count = candidates.len(), "fitgirl search complete");
                candidates
            }
            Err(error) => {
                warn!(error = %error, "fitgirl search failed");
                Vec::new()
            }
        }
    }

    #[tracing::instrument(skip(self), fields(source = "fitgirl"))]
    async fn resolve(&self, detail_url: &str) -> Option<String> {
        let html = match self.fetcher.fetch(detail_url, self.fetcher.retries()).await {
            Ok(html) => html,
            Err(error) => {
                warn!(error = %error, "fitgirl detail page fetch failed");
                return None;
            }
        };
        let locator = extract_magnet(&html);
        if locator.is_none() {
            debug!("no magnet locator on fitgirl detail page");
        }
        locator
    }
}
