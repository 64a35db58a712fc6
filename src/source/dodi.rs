//! DODI catalog adapter.
//!
//! DODI posts do not carry the magnet inline. The post links to a "Get Link"
//! interstitial, which either embeds the magnet or points one more hop to a
//! paste/redirect page that does. Resolution follows at most two hops past
//! the detail page and gives up after that.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};
use url::Url;

use super::extract::{
    Anchor, ListingPattern, absolutize_url, anchors, build_candidates, compile_static_regex,
    extract_listing, extract_magnet, meta_refresh_target,
};
use super::{Candidate, Source, SourceAdapter, search_url};
use crate::fetch::{FetchError, Fetcher};

const DEFAULT_BASE_URL: &str = "https://dodi-repacks.site";
const SEARCH_TEMPLATE: &str = "/?s={query}";
const GET_LINK_LABEL: &str = "get link";

static ENTRY_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<h[12][^>]*class="[^"]*entry-title[^"]*"[^>]*>\s*<a[^>]*href="(?P<url>[^"]+)"[^>]*>(?P<title>.*?)</a>"#,
    )
});
static ARTICLE_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<article[^>]*>.*?<a[^>]*href="(?P<url>[^"]+)"[^>]*>(?P<title>[^<]{3,}?)</a>"#,
    )
});
static NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?i)(^updates?\b|\bupdate\s+only\b|\bhow\s+to\s+install\b|\bfaq\b)")
});
static MAGNET_HINT_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)(magnet|torrent)"));

static LISTING_PATTERNS: [ListingPattern; 2] = [
    ListingPattern {
        name: "entry_title",
        regex: &ENTRY_TITLE_RE,
    },
    ListingPattern {
        name: "article_link",
        regex: &ARTICLE_LINK_RE,
    },
];

/// Adapter for the DODI repack catalog.
#[derive(Debug, Clone)]
pub struct DodiAdapter {
    fetcher: Fetcher,
    base_url: String,
}

impl DodiAdapter {
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
        debug!(rows = rows.len(), "dodi listing rows extracted");
        Ok(build_candidates(Source::Dodi, rows, &page_url, is_noise))
    }

    async fn try_resolve(&self, detail_url: &str) -> Result<Option<String>, FetchError> {
        let detail = Url::parse(detail_url).map_err(|_| FetchError::invalid_url(detail_url))?;
        let html = self.fetcher.fetch(detail.as_str(), self.fetcher.retries()).await?;
        if let Some(locator) = extract_magnet(&html) {
            return Ok(Some(locator));
        }

        let Some(link_page) = pick_get_link(&anchors(&html))
            .and_then(|anchor| absolutize_url(&anchor.href, &detail))
        else {
            debug!("no get-link anchor on dodi detail page");
            return Ok(None);
        };
        let link_page = Url::parse(&link_page).map_err(|_| FetchError::invalid_url(&link_page))?;
        debug!(hop = 1, url = %link_page, "following get-link page");

        let html = self.fetcher.fetch(link_page.as_str(), self.fetcher.retries()).await?;
        if let Some(locator) = extract_magnet(&html) {
            return Ok(Some(locator));
        }

        let Some(final_page) =
            next_hop(&html).and_then(|href| absolutize_url(&href, &link_page))
        else {
            debug!("get-link page has no magnet and no onward link");
            return Ok(None);
        };
        debug!(hop = 2, url = %final_page, "following onward link");

        let html = self.fetcher.fetch(&final_page, self.fetcher.retries()).await?;
        Ok(extract_magnet(&html))
    }
}

fn is_noise(title: &str) -> bool {
    NOISE_RE.is_match(title)
}

/// Scores anchors labelled "get link"; exact label beats torrent hints beats
/// any mention. Ties go to the earliest anchor in the document.
fn pick_get_link(anchors: &[Anchor]) -> Option<&Anchor> {
    let mut best: Option<(u8, &Anchor)> = None;
    for anchor in anchors {
        if !anchor.label.contains(GET_LINK_LABEL) {
            continue;
        }
        let score = if anchor.label == GET_LINK_LABEL {
            3
        } else if MAGNET_HINT_RE.is_match(&anchor.label) {
            2
        } else {
            1
        };
        if best.is_none_or(|(top, _)| score > top) {
            best = Some((score, anchor));
        }
    }
    best.map(|(_, anchor)| anchor)
}

/// Finds the onward link on an interstitial page: a magnet/torrent anchor
/// first, then a meta refresh.
fn next_hop(html: &str) -> Option<String> {
    anchors(html)
        .into_iter()
        .find(|anchor| {
            MAGNET_HINT_RE.is_match(&anchor.href) || MAGNET_HINT_RE.is_match(&anchor.label)
        })
        .map(|anchor| anchor.href)
        .or_else(|| meta_refresh_target(html))
}

#[async_trait]
impl SourceAdapter for DodiAdapter {
    fn source(&self) -> Source {
        Source::Dodi
    }

    #[tracing::instrument(skip(self), fields(source = "dodi"))]
    async fn search(&self, query: &str) -> Vec<Candidate> {
        match self.try_search(query).await {
            Ok(candidates) => {
                info!(count = candidates.len(), "dodi search complete");
                candidates
            }
            Err(error) => {
                warn!(error = %error, "dodi search failed");
                Vec::new()
            }
        }
    }

    #[tracing::instrument(skip(self), fields(source = "dodi"))]
    async fn resolve(&self, detail_url: &str) -> Option<String> {
        match self.try_resolve(detail_url).await {
            Ok(locator) => locator,
            Err(error) => {
                warn!(error = %error, "dodi resolution failed");
                None
            }
        }
    }
}
