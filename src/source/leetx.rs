//! 1337x torrent index adapter.
//!
//! Listings are HTML tables; each row links to `/torrent/<id>/<slug>/` and
//! carries a size column. Torrent pages expose the magnet in an anchor.

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

const DEFAULT_BASE_URL: &str = "https://1337x.to";
const SEARCH_TEMPLATE: &str = "/search/{query}/1/";

static TABLE_ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<a[^>]*href="(?P<url>/torrent/[^"]+)"[^>]*>(?P<title>.*?)</a>.*?<td[^>]*class="[^"]*coll-4[^"]*size[^"]*"[^>]*>(?P<size>[^<]*)<"#,
    )
});
static TORRENT_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)<a[^>]*href="(?P<url>[^"]*/torrent/\d+/[^"]*)"[^>]*>(?P<title>.*?)</a>"#)
});
static NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r"(?i)(\bupdate\s+only\b|\bcrack\s+only\b|\bsoundtrack\b|\bost\b|\btrainer\b)",
    )
});

static LISTING_PATTERNS: [ListingPattern; 2] = [
    ListingPattern {
        name: "table_row",
        regex: &TABLE_ROW_RE,
    },
    ListingPattern {
        name: "torrent_link",
        regex: &TORRENT_LINK_RE,
    },
];

/// Adapter for 1337x-style torrent indexes.
#[derive(Debug, Clone)]
pub struct LeetxAdapter {
    fetcher: Fetcher,
    base_url: String,
}

impl LeetxAdapter {
    /// Creates an adapter against the public index.
    #[must_use]
    pub fn new(fetcher: Fetcher) -> Self {
        Self::with_base_url(fetcher, DEFAULT_BASE_URL)
    }

    /// Creates an adapter against a mirror or test server.
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
        debug!(rows = rows.len(), "1337x listing rows extracted");
        Ok(build_candidates(Source::LeetX, rows, &page_url, is_noise))
    }
}

fn is_noise(title: &str) -> bool {
    NOISE_RE.is_match(title)
}

#[async_trait]
impl SourceAdapter for LeetxAdapter {
    fn source(&self) -> Source {
        Source::LeetX
    }

    #[tracing::instrument(skip(self), fields(source = "1337x"))]
    async fn search(&self, query: &str) -> Vec<Candidate> {
        match self.try_search(query).await {
            Ok(candidates) => {
                info!(count = candidates.len(), "1337x search complete");
                candidates
            }
            Err(error) => {
                warn!(error = %error, "1337x search failed");
                Vec::new()
            }
        }
    }

    #[tracing::instrument(skip(self), fields(source = "1337x"))]
    async fn resolve(&self, detail_url: &str) -> Option<String> {
        match self.fetcher.fetch(detail_url, self.fetcher.retries()).await {
            Ok(html) => extract_magnet(&html),
            Err(error) => {
                warn!(error = %error, "1337x torrent page fetch failed");
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const TABLE: &str = r#"
        <table class="table-list"><tbody>
        <tr>
          <td class="coll-1 name"><a href="/sub/10/0/" class="icon"><i></i></a><a href="/torrent/5551/Example-Game-Repack/">Example Game Repack</a></td>
          <td class="coll-2 seeds">120</td>
          <td class="coll-4 size mob-uploader">8.2 GB<span class="seeds">120</span></td>
        </tr>
        <tr>
          <td class="coll-1 name"><a href="/torrent/5552/Example-Game-OST/">Example Game OST</a></td>
          <td class="coll-4 size mob-user">300 MB<span class="seeds">4</span></td>
        </tr>
        </tbody></table>
    "#;

    #[test]
    fn test_table_rows_take_size_from_column() {
        let page = Url::parse("https://1337x.to/search/example/1/").unwrap();
        let rows = extract_listing(TABLE, &LISTING_PATTERNS);
        assert_eq!(rows.len(), 2);

        let candidates = build_candidates(Source::LeetX, rows, &page, is_noise);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, "1337x-0");
        assert_eq!(candidates[0].size, "8.2 GB");
        assert_eq!(
            candidates[0].detail_url,
            "https://1337x.to/torrent/5551/Example-Game-Repack/"
        );
    }

    #[test]
    fn test_generic_torrent_links_without_table() {
        let html = r#"<li><a href="https://mirror.example/torrent/77/Game-X/">Game X [4 GB]</a></li>"#;
        let rows = extract_listing(html, &LISTING_PATTERNS);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].size, None);
    }

    #[test]
    fn test_noise_heuristics() {
        assert!(is_noise("Game Crack Only"));
        assert!(is_noise("Game Original Soundtrack"));
        assert!(is_noise("Game +12 Trainer"));
        assert!(!is_noise("Ghost of Tsushima"));
    }
}
