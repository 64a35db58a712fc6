//! Catalog source adapters.
//!
//! Each adapter turns a search query into [`Candidate`]s scraped from one
//! catalog site, and later turns a candidate's detail page into a magnet
//! locator. Adapters never fail outward: a broken site yields no candidates
//! or no locator, and the reason is logged.
//!
//! # Architecture
//!
//! - [`SourceAdapter`] - Async trait implemented per site
//! - [`FitGirlAdapter`] - WordPress catalog with magnets embedded on the post
//! - [`DodiAdapter`] - WordPress catalog that hides magnets behind "Get Link" pages
//! - [`LeetxAdapter`] - 1337x-style torrent index with tabular listings
//! - [`extract`] helpers - ordered extraction strategies shared by all adapters

mod dodi;
pub mod extract;
mod fitgirl;
mod leetx;

pub use dodi::DodiAdapter;
pub use fitgirl::FitGirlAdapter;
pub use leetx::LeetxAdapter;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::fetch::Fetcher;

/// Size placeholder when the listing does not reveal a size.
pub const SIZE_UNKNOWN: &str = "See details";

/// Maximum candidates a single adapter returns from one search.
pub const MAX_RESULTS_PER_SITE: usize = 10;

/// Catalog site that produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    /// fitgirl-repacks.site
    #[serde(rename = "fitgirl")]
    FitGirl,
    /// dodi-repacks.site
    #[serde(rename = "dodi")]
    Dodi,
    /// 1337x torrent index
    #[serde(rename = "1337x")]
    LeetX,
}

impl Source {
    /// All known sources in discovery order.
    pub const ALL: [Source; 3] = [Source::FitGirl, Source::Dodi, Source::LeetX];

    /// Stable identifier, also used as candidate id prefix.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::FitGirl => "fitgirl",
            Self::Dodi => "dodi",
            Self::LeetX => "1337x",
        }
    }

    /// Matches a free-form source label by case-insensitive substring.
    ///
    /// `"FitGirl Repacks"`, `"fitgirl"` and `"source:FITGIRL"` all match
    /// [`Source::FitGirl`].
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        let lower = label.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|source| lower.contains(source.id()))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// A discovered release that has not been resolved to a locator yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Source-prefixed id, unique within one discovery response.
    pub id: String,
    /// Entity-decoded title.
    pub name: String,
    /// Size parsed from the title, or [`SIZE_UNKNOWN`].
    pub size: String,
    /// Adapter that produced the candidate.
    pub source: Source,
    /// Absolute URL of the page that leads to the locator.
    pub detail_url: String,
    /// Filled lazily by resolution; always `None` after discovery.
    pub resource_locator: Option<String>,
}

impl Candidate {
    /// Creates an unresolved candidate.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        size: impl Into<String>,
        source: Source,
        detail_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            size: size.into(),
            source,
            detail_url: detail_url.into(),
            resource_locator: None,
        }
    }

    /// Records the resolved locator. Returns false if one was already set.
    pub fn set_resource_locator(&mut self, locator: impl Into<String>) -> bool {
        if self.resource_locator.is_some() {
            return false;
        }
        self.resource_locator = Some(locator.into());
        true
    }
}

/// Site-specific search and resolution.
///
/// Uses `async_trait` so adapters can be held as `Box<dyn SourceAdapter>`.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Which source this adapter scrapes.
    fn source(&self) -> Source;

    /// Searches the site's listing page. Never fails; errors yield an empty list.
    async fn search(&self, query: &str) -> Vec<Candidate>;

    /// Extracts a magnet locator from a detail page. Never fails; errors yield `None`.
    async fn resolve(&self, detail_url: &str) -> Option<String>;
}

/// Builds the default adapter set in discovery order.
#[must_use]
pub fn default_adapters(fetcher: &Fetcher) -> Vec<Box<dyn SourceAdapter>> {
    vec![
        Box::new(FitGirlAdapter::new(fetcher.clone())),
        Box::new(DodiAdapter::new(fetcher.clone())),
        Box::new(LeetxAdapter::new(fetcher.clone())),
    ]
}

/// Builds the listing URL `base + path_and_query` with `query` escaped.
pub(crate) fn search_url(base_url: &str, template: &str, query: &str) -> String {
    let escaped = urlencoding::encode(query.trim());
    format!(
        "{}{}",
        base_url.trim_end_matches('/'),
        template.replace("{query}", &escaped)
    )
}
