//! Shared User-Agent strings and the browser header set used for scraping.
//!
//! Catalog sites sit behind bot filters that reject obvious tool traffic, so
//! listing and detail fetches present as a desktop Chrome. Traffic to the local
//! transfer backend identifies the tool honestly.

use reqwest::header::{
    ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CACHE_CONTROL, HeaderMap, HeaderValue, REFERER,
    UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use url::Url;

/// Desktop Chrome User-Agent sent on every catalog request.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const BROWSER_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// User-Agent for JSON-RPC traffic to the transfer backend.
#[must_use]
pub(crate) fn default_rpc_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("gamegrab/{version}")
}

/// Returns the `scheme://host/` origin used as Referer for `url`.
#[must_use]
pub(crate) fn referer_for(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    match url.port() {
        Some(port) => Some(format!("{}://{host}:{port}/", url.scheme())),
        None => Some(format!("{}://{host}/", url.scheme())),
    }
}

/// Builds the fixed browser header set for a request to `url`.
///
/// Encoding is pinned to `identity` so bodies never need decompression.
#[must_use]
pub(crate) fn browser_headers(url: &Url) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static(BROWSER_ACCEPT_LANGUAGE),
    );
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    if let Some(referer) = referer_for(url)
        && let Ok(value) = HeaderValue::from_str(&referer)
    {
        headers.insert(REFERER, value);
    }
    headers
}
