//! Extraction strategies shared by the source adapters.
//!
//! Listing pages are scraped with an ordered list of [`ListingPattern`]s: the
//! first pattern that yields any match wins. Detail pages are searched for a
//! magnet locator with [`MAGNET_PATTERNS`], again in priority order.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

use super::{Candidate, MAX_RESULTS_PER_SITE, SIZE_UNKNOWN, Source};

/// Compiles a regex at static init; panics on invalid pattern.
pub(crate) fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});"));
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?s)<[^>]*>"));
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"\s+"));
static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)(\d+(?:[.,]\d+)?)\s?(GB|MB|TB)\b"));
static PERCENT_ESCAPE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"%[0-9A-Fa-f]{2}"));
static ANCHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<a\s([^>]*)>(.*?)</a>"));
static HREF_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
});
static META_REFRESH_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<meta[^>]+http-equiv\s*=\s*["']refresh["'][^>]+content\s*=\s*["'][^"']*url\s*=\s*([^"'\s>]+)"#,
    )
});

static MAGNET_DOUBLE_QUOTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?i)href\s*=\s*"(magnet:\?xt=urn:btih:[a-z0-9]+[^"]*)""#)
});
static MAGNET_SINGLE_QUOTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?i)href\s*=\s*'(magnet:\?xt=urn:btih:[a-z0-9]+[^']*)'")
});
static MAGNET_MARKDOWN_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?i)\]\((magnet:\?xt=urn:btih:[a-z0-9]+[^)\s]*)\)")
});
static MAGNET_BARE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?i)(magnet:\?xt=urn:btih:[a-z0-9]+[^\s"'<>)\]]*)"#)
});

/// One way of reading `(detail_url, title[, size])` rows off a listing page.
///
/// Patterns use the named groups `url` and `title`, and optionally `size`.
pub(crate) struct ListingPattern {
    pub(crate) name: &'static str,
    pub(crate) regex: &'static LazyLock<Regex>,
}

/// A raw listing row before decoding and filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ListingRow {
    pub(crate) url: String,
    pub(crate) title: String,
    pub(crate) size: Option<String>,
}

/// Runs `patterns` in order and returns the rows of the first that matches.
pub(crate) fn extract_listing(html: &str, patterns: &[ListingPattern]) -> Vec<ListingRow> {
    for pattern in patterns {
        let rows: Vec<ListingRow> = pattern
            .regex
            .captures_iter(html)
            .filter_map(|caps| listing_row(&caps))
            .collect();
        if !rows.is_empty() {
            tracing::trace!(pattern = pattern.name, rows = rows.len(), "listing pattern matched");
            return rows;
        }
    }
    Vec::new()
}

fn listing_row(caps: &Captures<'_>) -> Option<ListingRow> {
    let url = caps.name("url")?.as_str().trim().to_string();
    let title = caps.name("title")?.as_str().to_string();
    let size = caps.name("size").map(|m| m.as_str().trim().to_string());
    Some(ListingRow { url, title, size })
}

/// Turns raw rows into candidates: absolutize, decode, filter noise, dedupe, cap.
pub(crate) fn build_candidates(
    source: Source,
    rows: Vec<ListingRow>,
    page_url: &Url,
    is_noise: impl Fn(&str) -> bool,
) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for row in rows {
        let name = clean_title(&row.title);
        if name.is_empty() || is_noise(&name) {
            continue;
        }
        let Some(detail_url) = absolutize_url(&decode_html_entities(&row.url), page_url) else {
            continue;
        };
        if !seen.insert(detail_url.clone()) {
            continue;
        }

        let size = extract_size(&name)
            .or_else(|| row.size.as_deref().and_then(extract_size))
            .unwrap_or_else(|| SIZE_UNKNOWN.to_string());

        candidates.push(Candidate::new(
            format!("{}-{}", source.id(), candidates.len()),
            name,
            size,
            source,
            detail_url,
        ));
        if candidates.len() == MAX_RESULTS_PER_SITE {
            break;
        }
    }

    candidates
}

/// Strips tags, decodes entities, and collapses whitespace.
#[must_use]
pub(crate) fn clean_title(raw: &str) -> String {
    let without_tags = TAG_RE.replace_all(raw, " ");
    let decoded = decode_html_entities(&without_tags);
    WHITESPACE_RE.replace_all(decoded.trim(), " ").into_owned()
}

/// Decodes numeric and common named HTML entities in a single pass.
///
/// Unknown named entities are left untouched.
#[must_use]
pub fn decode_html_entities(value: &str) -> String {
    ENTITY_RE
        .replace_all(value, |caps: &Captures<'_>| {
            let body = &caps[1];
            decode_entity(body).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn decode_entity(body: &str) -> Option<String> {
    if let Some(numeric) = body.strip_prefix('#') {
        let code = if let Some(hex) = numeric.strip_prefix(['x', 'X']) {
            u32::from_str_radix(hex, 16).ok()?
        } else {
            numeric.parse::<u32>().ok()?
        };
        let ch = char::from_u32(code)?;
        let ch = if ch == '\u{a0}' { ' ' } else { ch };
        return Some(ch.to_string());
    }

    let decoded = match body {
        "amp" => "&",
        "quot" => "\"",
        "apos" => "'",
        "lt" => "<",
        "gt" => ">",
        "nbsp" => " ",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "trade" => "\u{2122}",
        "reg" => "\u{00ae}",
        "copy" => "\u{00a9}",
        _ => return None,
    };
    Some(decoded.to_string())
}

/// Extracts a normalized size such as `"12.4 GB"` from free text.
#[must_use]
pub fn extract_size(text: &str) -> Option<String> {
    SIZE_RE.captures(text).map(|caps| {
        let number = caps[1].replace(',', ".");
        format!("{number} {}", caps[2].to_ascii_uppercase())
    })
}

/// Priority-ordered magnet extraction strategies for detail pages.
pub(crate) static MAGNET_PATTERNS: [(&str, &LazyLock<Regex>); 4] = [
    ("double_quoted_href", &MAGNET_DOUBLE_QUOTED_RE),
    ("single_quoted_href", &MAGNET_SINGLE_QUOTED_RE),
    ("markdown_link", &MAGNET_MARKDOWN_RE),
    ("bare_text", &MAGNET_BARE_RE),
];

/// Finds the first magnet locator in `html` and returns it decoded.
#[must_use]
pub fn extract_magnet(html: &str) -> Option<String> {
    MAGNET_PATTERNS.iter().find_map(|(name, regex)| {
        let raw = regex.captures(html)?.get(1)?.as_str();
        tracing::trace!(pattern = *name, "magnet pattern matched");
        Some(decode_locator(raw))
    })
}

/// Unescapes HTML entities, then percent-decodes only if escapes remain.
#[must_use]
pub fn decode_locator(raw: &str) -> String {
    let unescaped = decode_html_entities(raw.trim());
    if !PERCENT_ESCAPE_RE.is_match(&unescaped) {
        return unescaped;
    }
    match urlencoding::decode(&unescaped) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => unescaped,
    }
}

/// An anchor element reduced to its href and visible label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Anchor {
    pub(crate) href: String,
    pub(crate) label: String,
}

/// Lists anchors with an href, labels cleaned and lowercased.
pub(crate) fn anchors(html: &str) -> Vec<Anchor> {
    ANCHOR_RE
        .captures_iter(html)
        .filter_map(|caps| {
            let attrs = caps.get(1)?.as_str();
            let href_caps = HREF_ATTR_RE.captures(attrs)?;
            let href = href_caps.get(1).or_else(|| href_caps.get(2))?.as_str();
            Some(Anchor {
                href: decode_html_entities(href.trim()),
                label: clean_title(caps.get(2)?.as_str()).to_lowercase(),
            })
        })
        .filter(|anchor| !anchor.href.is_empty() && !anchor.href.starts_with('#'))
        .collect()
}

/// Returns the target of a `<meta http-equiv="refresh">` tag, if any.
pub(crate) fn meta_refresh_target(html: &str) -> Option<String> {
    META_REFRESH_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| decode_html_entities(m.as_str()))
}

/// Resolves a possibly relative URL string against a base URL.
#[must_use]
pub(crate) fn absolutize_url(value: &str, base_url: &Url) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if value.starts_with("http://") || value.starts_with("https://") {
        return Some(value.to_string());
    }
    if value.starts_with("//") {
        return Some(format!("{}:{value}", base_url.scheme()));
    }
    base_url.join(value).ok().map(|url| url.to_string())
}
