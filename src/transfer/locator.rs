//! Magnet tracker augmentation.
//!
//! Catalog magnets often carry few or dead trackers. Before a locator is
//! handed to the client, a fixed list of public trackers is appended as
//! extra `tr=` parameters.

use std::collections::HashSet;

/// Upper bound on `tr=` parameters in an augmented locator.
pub const MAX_TRACKERS: usize = 40;

/// Public trackers appended to every magnet, in preference order.
pub const SUPPLEMENTARY_TRACKERS: [&str; 16] = [
    "udp://tracker.opentrackr.org:1337/announce",
    "udp://open.stealth.si:80/announce",
    "udp://tracker.torrent.eu.org:451/announce",
    "udp://exodus.desync.com:6969/announce",
    "udp://tracker.tiny-vps.com:6969/announce",
    "udp://tracker.moeking.me:6969/announce",
    "udp://explodie.org:6969/announce",
    "udp://tracker.theoks.net:6969/announce",
    "udp://tracker1.bt.moack.co.kr:80/announce",
    "udp://tracker.dler.org:6969/announce",
    "udp://open.demonii.com:1337/announce",
    "udp://opentracker.io:6969/announce",
    "udp://tracker-udp.gbitt.info:80/announce",
    "udp://retracker01-msk-virt.corbina.net:80/announce",
    "http://tracker.openbittorrent.com:80/announce",
    "https://tracker.tamersunion.org:443/announce",
];

/// Appends [`SUPPLEMENTARY_TRACKERS`] to a magnet locator.
///
/// Trackers already present (compared by their percent-encoded form) are not
/// repeated, and appending stops once the locator holds [`MAX_TRACKERS`]
/// `tr=` parameters. Locators that are not magnets are returned unchanged.
#[must_use]
pub fn augment_locator(locator: &str) -> String {
    let locator = locator.trim();
    let Some(query) = locator.strip_prefix("magnet:?") else {
        return locator.to_string();
    };

    let mut seen: HashSet<String> = query
        .split('&')
        .filter_map(|param| param.strip_prefix("tr="))
        .map(normalize_tracker)
        .collect();
    let mut count = query
        .split('&')
        .filter(|param| param.starts_with("tr="))
        .count();

    let mut augmented = locator.to_string();
    for tracker in SUPPLEMENTARY_TRACKERS {
        if count >= MAX_TRACKERS {
            break;
        }
        let encoded = urlencoding::encode(tracker).into_owned();
        if !seen.insert(encoded.clone()) {
            continue;
        }
        augmented.push_str("&tr=");
        augmented.push_str(&encoded);
        count += 1;
    }
    augmented
}

/// Canonical encoded form of a `tr` value, whether it arrived encoded or not.
fn normalize_tracker(value: &str) -> String {
    let decoded = urlencoding::decode(value).map_or_else(|_| value.to_string(), |v| v.into_owned());
    urlencoding::encode(&decoded).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGNET: &str = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567&dn=Example";

    fn tracker_count(locator: &str) -> usize {
        locator.split('&').filter(|p| p.starts_with("tr=")).count()
    }

    #[test]
    fn test_appends_all_trackers_to_bare_magnet() {
        let augmented = augment_locator(MAGNET);
        assert!(augmented.starts_with(MAGNET));
        assert_eq!(tracker_count(&augmented), SUPPLEMENTARY_TRACKERS.len());
        assert!(augmented.contains("&tr=udp%3A%2F%2Ftracker.opentrackr.org%3A1337%2Fannounce"));
    }

    #[test]
    fn test_existing_trackers_not_repeated_in_either_encoding() {
        let plain = format!("{MAGNET}&tr=udp://tracker.opentrackr.org:1337/announce");
        let encoded = format!("{MAGNET}&tr=udp%3A%2F%2Fopen.stealth.si%3A80%2Fannounce");

        let augmented = augment_locator(&plain);
        assert_eq!(tracker_count(&augmented), SUPPLEMENTARY_TRACKERS.len());

        let augmented = augment_locator(&encoded);
        assert_eq!(tracker_count(&augmented), SUPPLEMENTARY_TRACKERS.len());
    }

    #[test]
    fn test_total_trackers_capped() {
        let mut crowded = MAGNET.to_string();
        for i in 0..35 {
            crowded.push_str(&format!("&tr=udp%3A%2F%2Ft{i}.example%3A80"));
        }
        let augmented = augment_locator(&crowded);
        assert_eq!(tracker_count(&augmented), MAX_TRACKERS);

        let mut full = MAGNET.to_string();
        for i in 0..45 {
            full.push_str(&format!("&tr=udp%3A%2F%2Ft{i}.example%3A80"));
        }
        assert_eq!(augment_locator(&full), full);
    }

    #[test]
    fn test_augmentation_is_idempotent() {
        let once = augment_locator(MAGNET);
        assert_eq!(augment_locator(&once), once);
    }

    #[test]
    fn test_non_magnet_unchanged() {
        assert_eq!(
            augment_locator("https://example.com/file.torrent"),
            "https://example.com/file.torrent"
        );
    }
}
