//! URL classification.
//!
//! Maps a raw catalog URL to one of the recognised kinds plus the opaque ID
//! embedded in it. The table is ordered; the first matching pattern wins and
//! its first capture group is the ID.

use std::sync::LazyLock;

use regex::Regex;

/// The recognised catalog URL kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UrlKind {
    /// Album/show/video release.
    Release,
    /// User playlist (hash router form).
    UserPlaylistHash,
    /// User playlist (library form).
    UserPlaylistLib,
    /// Shortened catalog playlist link; requires redirect resolution.
    CatalogShort,
    /// Video container (hash router form).
    VideoHash,
    /// Artist page.
    Artist,
    /// Exclusive livestream (container ID).
    ExclusiveLivestream,
    /// Exclusive livestream (watch link).
    WatchExclusiveLivestream,
    /// Purchased webcast (hash router form, show ID).
    MyWebcastHash,
    /// Purchased item via the storefront (demandware).
    Purchased,
    /// Purchased webcast (library form, container ID).
    MyWebcastLib,
    /// Watch page for a release.
    WatchRelease,
}

static PATTERNS: LazyLock<Vec<(Regex, UrlKind)>> = LazyLock::new(|| {
    // Order matters: first match wins.
    [
        (r"^https://play\.nugs\.net/release/(\d+)$", UrlKind::Release),
        (r"^https://play\.nugs\.net/#/playlists/playlist/(\d+)$", UrlKind::UserPlaylistHash),
        (r"^https://play\.nugs\.net/library/playlist/(\d+)$", UrlKind::UserPlaylistLib),
        (r"^(https://2nu\.gs/[a-zA-Z\d]+)$", UrlKind::CatalogShort),
        (r"^https://play\.nugs\.net/#/videos/artist/\d+/.+/(\d+)$", UrlKind::VideoHash),
        (r"^https://play\.nugs\.net/artist/(\d+)(?:/albums|/latest|)$", UrlKind::Artist),
        (r"^https://play\.nugs\.net/livestream/(\d+)/exclusive$", UrlKind::ExclusiveLivestream),
        (r"^https://play\.nugs\.net/watch/livestreams/exclusive/(\d+)$", UrlKind::WatchExclusiveLivestream),
        (r"^https://play\.nugs\.net/#/my-webcasts/\d+-(\d+)-\d+-\d+$", UrlKind::MyWebcastHash),
        (
            r"^https://www\.nugs\.net/on/demandware\.store/Sites-NugsNet-Site/default/(?:Stash-QueueVideo|NugsVideo-GetStashVideo)\?([a-zA-Z0-9=%&.-]+)$",
            UrlKind::Purchased,
        ),
        (r"^https://play\.nugs\.net/library/webcast/(\d+)$", UrlKind::MyWebcastLib),
        (r"^https://play\.nugs\.net/watch/release/(\d+)$", UrlKind::WatchRelease),
    ]
    .into_iter()
    .map(|(pattern, kind)| (Regex::new(pattern).unwrap(), kind))
    .collect()
});

/// Classify a URL, returning the extracted opaque ID and the kind.
#[must_use]
pub fn classify(url: &str) -> Option<(String, UrlKind)> {
    for (regex, kind) in PATTERNS.iter() {
        if let Some(caps) = regex.captures(url) {
            if let Some(id) = caps.get(1) {
                return Some((id.as_str().to_string(), *kind));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_release() {
        let (id, kind) = classify("https://play.nugs.net/release/12345").unwrap();
        assert_eq!(kind, UrlKind::Release);
        assert_eq!(id, "12345");
    }

    #[test]
    fn classifies_playlists() {
        let (id, kind) = classify("https://play.nugs.net/#/playlists/playlist/888").unwrap();
        assert_eq!(kind, UrlKind::UserPlaylistHash);
        assert_eq!(id, "888");

        let (id, kind) = classify("https://play.nugs.net/library/playlist/999").unwrap();
        assert_eq!(kind, UrlKind::UserPlaylistLib);
        assert_eq!(id, "999");
    }

    #[test]
    fn classifies_catalog_short_link() {
        let (id, kind) = classify("https://2nu.gs/Ab3xYz").unwrap();
        assert_eq!(kind, UrlKind::CatalogShort);
        assert_eq!(id, "https://2nu.gs/Ab3xYz");
    }

    #[test]
    fn classifies_video_hash() {
        let (id, kind) =
            classify("https://play.nugs.net/#/videos/artist/461/Billy%20Strings/23329").unwrap();
        assert_eq!(kind, UrlKind::VideoHash);
        assert_eq!(id, "23329");
    }

    #[test]
    fn classifies_artist_variants() {
        for url in [
            "https://play.nugs.net/artist/461",
            "https://play.nugs.net/artist/461/albums",
            "https://play.nugs.net/artist/461/latest",
        ] {
            let (id, kind) = classify(url).unwrap();
            assert_eq!(kind, UrlKind::Artist, "{url}");
            assert_eq!(id, "461");
        }
    }

    #[test]
    fn classifies_livestreams_and_webcasts() {
        let (id, kind) = classify("https://play.nugs.net/livestream/30329/exclusive").unwrap();
        assert_eq!(kind, UrlKind::ExclusiveLivestream);
        assert_eq!(id, "30329");

        let (_, kind) =
            classify("https://play.nugs.net/watch/livestreams/exclusive/30330").unwrap();
        assert_eq!(kind, UrlKind::WatchExclusiveLivestream);

        let (id, kind) =
            classify("https://play.nugs.net/#/my-webcasts/5034-23329-0-1").unwrap();
        assert_eq!(kind, UrlKind::MyWebcastHash);
        assert_eq!(id, "23329");

        let (_, kind) = classify("https://play.nugs.net/library/webcast/23331").unwrap();
        assert_eq!(kind, UrlKind::MyWebcastLib);
    }

    #[test]
    fn classifies_watch_release() {
        let (id, kind) = classify("https://play.nugs.net/watch/release/23340").unwrap();
        assert_eq!(kind, UrlKind::WatchRelease);
        assert_eq!(id, "23340");
    }

    #[test]
    fn classifies_purchased_with_query_capture() {
        let url = "https://www.nugs.net/on/demandware.store/Sites-NugsNet-Site/default/Stash-QueueVideo?showID=23329&skuID=12";
        let (id, kind) = classify(url).unwrap();
        assert_eq!(kind, UrlKind::Purchased);
        assert_eq!(id, "showID=23329&skuID=12");
    }

    #[test]
    fn unknown_urls_do_not_classify() {
        assert!(classify("https://example.com/release/1").is_none());
        assert!(classify("https://play.nugs.net/torrent/1").is_none());
        assert!(classify("not a url").is_none());
    }
}
