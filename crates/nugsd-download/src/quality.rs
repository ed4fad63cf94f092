//! Audio quality classification and selection.
//!
//! Stream URLs returned by the stream-meta endpoint encode the format in the
//! path. A fixed substring table maps them to `Quality` descriptors; a fixed
//! fallback ladder picks a replacement when the desired format is missing.

/// Descriptor of an available audio variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Quality {
    /// Human-readable format description, e.g. "16-bit / 44.1 kHz FLAC".
    pub specs: String,
    /// File extension, dot included.
    pub extension: &'static str,
    /// Stream URL this quality was resolved from.
    pub url: String,
    /// Numeric format code (1 ALAC, 2 FLAC, 3 MQA, 4 360RA, 5 AAC, 6 HLS).
    pub format: u8,
}

/// The HLS format code; such URLs point at a master manifest.
pub const FORMAT_HLS: u8 = 6;

/// Substring patterns mapping stream URLs to quality descriptors.
const QUALITY_TABLE: &[(&str, &str, &str, u8)] = &[
    (".alac16/", "16-bit / 44.1 kHz ALAC", ".m4a", 1),
    (".flac16/", "16-bit / 44.1 kHz FLAC", ".flac", 2),
    (".mqa24/", "24-bit / 48 kHz MQA", ".flac", 3),
    (".flac?", "FLAC", ".flac", 2),
    (".s360/", "360 Reality Audio", ".mp4", 4),
    (".aac150/", "150 Kbps AAC", ".m4a", 5),
    (".m4a?", "AAC", ".m4a", 5),
    (".m3u8?", "", ".m4a", FORMAT_HLS),
];

/// Classify a stream URL against the quality table.
#[must_use]
pub fn query_quality(stream_url: &str) -> Option<Quality> {
    QUALITY_TABLE
        .iter()
        .find(|(needle, ..)| stream_url.contains(needle))
        .map(|(_, specs, extension, format)| Quality {
            specs: (*specs).to_string(),
            extension,
            url: stream_url.to_string(),
            format: *format,
        })
}

/// Quality fallback order when the desired format isn't available.
#[must_use]
pub const fn track_fallback(format: u8) -> Option<u8> {
    match format {
        1 => Some(2), // ALAC -> FLAC
        2 => Some(5), // FLAC -> AAC
        3 => Some(2), // MQA -> FLAC
        4 => Some(3), // 360 -> MQA
        _ => None,
    }
}

/// Select a quality: exact match, then the fallback ladder, then the first
/// available.
#[must_use]
pub fn choose_quality(quals: &[Quality], want_format: u8) -> Option<&Quality> {
    if let Some(exact) = quals.iter().find(|q| q.format == want_format) {
        return Some(exact);
    }
    if let Some(fallback) = track_fallback(want_format) {
        tracing::info!(wanted = want_format, fallback, "Track format unavailable, falling back");
        if let Some(q) = quals.iter().find(|q| q.format == fallback) {
            return Some(q);
        }
    }
    quals.first()
}

/// True when every resolved URL is an HLS manifest.
#[must_use]
pub fn is_hls_only(quals: &[Quality]) -> bool {
    !quals.is_empty() && quals.iter().all(|q| q.url.contains(".m3u8?"))
}

/// Map a video format code to a target resolution string.
#[must_use]
pub const fn resolve_res(video_format: u8) -> &'static str {
    match video_format {
        1 => "480",
        2 => "720",
        4 => "1440",
        5 => "2160",
        _ => "1080",
    }
}

/// Resolution fallback ladder: each step down when the target is missing.
#[must_use]
pub fn res_fallback(res: &str) -> Option<&'static str> {
    match res {
        "720" => Some("480"),
        "1080" => Some("720"),
        "1440" => Some("1080"),
        _ => None,
    }
}

/// Format a bare resolution for display and filenames ("1080p", "4K").
#[must_use]
pub fn format_res(res: &str) -> String {
    if res == "2160" {
        "4K".to_string()
    } else {
        format!("{res}p")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quality(format: u8, url: &str) -> Quality {
        query_quality(url).unwrap_or(Quality {
            specs: String::new(),
            extension: ".bin",
            url: url.to_string(),
            format,
        })
    }

    #[test]
    fn classifies_known_stream_urls() {
        let q = query_quality("https://s.nugs.net/x.flac16/track.flac?token=1").unwrap();
        assert_eq!(q.format, 2);
        assert_eq!(q.extension, ".flac");
        assert_eq!(q.specs, "16-bit / 44.1 kHz FLAC");

        let q = query_quality("https://s.nugs.net/x.alac16/track.m4a?token=1").unwrap();
        assert_eq!(q.format, 1);

        let q = query_quality("https://s.nugs.net/hls/master.m3u8?token=1").unwrap();
        assert_eq!(q.format, FORMAT_HLS);
        assert_eq!(q.extension, ".m4a");

        assert!(query_quality("https://s.nugs.net/plain/track.ogg").is_none());
    }

    #[test]
    fn exact_format_wins() {
        let quals = vec![
            quality(5, "https://s/x.aac150/t.m4a?a"),
            quality(2, "https://s/x.flac16/t.flac?a"),
        ];
        assert_eq!(choose_quality(&quals, 2).unwrap().format, 2);
    }

    #[test]
    fn fallback_ladder_applies() {
        // ALAC wanted, only FLAC and AAC available -> FLAC
        let quals = vec![
            quality(2, "https://s/x.flac16/t.flac?a"),
            quality(5, "https://s/x.aac150/t.m4a?a"),
        ];
        assert_eq!(choose_quality(&quals, 1).unwrap().format, 2);

        // FLAC wanted, only ALAC and AAC available -> AAC
        let quals = vec![
            quality(1, "https://s/x.alac16/t.m4a?a"),
            quality(5, "https://s/x.aac150/t.m4a?a"),
        ];
        assert_eq!(choose_quality(&quals, 2).unwrap().format, 5);
    }

    #[test]
    fn first_available_when_fallback_missing() {
        let quals = vec![quality(4, "https://s/x.s360/t.mp4?a")];
        assert_eq!(choose_quality(&quals, 5).unwrap().format, 4);
        assert!(choose_quality(&[], 2).is_none());
    }

    #[test]
    fn hls_only_detection() {
        let hls = vec![quality(FORMAT_HLS, "https://s/hls/master.m3u8?a")];
        assert!(is_hls_only(&hls));

        let mixed = vec![
            quality(FORMAT_HLS, "https://s/hls/master.m3u8?a"),
            quality(2, "https://s/x.flac16/t.flac?a"),
        ];
        assert!(!is_hls_only(&mixed));
        assert!(!is_hls_only(&[]));
    }

    #[test]
    fn resolution_mapping_and_ladder() {
        assert_eq!(resolve_res(1), "480");
        assert_eq!(resolve_res(3), "1080");
        assert_eq!(resolve_res(5), "2160");

        assert_eq!(res_fallback("1440"), Some("1080"));
        assert_eq!(res_fallback("1080"), Some("720"));
        assert_eq!(res_fallback("720"), Some("480"));
        assert_eq!(res_fallback("480"), None);
        assert_eq!(res_fallback("2160"), None);

        assert_eq!(format_res("720"), "720p");
        assert_eq!(format_res("2160"), "4K");
    }
}
