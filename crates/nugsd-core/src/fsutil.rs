//! Filename sanitisation.

use std::sync::LazyLock;

use regex::Regex;

/// Characters forbidden in filenames across the supported platforms.
static SAN_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[\\/:*?"<>|]"#).unwrap());

/// Replace forbidden filename characters with `_` and trim trailing
/// whitespace and dots.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let san = SAN_REGEX.replace_all(name, "_");
    san.trim_start()
        .trim_end_matches(|c: char| c.is_whitespace() || c == '.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_forbidden_characters() {
        assert_eq!(
            sanitize_filename(r#"AC/DC: Live "At" <The> Venue?"#),
            "AC_DC_ Live _At_ _The_ Venue_"
        );
    }

    #[test]
    fn trims_trailing_whitespace_and_dots() {
        assert_eq!(sanitize_filename("Encore... "), "Encore");
        assert_eq!(sanitize_filename("  Set One  "), "Set One");
    }

    #[test]
    fn plain_names_pass_through() {
        assert_eq!(sanitize_filename("01. Opening Jam"), "01. Opening Jam");
    }

    #[test]
    fn produced_names_contain_no_forbidden_characters() {
        let out = sanitize_filename(r#"a\b/c:d*e?f"g<h>i|j"#);
        assert!(!out.contains(|c| r#"<>:"|?*/\"#.contains(c)));
    }
}
