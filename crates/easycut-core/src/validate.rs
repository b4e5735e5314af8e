//! Resource identifier validation.
//!
//! Admission check for batch entries. Only the URL *shape* is inspected:
//! no network access happens here, and an entry that passes is trusted for
//! the rest of its lifecycle.
//!
//! # Supported hosts
//!
//! - `youtube.com` (optionally `www.`, `m.` or `music.`)
//! - `youtu.be`
//! - `youtube-nocookie.com`
//!
//! The scheme is optional, matching what users paste from address bars.

use std::sync::LazyLock;

use regex::Regex;

static HOST_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^(https?://)?(www\.|m\.|music\.)?(youtube|youtu|youtube-nocookie)\.(com|be)/")
        .ok()
});

static VIDEO_ID_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?:[?&]v=|youtu\.be/|/shorts/|/live/|/embed/)([A-Za-z0-9_-]{11})(?:[^A-Za-z0-9_-]|$)",
    )
    .ok()
});

/// Check whether a resource identifier looks like a supported URL.
///
/// ```rust
/// use easycut_core::validate::validate_resource_id;
///
/// assert!(validate_resource_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
/// assert!(validate_resource_id("youtu.be/dQw4w9WgXcQ"));
/// assert!(!validate_resource_id("not-a-url"));
/// ```
#[must_use]
pub fn validate_resource_id(resource_id: &str) -> bool {
    let trimmed = resource_id.trim();
    !trimmed.is_empty()
        && HOST_PATTERN
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(trimmed))
}

/// Extract the 11-character video id from a URL, if the URL carries one.
///
/// This is the cheapest "best known" unique id available before a fetch and
/// is what the dedup check uses when it can. Playlist and channel URLs
/// without a `v=` parameter yield `None`.
#[must_use]
pub fn extract_video_id(resource_id: &str) -> Option<String> {
    VIDEO_ID_PATTERN
        .as_ref()?
        .captures(resource_id.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Sanitize a string for use as a filename.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let invalid_chars = ['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

    let sanitized: String = name
        .chars()
        .map(|c| if invalid_chars.contains(&c) { '_' } else { c })
        .collect();

    let trimmed = sanitized.trim().trim_matches('.');

    // Leave room for an extension; cut on a char boundary.
    trimmed.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    mod validate_resource_id_tests {
        use super::*;

        #[test]
        fn test_accepts_watch_url() {
            assert!(validate_resource_id(
                "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
            ));
        }

        #[test]
        fn test_accepts_without_scheme_or_www() {
            assert!(validate_resource_id("youtube.com/watch?v=dQw4w9WgXcQ"));
            assert!(validate_resource_id("http://youtube.com/playlist?list=PLx"));
        }

        #[test]
        fn test_accepts_short_and_nocookie_hosts() {
            assert!(validate_resource_id("https://youtu.be/dQw4w9WgXcQ"));
            assert!(validate_resource_id(
                "https://www.youtube-nocookie.com/embed/dQw4w9WgXcQ"
            ));
            assert!(validate_resource_id("https://music.youtube.com/watch?v=abc"));
        }

        #[test]
        fn test_trims_whitespace() {
            assert!(validate_resource_id("  https://youtu.be/dQw4w9WgXcQ \n"));
        }

        #[test]
        fn test_rejects_other_hosts() {
            assert!(!validate_resource_id("https://vimeo.com/12345"));
            assert!(!validate_resource_id("https://example.com/youtube.com/"));
            assert!(!validate_resource_id("ftp://youtube.com/watch?v=x"));
        }

        #[test]
        fn test_rejects_garbage() {
            assert!(!validate_resource_id(""));
            assert!(!validate_resource_id("   "));
            assert!(!validate_resource_id("not-a-url"));
            assert!(!validate_resource_id("https://youtube.com"));
        }
    }

    mod extract_video_id_tests {
        use super::*;

        #[test]
        fn test_watch_url() {
            assert_eq!(
                extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10"),
                Some("dQw4w9WgXcQ".to_string())
            );
        }

        #[test]
        fn test_watch_url_v_not_first() {
            assert_eq!(
                extract_video_id("https://www.youtube.com/watch?list=PLx&v=dQw4w9WgXcQ"),
                Some("dQw4w9WgXcQ".to_string())
            );
        }

        #[test]
        fn test_short_shorts_and_live_urls() {
            assert_eq!(
                extract_video_id("https://youtu.be/dQw4w9WgXcQ?si=abc"),
                Some("dQw4w9WgXcQ".to_string())
            );
            assert_eq!(
                extract_video_id("https://youtube.com/shorts/dQw4w9WgXcQ"),
                Some("dQw4w9WgXcQ".to_string())
            );
            assert_eq!(
                extract_video_id("https://youtube.com/live/dQw4w9WgXcQ"),
                Some("dQw4w9WgXcQ".to_string())
            );
        }

        #[test]
        fn test_no_id() {
            assert_eq!(
                extract_video_id("https://www.youtube.com/playlist?list=PLtest"),
                None
            );
            assert_eq!(extract_video_id("https://www.youtube.com/@channel"), None);
            // Too short to be a video id.
            assert_eq!(extract_video_id("https://service.tld/watch?v=abc"), None);
        }
    }

    #[test]
    fn test_sanitize_filename_invalid_chars() {
        assert_eq!(sanitize_filename("a/b:c*d?"), "a_b_c_d_");
    }

    #[test]
    fn test_sanitize_filename_trim_and_length() {
        assert_eq!(sanitize_filename("  .title.  "), "title");
        let long = "é".repeat(300);
        assert_eq!(sanitize_filename(&long).chars().count(), 200);
    }
}
