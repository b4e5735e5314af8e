//! Failure classification for media engine errors.
//!
//! The media engine only reports free-text failures, so classification is a
//! case-insensitive substring match against an ordered keyword table. The
//! first row that matches wins, which means more specific phrases must sit
//! above the generic ones they contain ("requested format is not available"
//! above "not available").
//!
//! The resulting [`ErrorKind`] is the contract the orchestrator relies on:
//! only [`ErrorKind::AuthBlocked`] is batch-fatal, every other kind stays
//! isolated to its own job.

use serde::{Deserialize, Serialize};

/// Maximum number of characters of raw engine output kept in the fallback
/// message for unclassified failures.
pub const MAX_RAW_MESSAGE_CHARS: usize = 120;

/// Stable failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Private video or content requiring a login.
    PrivateOrRestricted,
    /// Age-gated content.
    AgeRestricted,
    /// Removed, deleted or otherwise unavailable content.
    Unavailable,
    /// Blocked in the current region.
    GeoBlocked,
    /// Scheduled live stream or premiere that has not started yet.
    NotYetLive,
    /// The remote service is throttling requests.
    RateLimited,
    /// Connection-level failure.
    NetworkFailure,
    /// No format matches the requested quality/format selector.
    NoSuitableFormat,
    /// Transcoding, merging or tagging failed after the transfer.
    PostProcessingFailure,
    /// Taken down on copyright grounds.
    CopyrightBlocked,
    /// Channel membership required.
    MembersOnly,
    /// Premium subscription required.
    PremiumOnly,
    /// Credential material could not be read (e.g. the browser holding the
    /// cookie database is still open). Repeats for every job until the user
    /// intervenes.
    AuthBlocked,
    /// Nothing in the table matched.
    Unknown,
}

impl ErrorKind {
    /// Whether this failure should stop dispatch of the rest of the batch.
    #[must_use]
    pub const fn is_batch_fatal(self) -> bool {
        matches!(self, Self::AuthBlocked)
    }

    /// Whether resubmitting the same resource later has a realistic chance
    /// of succeeding.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::NetworkFailure | Self::Unknown)
    }

    /// Short user-facing explanation for this kind.
    #[must_use]
    pub const fn friendly_message(self) -> &'static str {
        match self {
            Self::PrivateOrRestricted => "This video is private or requires signing in.",
            Self::AgeRestricted => "This video is age-restricted. Sign in to download it.",
            Self::Unavailable => "This video is unavailable or has been removed.",
            Self::GeoBlocked => "This video is not available in your region.",
            Self::NotYetLive => "This live stream or premiere has not started yet.",
            Self::RateLimited => "Too many requests. Wait a while and try again.",
            Self::NetworkFailure => "Network error. Check your connection and try again.",
            Self::NoSuitableFormat => "No format matches the requested quality.",
            Self::PostProcessingFailure => "Post-processing failed. Check that FFmpeg is installed.",
            Self::CopyrightBlocked => "This video was blocked on copyright grounds.",
            Self::MembersOnly => "This video is only available to channel members.",
            Self::PremiumOnly => "This video requires a Premium subscription.",
            Self::AuthBlocked => {
                "Could not read browser cookies. Close your browser and try again."
            }
            Self::Unknown => "Download failed.",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PrivateOrRestricted => write!(f, "Private or restricted"),
            Self::AgeRestricted => write!(f, "Age restricted"),
            Self::Unavailable => write!(f, "Unavailable"),
            Self::GeoBlocked => write!(f, "Geo blocked"),
            Self::NotYetLive => write!(f, "Not yet live"),
            Self::RateLimited => write!(f, "Rate limited"),
            Self::NetworkFailure => write!(f, "Network failure"),
            Self::NoSuitableFormat => write!(f, "No suitable format"),
            Self::PostProcessingFailure => write!(f, "Post-processing failure"),
            Self::CopyrightBlocked => write!(f, "Copyright blocked"),
            Self::MembersOnly => write!(f, "Members only"),
            Self::PremiumOnly => write!(f, "Premium only"),
            Self::AuthBlocked => write!(f, "Authentication blocked"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A classified failure: the kind plus the message shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    /// Failure kind.
    pub kind: ErrorKind,
    /// Human-readable message, never the full raw engine output.
    pub message: String,
}

/// Ordered keyword table. Keywords are lowercase.
const RULES: &[(&[&str], ErrorKind)] = &[
    (
        &[
            "could not copy chrome cookie database",
            "could not copy cookie database",
            "cookie database",
            "failed to decrypt",
            "close your browser",
            "browser must be closed",
            "keyring",
        ],
        ErrorKind::AuthBlocked,
    ),
    (
        &[
            "http error 429",
            "too many requests",
            "rate limit",
            "rate-limit",
            "not a bot",
        ],
        ErrorKind::RateLimited,
    ),
    (
        &[
            "age-restricted",
            "age restricted",
            "confirm your age",
            "inappropriate for some users",
        ],
        ErrorKind::AgeRestricted,
    ),
    (
        &["members-only", "members only", "join this channel"],
        ErrorKind::MembersOnly,
    ),
    (
        &["premium members", "youtube premium", "premium only"],
        ErrorKind::PremiumOnly,
    ),
    (&["copyright"], ErrorKind::CopyrightBlocked),
    (
        &[
            "not available in your country",
            "made this video available in your country",
            "blocked it in your country",
            "geo restricted",
            "geo-restricted",
            "geoblocked",
            "geo-blocked",
        ],
        ErrorKind::GeoBlocked,
    ),
    (
        &[
            "premieres in",
            "live event will begin",
            "will begin in",
            "scheduled to start",
            "is not yet live",
            "has not started",
        ],
        ErrorKind::NotYetLive,
    ),
    (
        &[
            "requested format is not available",
            "requested format not available",
            "no video formats found",
            "no suitable format",
        ],
        ErrorKind::NoSuitableFormat,
    ),
    (
        &[
            "private video",
            "sign in to confirm",
            "login required",
            "http error 403",
            "forbidden",
        ],
        ErrorKind::PrivateOrRestricted,
    ),
    (
        &[
            "postprocessing",
            "post-processing",
            "ffmpeg",
            "ffprobe",
            "conversion failed",
            "error opening output",
        ],
        ErrorKind::PostProcessingFailure,
    ),
    (
        &[
            "timed out",
            "timeout",
            "connection reset",
            "connection refused",
            "connection aborted",
            "network is unreachable",
            "name resolution",
            "getaddrinfo",
            "ssl",
            "certificate",
            "unable to download webpage",
            "urlopen error",
            "incompleteread",
        ],
        ErrorKind::NetworkFailure,
    ),
    (
        &[
            "video unavailable",
            "has been removed",
            "does not exist",
            "account associated with this video has been terminated",
            "not available",
            "http error 404",
        ],
        ErrorKind::Unavailable,
    ),
];

/// Classify a raw failure message.
///
/// ```rust
/// use easycut_core::classify::{classify, ErrorKind};
///
/// let classified = classify("ERROR: [youtube] abc: Private video. Sign in if you've been granted access");
/// assert_eq!(classified.kind, ErrorKind::PrivateOrRestricted);
/// ```
#[must_use]
pub fn classify(raw_message: &str) -> ClassifiedError {
    let lower = raw_message.to_lowercase();

    for (keywords, kind) in RULES {
        if keywords.iter().any(|keyword| lower.contains(keyword)) {
            return ClassifiedError {
                kind: *kind,
                message: kind.friendly_message().to_string(),
            };
        }
    }

    ClassifiedError {
        kind: ErrorKind::Unknown,
        message: truncate_raw(raw_message),
    }
}

/// Bounded copy of the raw message used when nothing matched.
fn truncate_raw(raw_message: &str) -> String {
    let trimmed = raw_message.trim();
    if trimmed.is_empty() {
        return ErrorKind::Unknown.friendly_message().to_string();
    }
    if trimmed.chars().count() <= MAX_RAW_MESSAGE_CHARS {
        return trimmed.to_string();
    }
    let mut truncated: String = trimmed.chars().take(MAX_RAW_MESSAGE_CHARS).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(message: &str) -> ErrorKind {
        classify(message).kind
    }

    #[test]
    fn test_auth_blocked() {
        assert_eq!(
            kind_of("ERROR: Could not copy Chrome cookie database. See https://github.com/yt-dlp/yt-dlp/issues/7271"),
            ErrorKind::AuthBlocked
        );
        assert_eq!(
            kind_of("Failed to decrypt with DPAPI"),
            ErrorKind::AuthBlocked
        );
        assert!(ErrorKind::AuthBlocked.is_batch_fatal());
    }

    #[test]
    fn test_rate_limited() {
        assert_eq!(
            kind_of("ERROR: unable to download video data: HTTP Error 429: Too Many Requests"),
            ErrorKind::RateLimited
        );
        assert_eq!(
            kind_of("Sign in to confirm you're not a bot"),
            ErrorKind::RateLimited
        );
    }

    #[test]
    fn test_age_beats_sign_in() {
        assert_eq!(
            kind_of("Sign in to confirm your age. This video may be inappropriate for some users."),
            ErrorKind::AgeRestricted
        );
    }

    #[test]
    fn test_private_video() {
        assert_eq!(
            kind_of("ERROR: [youtube] xyz: Private video. Sign in if you've been granted access"),
            ErrorKind::PrivateOrRestricted
        );
        assert_eq!(kind_of("HTTP Error 403: Forbidden"), ErrorKind::PrivateOrRestricted);
    }

    #[test]
    fn test_members_and_premium() {
        assert_eq!(
            kind_of("Join this channel to get access to members-only content like this video"),
            ErrorKind::MembersOnly
        );
        assert_eq!(
            kind_of("This video is only available to Music Premium members"),
            ErrorKind::PremiumOnly
        );
    }

    #[test]
    fn test_geo_blocked_beats_unavailable() {
        assert_eq!(
            kind_of("The uploader has not made this video available in your country"),
            ErrorKind::GeoBlocked
        );
        assert_eq!(
            kind_of("Video unavailable. This video is not available in your country"),
            ErrorKind::GeoBlocked
        );
    }

    #[test]
    fn test_format_beats_unavailable() {
        assert_eq!(
            kind_of("ERROR: [youtube] abc: Requested format is not available. Use --list-formats"),
            ErrorKind::NoSuitableFormat
        );
    }

    #[test]
    fn test_not_yet_live() {
        assert_eq!(
            kind_of("This live event will begin in 3 hours."),
            ErrorKind::NotYetLive
        );
        assert_eq!(kind_of("Premieres in 2 days"), ErrorKind::NotYetLive);
    }

    #[test]
    fn test_copyright() {
        assert_eq!(
            kind_of("This video contains content from SME, who has blocked it on copyright grounds"),
            ErrorKind::CopyrightBlocked
        );
    }

    #[test]
    fn test_post_processing_and_network() {
        assert_eq!(
            kind_of("ERROR: Postprocessing: ffprobe and ffmpeg not found"),
            ErrorKind::PostProcessingFailure
        );
        assert_eq!(kind_of("Read timed out."), ErrorKind::NetworkFailure);
        assert_eq!(
            kind_of("<urlopen error [Errno -3] Temporary failure in name resolution>"),
            ErrorKind::NetworkFailure
        );
    }

    #[test]
    fn test_unavailable() {
        assert_eq!(kind_of("Video unavailable"), ErrorKind::Unavailable);
        assert_eq!(
            kind_of("This video has been removed by the uploader"),
            ErrorKind::Unavailable
        );
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(kind_of("PRIVATE VIDEO"), ErrorKind::PrivateOrRestricted);
    }

    #[test]
    fn test_unknown_keeps_short_raw_message() {
        let classified = classify("  something odd happened  ");
        assert_eq!(classified.kind, ErrorKind::Unknown);
        assert_eq!(classified.message, "something odd happened");
    }

    #[test]
    fn test_unknown_truncates_long_raw_message() {
        let raw = "x".repeat(500);
        let classified = classify(&raw);
        assert_eq!(classified.kind, ErrorKind::Unknown);
        assert_eq!(classified.message.chars().count(), MAX_RAW_MESSAGE_CHARS + 3);
        assert!(classified.message.ends_with("..."));
    }

    #[test]
    fn test_unknown_empty_message() {
        let classified = classify("");
        assert_eq!(classified.message, ErrorKind::Unknown.friendly_message());
    }

    #[test]
    fn test_friendly_message_is_not_raw_text() {
        let raw = "ERROR: [youtube] abc: Video unavailable. internal trace id 0xdeadbeef";
        let classified = classify(raw);
        assert_eq!(classified.kind, ErrorKind::Unavailable);
        assert!(!classified.message.contains("0xdeadbeef"));
    }

    #[test]
    fn test_only_auth_blocked_is_batch_fatal() {
        let kinds = [
            ErrorKind::PrivateOrRestricted,
            ErrorKind::AgeRestricted,
            ErrorKind::Unavailable,
            ErrorKind::GeoBlocked,
            ErrorKind::NotYetLive,
            ErrorKind::RateLimited,
            ErrorKind::NetworkFailure,
            ErrorKind::NoSuitableFormat,
            ErrorKind::PostProcessingFailure,
            ErrorKind::CopyrightBlocked,
            ErrorKind::MembersOnly,
            ErrorKind::PremiumOnly,
            ErrorKind::Unknown,
        ];
        assert!(kinds.iter().all(|kind| !kind.is_batch_fatal()));
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::NetworkFailure.is_retryable());
        assert!(!ErrorKind::PrivateOrRestricted.is_retryable());
        assert!(!ErrorKind::AuthBlocked.is_retryable());
    }
}
