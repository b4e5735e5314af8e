//! Error types for EasyCut core operations.
//!
//! Failures reported by the media engine are deliberately *not* part of
//! [`Error`]: they arrive as free text in a [`crate::fetcher::FetchError`]
//! and are routed through [`crate::classify`] instead.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in EasyCut core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded, parsed or validated.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The history file could not be read or written.
    #[error("History error at {path}: {reason}")]
    History {
        /// Path of the history file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// The archive file could not be read or written.
    #[error("Archive error at {path}: {reason}")]
    Archive {
        /// Path of the archive file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// A timecode string could not be parsed.
    #[error("Invalid timecode: {0}")]
    InvalidTimecode(String),

    /// A time range ends before it starts.
    #[error("Invalid time range: end {end}s is not after start {start}s")]
    InvalidTimeRange {
        /// Start offset in seconds.
        start: u64,
        /// End offset in seconds.
        end: u64,
    },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn history(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::History {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn archive(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Archive {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_display() {
        let err = Error::Configuration("bad concurrency".to_string());
        assert_eq!(err.to_string(), "Configuration error: bad concurrency");
    }

    #[test]
    fn test_history_error_display() {
        let err = Error::history("/tmp/history.json", "permission denied");
        assert!(err.to_string().contains("/tmp/history.json"));
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_time_range_display() {
        let err = Error::InvalidTimeRange { start: 30, end: 10 };
        assert_eq!(
            err.to_string(),
            "Invalid time range: end 10s is not after start 30s"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
