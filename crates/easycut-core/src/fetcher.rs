//! Boundary to the media engine and the credential source.
//!
//! Both collaborators are synchronous traits; the orchestrator moves calls
//! onto blocking threads. Engine failures are free text in [`FetchError`]
//! and are classified by [`crate::classify`], never converted into
//! [`crate::Error`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::options::JobOptions;

/// Free-text failure reported by the media engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FetchError {
    /// Raw engine message.
    pub message: String,
}

impl FetchError {
    /// Wrap a raw engine message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A chapter marker inside a media item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    /// Chapter title.
    pub title: String,
    /// Start offset in seconds.
    pub start_secs: f64,
    /// End offset in seconds.
    pub end_secs: f64,
}

/// A format offered by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatInfo {
    /// Engine-specific format id.
    pub format_id: String,
    /// Container extension.
    pub ext: String,
    /// Video height, if the format has video.
    pub height: Option<u32>,
    /// Whether the format carries audio.
    pub has_audio: bool,
    /// Whether the format carries video.
    pub has_video: bool,
}

/// Result of a metadata probe.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Title.
    pub title: String,
    /// Uploader or channel name.
    pub uploader: Option<String>,
    /// Duration in seconds (zero for ongoing live streams).
    pub duration_secs: u64,
    /// Stable unique id.
    pub unique_id: String,
    /// Available formats.
    pub formats: Vec<FormatInfo>,
    /// Whether the item is a live stream.
    pub is_live: bool,
    /// Chapter markers.
    pub chapters: Vec<Chapter>,
    /// Available subtitle languages.
    pub subtitle_languages: Vec<String>,
}

/// Result of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResult {
    /// Final title.
    pub title: String,
    /// Stable unique id.
    pub unique_id: String,
    /// Written file.
    pub output_path: PathBuf,
    /// Thumbnail URL, if available.
    pub thumbnail_url: Option<String>,
}

/// The media extraction engine.
#[cfg_attr(test, mockall::automock)]
pub trait MediaFetcher: Send + Sync {
    /// Read metadata without downloading.
    fn probe(&self, resource_id: &str) -> std::result::Result<Metadata, FetchError>;

    /// Download (and post-process) a resource.
    ///
    /// This is the only long-running call in a job's lifecycle.
    fn fetch(
        &self,
        resource_id: &str,
        options: &JobOptions,
    ) -> std::result::Result<FetchResult, FetchError>;
}

/// Source of credential material for the remote service.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialProvider: Send + Sync {
    /// Whether credentials are available.
    fn is_authenticated(&self) -> bool;

    /// Path to the credential file to attach to fetches.
    fn auth_token_path(&self) -> Option<PathBuf>;
}

/// Credential provider for anonymous use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn is_authenticated(&self) -> bool {
        false
    }

    fn auth_token_path(&self) -> Option<PathBuf> {
        None
    }
}

/// Credentials stored in a token (cookie) file on disk.
///
/// Authenticated whenever the file exists.
#[derive(Debug, Clone)]
pub struct TokenFileCredentials {
    path: PathBuf,
}

impl TokenFileCredentials {
    /// Use the token file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialProvider for TokenFileCredentials {
    fn is_authenticated(&self) -> bool {
        self.path.is_file()
    }

    fn auth_token_path(&self) -> Option<PathBuf> {
        self.is_authenticated().then(|| self.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{BatchOptions, DownloadSettings};
    use tempfile::TempDir;

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::new("HTTP Error 429");
        assert_eq!(err.to_string(), "HTTP Error 429");
    }

    #[test]
    fn test_no_credentials() {
        assert!(!NoCredentials.is_authenticated());
        assert!(NoCredentials.auth_token_path().is_none());
    }

    #[test]
    fn test_token_file_credentials() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cookies.txt");
        let credentials = TokenFileCredentials::new(&path);
        assert!(!credentials.is_authenticated());
        assert!(credentials.auth_token_path().is_none());

        std::fs::write(&path, "# Netscape HTTP Cookie File\n").unwrap();
        assert!(credentials.is_authenticated());
        assert_eq!(credentials.auth_token_path(), Some(path));
    }

    #[test]
    fn test_mock_fetcher() {
        let mut mock = MockMediaFetcher::new();
        mock.expect_fetch()
            .withf(|id, options| id == "https://youtu.be/abc" && options.format == "bestaudio/best")
            .times(1)
            .returning(|_, _| Err(FetchError::new("Video unavailable")));

        let options = JobOptions::resolve(
            &DownloadSettings::default(),
            &BatchOptions::new(crate::options::DownloadMode::Audio),
            None,
            0,
        );
        let err = mock.fetch("https://youtu.be/abc", &options).unwrap_err();
        assert_eq!(err.message, "Video unavailable");
    }

    #[test]
    fn test_mock_credentials() {
        let mut mock = MockCredentialProvider::new();
        mock.expect_is_authenticated().return_const(true);
        mock.expect_auth_token_path()
            .return_const(Some(PathBuf::from("/tmp/cookies.txt")));
        assert!(mock.is_authenticated());
        assert_eq!(
            mock.auth_token_path(),
            Some(PathBuf::from("/tmp/cookies.txt"))
        );
    }
}
