//! Tests for the rusty_ytdl-backed fetcher.
//!
//! These talk to the real service and are ignored by default.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use easycut_core::{
    BatchOptions, DownloadMode, DownloadSettings, JobOptions, MediaFetcher, RustyYtdlFetcher,
    classify,
};
use tempfile::TempDir;

const TEST_VIDEO: &str = "https://www.youtube.com/watch?v=jNQXAC9IVRw";

#[test]
#[ignore = "requires network access to YouTube"]
fn test_probe_reads_metadata() {
    let metadata = RustyYtdlFetcher::new().probe(TEST_VIDEO).unwrap();
    assert_eq!(metadata.unique_id, "jNQXAC9IVRw");
    assert!(!metadata.title.is_empty());
    assert!(!metadata.is_live);
    assert!(metadata.formats.iter().any(|format| format.has_audio));
}

#[test]
#[ignore = "requires network access to YouTube"]
fn test_fetch_audio_writes_file() {
    let dir = TempDir::new().unwrap();
    let settings = DownloadSettings {
        output_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let options = JobOptions::resolve(&settings, &BatchOptions::new(DownloadMode::Audio), None, 0);

    let result = RustyYtdlFetcher::new().fetch(TEST_VIDEO, &options).unwrap();
    assert_eq!(result.unique_id, "jNQXAC9IVRw");
    assert!(result.output_path.exists());
    assert_eq!(
        result.output_path.extension().and_then(|ext| ext.to_str()),
        Some("m4a")
    );
}

#[test]
#[ignore = "requires network access to YouTube"]
fn test_missing_video_is_classified() {
    let err = RustyYtdlFetcher::new()
        .probe("https://www.youtube.com/watch?v=xxxxxxxxxxx")
        .unwrap_err();
    let classified = classify(&err.message);
    assert!(!classified.message.is_empty());
    assert!(!classified.kind.is_batch_fatal());
}
