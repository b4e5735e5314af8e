//! [`MediaFetcher`] backed by `rusty_ytdl`.
//!
//! `rusty_ytdl` is a pure Rust extractor: there is no external process and no
//! transcoding step. Streams are written as delivered, so a few
//! [`JobOptions`] fields have no effect here (sections, subtitles, proxy,
//! rate limit, credentials); they are reported at warn level and skipped.
//! Bounded live recordings stop writing once the job's deadline passes.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};

use rusty_ytdl::{Video, VideoOptions, VideoQuality, VideoSearchOptions};
use tracing::{debug, info, warn};

use crate::fetcher::{FetchError, FetchResult, FormatInfo, MediaFetcher, Metadata};
use crate::job::unix_millis;
use crate::options::{DownloadMode, JobOptions, QualityPreset};
use crate::validate::sanitize_filename;

type FetchOutcome<T> = std::result::Result<T, FetchError>;

/// Pure Rust media fetcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustyYtdlFetcher;

impl RustyYtdlFetcher {
    /// Create a new fetcher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    async fn probe_async(resource_id: String) -> FetchOutcome<Metadata> {
        let video = Video::new(&resource_id)
            .map_err(|e| FetchError::new(format!("Failed to create video instance: {e}")))?;
        let info = video
            .get_info()
            .await
            .map_err(|e| FetchError::new(format!("Failed to get video info: {e}")))?;

        let details = &info.video_details;
        let duration_secs = details.length_seconds.parse().unwrap_or(0);

        Ok(Metadata {
            title: details.title.clone(),
            uploader: details.author.as_ref().map(|a| a.name.clone()),
            duration_secs,
            unique_id: details.video_id.clone(),
            formats: info
                .formats
                .iter()
                .map(|f| FormatInfo {
                    format_id: f.itag.to_string(),
                    ext: f.mime_type.container.clone(),
                    height: f.height.map(|h| h as u32),
                    has_audio: f.has_audio,
                    has_video: f.has_video,
                })
                .collect(),
            // Ongoing streams report no length.
            is_live: duration_secs == 0,
            chapters: Vec::new(),
            subtitle_languages: Vec::new(),
        })
    }

    async fn fetch_async(resource_id: String, options: JobOptions) -> FetchOutcome<FetchResult> {
        warn_unsupported(&options);

        let audio_only = options.mode == DownloadMode::Audio;
        let video_options = VideoOptions {
            quality: video_quality(options.quality, audio_only),
            filter: if audio_only {
                VideoSearchOptions::Audio
            } else {
                VideoSearchOptions::VideoAudio
            },
            ..Default::default()
        };

        let video = Video::new_with_options(&resource_id, video_options)
            .map_err(|e| FetchError::new(format!("Failed to create video instance: {e}")))?;
        let info = video
            .get_info()
            .await
            .map_err(|e| FetchError::new(format!("Failed to get video info: {e}")))?;

        let details = &info.video_details;
        let title = details.title.clone();
        let unique_id = details.video_id.clone();
        let thumbnail_url = details.thumbnails.last().map(|t| t.url.clone());

        let extension = if audio_only { "m4a" } else { "mp4" };
        let file_name = render_template(&options.output_template, &title, &unique_id, extension);
        let output_path = options.output_dir.join(file_name);

        std::fs::create_dir_all(&options.output_dir).map_err(|e| {
            FetchError::new(format!(
                "Failed to create output directory {}: {e}",
                options.output_dir.display()
            ))
        })?;

        let stream = video
            .stream()
            .await
            .map_err(|e| FetchError::new(format!("Failed to create stream: {e}")))?;
        debug!("Stream content length: {} bytes", stream.content_length());

        let mut file = PartialFile::create(&output_path)
            .map_err(|e| FetchError::new(format!("Failed to create file: {e}")))?;

        let mut total_bytes = 0u64;
        while let Some(chunk) = stream
            .chunk()
            .await
            .map_err(|e| FetchError::new(format!("Failed to download chunk: {e}")))?
        {
            total_bytes += chunk.len() as u64;
            file.write_all(&chunk)
                .map_err(|e| FetchError::new(format!("Failed to write chunk: {e}")))?;

            if options.deadline_ms.is_some_and(|deadline| unix_millis() >= deadline) {
                info!("Recording deadline reached for {}", unique_id);
                break;
            }
        }
        file.finish()
            .map_err(|e| FetchError::new(format!("Failed to write chunk: {e}")))?;

        info!(
            "Downloaded {} bytes: {} -> {}",
            total_bytes,
            title,
            output_path.display()
        );

        Ok(FetchResult {
            title,
            unique_id,
            output_path,
            thumbnail_url,
        })
    }
}

/// Output file that is deleted on drop unless [`PartialFile::finish`] ran.
struct PartialFile {
    path: PathBuf,
    file: Option<std::fs::File>,
    finished: bool,
}

impl PartialFile {
    fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(std::fs::File::create(path)?),
            finished: false,
        })
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(buf),
            None => Err(std::io::Error::other("file already closed")),
        }
    }

    fn finish(mut self) -> std::io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        self.finished = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Close before removing.
        drop(self.file.take());
        match std::fs::remove_file(&self.path) {
            Ok(()) => warn!("Removed partial download {}", self.path.display()),
            Err(e) => debug!("Could not remove {}: {}", self.path.display(), e),
        }
    }
}

impl MediaFetcher for RustyYtdlFetcher {
    fn probe(&self, resource_id: &str) -> FetchOutcome<Metadata> {
        block_on(Self::probe_async(resource_id.to_string()))
    }

    fn fetch(&self, resource_id: &str, options: &JobOptions) -> FetchOutcome<FetchResult> {
        block_on(Self::fetch_async(resource_id.to_string(), options.clone()))
    }
}

/// Run an async extractor call from synchronous code.
fn block_on<T>(future: impl Future<Output = FetchOutcome<T>>) -> FetchOutcome<T> {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        tokio::task::block_in_place(|| handle.block_on(future))
    } else {
        let rt = tokio::runtime::Runtime::new()
            .map_err(|e| FetchError::new(format!("Failed to create tokio runtime: {e}")))?;
        rt.block_on(future)
    }
}

fn video_quality(quality: QualityPreset, audio_only: bool) -> VideoQuality {
    match (audio_only, quality) {
        (true, QualityPreset::Worst) => VideoQuality::LowestAudio,
        (true, _) => VideoQuality::HighestAudio,
        (false, QualityPreset::Worst | QualityPreset::P360 | QualityPreset::P480) => {
            VideoQuality::Lowest
        }
        (false, _) => VideoQuality::Highest,
    }
}

fn warn_unsupported(options: &JobOptions) {
    if let Some(section) = options.section {
        warn!("Sections are not supported, downloading in full (requested {section})");
    }
    if options.subtitles.enabled {
        warn!("Subtitles are not supported by this fetcher");
    }
    if options.network.proxy.is_some() || options.network.rate_limit_bps.is_some() {
        warn!("Proxy and rate limit settings are not supported by this fetcher");
    }
    if options.auth_token_path.is_some() {
        warn!("Credential files are not supported by this fetcher");
    }
    if matches!(options.mode, DownloadMode::Playlist | DownloadMode::Channel) {
        warn!("Playlist and channel expansion is not supported, fetching a single item");
    }
    if let Some(archive) = options.archive_file.as_deref() {
        debug!("Archive bookkeeping left to the caller ({})", archive.display());
    }
}

/// Expand `%(title)s`, `%(id)s` and `%(ext)s` in an output template.
fn render_template(template: &str, title: &str, id: &str, ext: &str) -> PathBuf {
    let rendered = template
        .replace("%(title)s", &sanitize_filename(title))
        .replace("%(id)s", &sanitize_filename(id))
        .replace("%(ext)s", ext);
    Path::new(&rendered).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{DEFAULT_OUTPUT_TEMPLATE, LIVE_OUTPUT_TEMPLATE};
    use tempfile::TempDir;

    #[test]
    fn test_interrupted_download_is_removed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.mp4");

        let mut file = PartialFile::create(&path).unwrap();
        file.write_all(b"first chunk").unwrap();
        assert!(path.exists());
        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn test_finished_download_is_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.mp4");

        let mut file = PartialFile::create(&path).unwrap();
        file.write_all(b"all chunks").unwrap();
        file.finish().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"all chunks");
    }

    #[test]
    fn test_render_default_template() {
        assert_eq!(
            render_template(DEFAULT_OUTPUT_TEMPLATE, "My: Video", "abc", "mp4"),
            PathBuf::from("My_ Video.mp4")
        );
    }

    #[test]
    fn test_render_live_template() {
        assert_eq!(
            render_template(LIVE_OUTPUT_TEMPLATE, "Stream", "dQw4w9WgXcQ", "mp4"),
            PathBuf::from("Stream-dQw4w9WgXcQ.mp4")
        );
    }

    #[test]
    fn test_video_quality_mapping() {
        assert!(matches!(
            video_quality(QualityPreset::Best, false),
            VideoQuality::Highest
        ));
        assert!(matches!(
            video_quality(QualityPreset::P360, false),
            VideoQuality::Lowest
        ));
        assert!(matches!(
            video_quality(QualityPreset::Best, true),
            VideoQuality::HighestAudio
        ));
        assert!(matches!(
            video_quality(QualityPreset::Worst, true),
            VideoQuality::LowestAudio
        ));
    }
}
