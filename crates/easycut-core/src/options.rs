//! Typed job options and their merge order.
//!
//! A job's [`JobOptions`] are resolved exactly once, when the orchestrator
//! dispatches the job, from three layers applied in order:
//!
//! 1. global [`DownloadSettings`] (read at dispatch time, so settings changed
//!    mid-batch only affect jobs not yet dispatched)
//! 2. per-batch [`BatchOptions`]
//! 3. a channel default quality, if the uploader matched one
//!
//! The channel layer only ever touches the quality; the mode always comes
//! from the batch.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default length of a duration-bounded live recording when zero is given.
pub const DEFAULT_LIVE_DURATION_SECS: u64 = 3600;

/// Default output filename template.
pub const DEFAULT_OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Output filename template for live recordings (id keeps repeated
/// recordings of the same stream apart).
pub const LIVE_OUTPUT_TEMPLATE: &str = "%(title)s-%(id)s.%(ext)s";

/// Video quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum QualityPreset {
    /// Best available video and audio.
    #[default]
    #[serde(rename = "best")]
    Best,
    /// Up to 2160p.
    #[serde(rename = "2160p")]
    P2160,
    /// Up to 1080p.
    #[serde(rename = "1080p")]
    P1080,
    /// Up to 720p.
    #[serde(rename = "720p")]
    P720,
    /// Up to 480p.
    #[serde(rename = "480p")]
    P480,
    /// Up to 360p.
    #[serde(rename = "360p")]
    P360,
    /// Smallest available.
    #[serde(rename = "worst")]
    Worst,
}

impl QualityPreset {
    /// Format selector string understood by the media engine.
    #[must_use]
    pub const fn format_selector(self) -> &'static str {
        match self {
            Self::Best => "bestvideo+bestaudio/best",
            Self::P2160 => "best[height<=2160]",
            Self::P1080 => "best[height<=1080]",
            Self::P720 => "best[height<=720]",
            Self::P480 => "best[height<=480]",
            Self::P360 => "best[height<=360]",
            Self::Worst => "worst",
        }
    }

    /// Maximum height in pixels, if bounded.
    #[must_use]
    pub const fn max_height(self) -> Option<u32> {
        match self {
            Self::Best | Self::Worst => None,
            Self::P2160 => Some(2160),
            Self::P1080 => Some(1080),
            Self::P720 => Some(720),
            Self::P480 => Some(480),
            Self::P360 => Some(360),
        }
    }
}

impl std::fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Best => write!(f, "best"),
            Self::P2160 => write!(f, "2160p"),
            Self::P1080 => write!(f, "1080p"),
            Self::P720 => write!(f, "720p"),
            Self::P480 => write!(f, "480p"),
            Self::P360 => write!(f, "360p"),
            Self::Worst => write!(f, "worst"),
        }
    }
}

impl FromStr for QualityPreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().trim_end_matches('p') {
            "best" => Ok(Self::Best),
            "2160" | "4k" => Ok(Self::P2160),
            "1080" => Ok(Self::P1080),
            "720" => Ok(Self::P720),
            "480" => Ok(Self::P480),
            "360" => Ok(Self::P360),
            "worst" => Ok(Self::Worst),
            other => Err(Error::Configuration(format!(
                "Unknown quality preset: {other}"
            ))),
        }
    }
}

/// Audio container/codec for audio extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// MP3 (default).
    #[default]
    Mp3,
    /// Uncompressed WAV.
    Wav,
    /// AAC in an M4A container.
    M4a,
    /// Opus.
    Opus,
}

impl AudioFormat {
    /// File extension for this format.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::M4a => "m4a",
            Self::Opus => "opus",
        }
    }
}

impl FromStr for AudioFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mp3" => Ok(Self::Mp3),
            "wav" => Ok(Self::Wav),
            "m4a" => Ok(Self::M4a),
            "opus" => Ok(Self::Opus),
            other => Err(Error::Configuration(format!("Unknown audio format: {other}"))),
        }
    }
}

/// Audio extraction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Output format.
    #[serde(default)]
    pub format: AudioFormat,
    /// Target bitrate in kbps.
    #[serde(default = "default_bitrate")]
    pub bitrate_kbps: u32,
}

const fn default_bitrate() -> u32 {
    192
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            format: AudioFormat::default(),
            bitrate_kbps: default_bitrate(),
        }
    }
}

/// Subtitle download parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SubtitleOptions {
    /// Whether subtitles are requested at all.
    #[serde(default)]
    pub enabled: bool,
    /// Preferred languages (e.g. `en`, `pt-BR`). Empty means all.
    #[serde(default)]
    pub languages: Vec<String>,
    /// Embed into the output container instead of writing side files.
    #[serde(default)]
    pub embed: bool,
    /// Include automatically generated captions.
    #[serde(default)]
    pub include_auto_generated: bool,
}

/// Network parameters handed to the media engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkOptions {
    /// Proxy URL.
    #[serde(default)]
    pub proxy: Option<String>,
    /// Rate limit in bytes per second.
    #[serde(default)]
    pub rate_limit_bps: Option<u64>,
    /// Retries the engine performs on transient errors.
    #[serde(default = "default_retries")]
    pub retries: u32,
}

const fn default_retries() -> u32 {
    10
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            proxy: None,
            rate_limit_bps: None,
            retries: default_retries(),
        }
    }
}

/// A validated section of a media item, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTimeRange")]
pub struct TimeRange {
    /// Start offset.
    pub start_secs: u64,
    /// End offset (exclusive).
    pub end_secs: u64,
}

impl TimeRange {
    /// Create a time range, rejecting empty or inverted ranges.
    pub fn new(start_secs: u64, end_secs: u64) -> Result<Self> {
        if end_secs <= start_secs {
            return Err(Error::InvalidTimeRange {
                start: start_secs,
                end: end_secs,
            });
        }
        Ok(Self {
            start_secs,
            end_secs,
        })
    }

    /// Parse a range from two timecode strings.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_timecode(start)?, parse_timecode(end)?)
    }

    /// Length of the section in seconds.
    #[must_use]
    pub const fn duration_secs(&self) -> u64 {
        self.end_secs.saturating_sub(self.start_secs)
    }
}

/// Unchecked wire form of [`TimeRange`].
#[derive(Deserialize)]
struct RawTimeRange {
    start_secs: u64,
    end_secs: u64,
}

impl TryFrom<RawTimeRange> for TimeRange {
    type Error = Error;

    fn try_from(raw: RawTimeRange) -> Result<Self> {
        Self::new(raw.start_secs, raw.end_secs)
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}",
            format_timecode(self.start_secs),
            format_timecode(self.end_secs)
        )
    }
}

/// Parse `HH:MM:SS`, `MM:SS` or `SS` into seconds.
///
/// Minutes and seconds fields must be below 60 when a larger unit is present.
pub fn parse_timecode(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidTimecode(input.to_string()));
    }

    let parts: Vec<&str> = trimmed.split(':').collect();
    if parts.len() > 3 {
        return Err(Error::InvalidTimecode(input.to_string()));
    }

    let mut fields = Vec::with_capacity(parts.len());
    for part in &parts {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidTimecode(input.to_string()));
        }
        let value: u64 = part
            .parse()
            .map_err(|_| Error::InvalidTimecode(input.to_string()))?;
        fields.push(value);
    }

    // Every field except the most significant one is base 60.
    if fields.iter().skip(1).any(|&v| v >= 60) {
        return Err(Error::InvalidTimecode(input.to_string()));
    }

    Ok(fields.iter().fold(0, |acc, &v| acc * 60 + v))
}

/// Format seconds as `H:MM:SS` or `M:SS`.
#[must_use]
pub fn format_timecode(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// What a job downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DownloadMode {
    /// The whole item.
    #[default]
    Full,
    /// A section between two offsets.
    Range {
        /// The section to keep.
        range: TimeRange,
    },
    /// From the beginning up to an offset.
    Until {
        /// End offset in seconds.
        end_secs: u64,
    },
    /// Audio only, transcoded per [`AudioSettings`].
    Audio,
    /// Every item of a playlist.
    Playlist,
    /// Every upload of a channel.
    Channel,
    /// A live stream recording, optionally bounded in length.
    Live {
        /// Maximum recording length; zero means the default hour.
        max_duration_secs: Option<u64>,
    },
}

impl std::fmt::Display for DownloadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Range { range } => write!(f, "range {range}"),
            Self::Until { end_secs } => write!(f, "until {}", format_timecode(*end_secs)),
            Self::Audio => write!(f, "audio"),
            Self::Playlist => write!(f, "playlist"),
            Self::Channel => write!(f, "channel"),
            Self::Live {
                max_duration_secs: Some(secs),
            } => write!(f, "live ({})", format_timecode(*secs)),
            Self::Live {
                max_duration_secs: None,
            } => write!(f, "live"),
        }
    }
}

/// Global download defaults, persisted in the application config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSettings {
    /// Directory where output files are written.
    #[serde(default = "default_output_directory")]
    pub output_dir: PathBuf,
    /// Default quality.
    #[serde(default)]
    pub quality: QualityPreset,
    /// Audio extraction defaults.
    #[serde(default)]
    pub audio: AudioSettings,
    /// Subtitle defaults.
    #[serde(default)]
    pub subtitles: SubtitleOptions,
    /// Network parameters.
    #[serde(default)]
    pub network: NetworkOptions,
    /// Whether archive-based dedup is active.
    #[serde(default)]
    pub archive_mode: bool,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_directory(),
            quality: QualityPreset::default(),
            audio: AudioSettings::default(),
            subtitles: SubtitleOptions::default(),
            network: NetworkOptions::default(),
            archive_mode: false,
        }
    }
}

/// Get the default output directory.
#[must_use]
pub fn default_output_directory() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Per-batch overrides supplied with a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BatchOptions {
    /// Download mode for every job of the batch.
    #[serde(default)]
    pub mode: DownloadMode,
    /// Quality override.
    #[serde(default)]
    pub quality: Option<QualityPreset>,
    /// Audio override (only meaningful in audio mode).
    #[serde(default)]
    pub audio: Option<AudioSettings>,
    /// Subtitle override.
    #[serde(default)]
    pub subtitles: Option<SubtitleOptions>,
    /// Output directory override.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl BatchOptions {
    /// Create batch options for a mode.
    #[must_use]
    pub fn new(mode: DownloadMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Set the quality override.
    #[must_use]
    pub const fn with_quality(mut self, quality: QualityPreset) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Set the audio override.
    #[must_use]
    pub const fn with_audio(mut self, audio: AudioSettings) -> Self {
        self.audio = Some(audio);
        self
    }

    /// Set the subtitle override.
    #[must_use]
    pub fn with_subtitles(mut self, subtitles: SubtitleOptions) -> Self {
        self.subtitles = Some(subtitles);
        self
    }

    /// Set the output directory override.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }
}

/// Fully resolved, immutable options for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Download mode.
    pub mode: DownloadMode,
    /// Effective quality after all layers.
    pub quality: QualityPreset,
    /// Format selector handed to the engine.
    pub format: String,
    /// Output directory.
    pub output_dir: PathBuf,
    /// Output filename template.
    pub output_template: String,
    /// Section to keep, for range/until modes.
    pub section: Option<TimeRange>,
    /// Audio extraction parameters, present only in audio mode.
    pub audio: Option<AudioSettings>,
    /// Subtitle parameters.
    pub subtitles: SubtitleOptions,
    /// Network parameters.
    pub network: NetworkOptions,
    /// Archive file the engine should honor, when archive mode is on.
    pub archive_file: Option<PathBuf>,
    /// Credential material to attach, when authenticated.
    pub auth_token_path: Option<PathBuf>,
    /// Wall-clock deadline (Unix millis) for bounded live recordings.
    pub deadline_ms: Option<u64>,
}

impl JobOptions {
    /// Merge global settings, batch overrides and a channel default.
    ///
    /// `now_ms` anchors the live-recording deadline.
    #[must_use]
    pub fn resolve(
        global: &DownloadSettings,
        batch: &BatchOptions,
        channel_quality: Option<QualityPreset>,
        now_ms: u64,
    ) -> Self {
        let quality = channel_quality
            .or(batch.quality)
            .unwrap_or(global.quality);

        let (format, audio) = match batch.mode {
            DownloadMode::Audio => (
                "bestaudio/best".to_string(),
                Some(batch.audio.clone().unwrap_or_else(|| global.audio.clone())),
            ),
            _ => (quality.format_selector().to_string(), None),
        };

        let section = match batch.mode {
            DownloadMode::Range { range } => Some(range),
            // Zero-length "until" sections are dropped rather than failing the job.
            DownloadMode::Until { end_secs } => TimeRange::new(0, end_secs).ok(),
            _ => None,
        };

        let (output_template, deadline_ms) = match batch.mode {
            DownloadMode::Live { max_duration_secs } => {
                let deadline = max_duration_secs.map(|secs| {
                    let secs = if secs == 0 {
                        DEFAULT_LIVE_DURATION_SECS
                    } else {
                        secs
                    };
                    now_ms.saturating_add(secs.saturating_mul(1000))
                });
                (LIVE_OUTPUT_TEMPLATE.to_string(), deadline)
            }
            _ => (DEFAULT_OUTPUT_TEMPLATE.to_string(), None),
        };

        Self {
            mode: batch.mode,
            quality,
            format,
            output_dir: batch
                .output_dir
                .clone()
                .unwrap_or_else(|| global.output_dir.clone()),
            output_template,
            section,
            audio,
            subtitles: batch
                .subtitles
                .clone()
                .unwrap_or_else(|| global.subtitles.clone()),
            network: global.network.clone(),
            archive_file: None,
            auth_token_path: None,
            deadline_ms,
        }
    }

    /// Attach the archive file the engine should honor.
    #[must_use]
    pub fn with_archive_file(mut self, path: Option<PathBuf>) -> Self {
        self.archive_file = path;
        self
    }

    /// Attach credential material.
    #[must_use]
    pub fn with_auth_token_path(mut self, path: Option<PathBuf>) -> Self {
        self.auth_token_path = path;
        self
    }

    /// Full output path template (directory plus filename template).
    #[must_use]
    pub fn output_path_template(&self) -> PathBuf {
        self.output_dir.join(&self.output_template)
    }
}
