//! Command handlers.

use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Args, Subcommand, ValueEnum};
use easycut_core::config::SUPPORTED_BITRATES;
use easycut_core::fetcher::TokenFileCredentials;
use easycut_core::options::{
    AudioFormat, AudioSettings, SubtitleOptions, TimeRange, parse_timecode,
};
use easycut_core::orchestrator::{AlwaysRedownload, AlwaysSkip, DuplicatePrompt};
use easycut_core::{
    AppConfig, BatchEvent, BatchHandle, BatchOptions, BatchSummary, Dependencies, DownloadMode,
    DownloadOrchestrator, HistoryEntry, JobId, JobRecord, JobStatus, QualityPreset,
    RustyYtdlFetcher,
};
use tracing::{info, warn};

use crate::error::{CliError, CliResult};

/// What to download for each URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ModeArg {
    /// The whole video (or a section with --start/--end)
    #[default]
    Full,
    /// Audio only
    Audio,
    /// Every item of a playlist
    Playlist,
    /// Every upload of a channel
    Channel,
    /// Record a live stream
    Live,
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// URLs to download
    pub urls: Vec<String>,

    /// Read more URLs from a file, one per line (`#` starts a comment)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Download mode
    #[arg(short, long, value_enum, default_value_t)]
    pub mode: ModeArg,

    /// Section start (HH:MM:SS, MM:SS or seconds)
    #[arg(long, requires = "end")]
    pub start: Option<String>,

    /// Section end; without --start, download from the beginning up to here
    #[arg(long)]
    pub end: Option<String>,

    /// Maximum recording length in live mode
    #[arg(long)]
    pub max_duration: Option<String>,

    /// Quality preset (best, 2160p, 1080p, 720p, 480p, 360p, worst)
    #[arg(long)]
    pub quality: Option<QualityPreset>,

    /// Audio format in audio mode (mp3, wav, m4a, opus)
    #[arg(long)]
    pub audio_format: Option<AudioFormat>,

    /// Audio bitrate in kbps
    #[arg(long)]
    pub bitrate: Option<u32>,

    /// Download subtitles in these languages (repeatable)
    #[arg(long = "sub-lang")]
    pub subtitle_languages: Vec<String>,

    /// Output directory for this batch
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Maximum parallel downloads
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Skip anything already recorded in the archive
    #[arg(long)]
    pub archive: bool,

    /// Download again items that are already in the history
    #[arg(long)]
    pub redownload: bool,

    /// Cookie file with credentials for the remote service
    #[arg(long)]
    pub cookies: Option<PathBuf>,
}

impl DownloadArgs {
    fn download_mode(&self) -> CliResult<DownloadMode> {
        let has_section = self.start.is_some() || self.end.is_some();
        if has_section && self.mode != ModeArg::Full {
            return Err(CliError::InvalidArguments(
                "--start/--end only apply to full mode".to_string(),
            ));
        }
        if self.max_duration.is_some() && self.mode != ModeArg::Live {
            return Err(CliError::InvalidArguments(
                "--max-duration only applies to live mode".to_string(),
            ));
        }

        Ok(match self.mode {
            ModeArg::Full => match (self.start.as_deref(), self.end.as_deref()) {
                (Some(start), Some(end)) => DownloadMode::Range {
                    range: TimeRange::parse(start, end)?,
                },
                (None, Some(end)) => DownloadMode::Until {
                    end_secs: parse_timecode(end)?,
                },
                _ => DownloadMode::Full,
            },
            ModeArg::Audio => DownloadMode::Audio,
            ModeArg::Playlist => DownloadMode::Playlist,
            ModeArg::Channel => DownloadMode::Channel,
            ModeArg::Live => DownloadMode::Live {
                max_duration_secs: self
                    .max_duration
                    .as_deref()
                    .map(parse_timecode)
                    .transpose()?,
            },
        })
    }

    fn batch_options(&self, config: &AppConfig) -> CliResult<BatchOptions> {
        let mut options = BatchOptions::new(self.download_mode()?);

        if let Some(quality) = self.quality {
            options = options.with_quality(quality);
        }
        if self.audio_format.is_some() || self.bitrate.is_some() {
            let defaults = &config.download.audio;
            let audio = AudioSettings {
                format: self.audio_format.unwrap_or(defaults.format),
                bitrate_kbps: self.bitrate.unwrap_or(defaults.bitrate_kbps),
            };
            if !SUPPORTED_BITRATES.contains(&audio.bitrate_kbps) {
                return Err(CliError::InvalidArguments(format!(
                    "bitrate must be one of {SUPPORTED_BITRATES:?}"
                )));
            }
            options = options.with_audio(audio);
        }
        if !self.subtitle_languages.is_empty() {
            options = options.with_subtitles(SubtitleOptions {
                enabled: true,
                languages: self.subtitle_languages.clone(),
                ..config.download.subtitles.clone()
            });
        }
        if let Some(dir) = &self.output {
            options = options.with_output_dir(dir);
        }
        Ok(options)
    }

    fn collect_urls(&self) -> CliResult<Vec<String>> {
        let mut urls = self.urls.clone();
        if let Some(path) = &self.file {
            urls.extend(read_url_list(path)?);
        }
        if urls.is_empty() {
            return Err(CliError::NoInput);
        }
        Ok(urls)
    }
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Number of entries to show
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,

    /// Delete the history
    #[arg(long)]
    pub clear: bool,

    /// Print entries as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum ArchiveCommand {
    /// Number of archived ids
    Count,
    /// Write the archive to a file
    Export {
        /// Destination file
        path: PathBuf,
    },
    /// Merge ids from a file into the archive
    Import {
        /// Source file, one id per line
        path: PathBuf,
    },
    /// Delete every archived id
    Clear,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,
    /// Print the effective configuration
    Show,
}

/// Asks on the terminal whether to download a known item again.
#[derive(Debug, Default)]
struct TerminalPrompt;

impl DuplicatePrompt for TerminalPrompt {
    fn should_redownload(&self, resource_id: &str, previous: &HistoryEntry) -> bool {
        let mut stderr = std::io::stderr().lock();
        let _ = write!(
            stderr,
            "\"{}\" was already downloaded ({}). Download again? [y/N] ",
            previous.display_title, resource_id
        );
        let _ = stderr.flush();

        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

pub async fn download(mut config: AppConfig, args: DownloadArgs) -> CliResult<ExitCode> {
    let urls = args.collect_urls()?;
    let options = args.batch_options(&config)?;

    if let Some(concurrency) = args.concurrency {
        config.orchestrator.max_concurrent_jobs = concurrency;
        config.orchestrator.validate();
    }
    if args.archive {
        config.download.archive_mode = true;
    }

    let prompt: Arc<dyn DuplicatePrompt> = if args.redownload {
        Arc::new(AlwaysRedownload)
    } else if std::io::stdin().is_terminal() {
        Arc::new(TerminalPrompt)
    } else {
        Arc::new(AlwaysSkip)
    };

    let mut dependencies = Dependencies::new(
        config.history_store(),
        config.archive_set(),
        Arc::new(RustyYtdlFetcher::new()),
    )
    .with_channel_defaults(config.channel_resolver())
    .with_duplicate_prompt(prompt);
    if let Some(cookies) = &args.cookies {
        if !cookies.is_file() {
            warn!("Cookie file {} not found, continuing without it", cookies.display());
        }
        dependencies = dependencies.with_credentials(Arc::new(TokenFileCredentials::new(cookies)));
    }

    let orchestrator = DownloadOrchestrator::new(
        config.orchestrator.clone(),
        config.download.clone(),
        dependencies,
    );
    let (handle, mut events) = orchestrator.submit_batch(urls, options);

    let mut stopping = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(BatchEvent::BatchFinished(_)) | None => break,
                Some(event) => render_event(&handle, event).await,
            },
            signal = tokio::signal::ctrl_c(), if !stopping => {
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                stopping = true;
                eprintln!("Stopping: running downloads will finish, the rest are skipped");
                handle.stop();
            }
        }
    }

    let summary = handle.wait().await;
    print_summary(&summary);

    let retry = handle.retry_candidates().await;
    if !retry.is_empty() {
        println!("Worth retrying:");
        for resource_id in &retry {
            println!("  {resource_id}");
        }
    }

    Ok(if summary.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn render_event(handle: &BatchHandle, event: BatchEvent) {
    match event {
        BatchEvent::ItemRejected { index, resource_id } => {
            println!("Ignoring entry {}: not a supported URL: {resource_id}", index + 1);
        }
        BatchEvent::StatusChanged { job_id, new, .. } => {
            let Some(job) = find_job(handle, job_id).await else {
                return;
            };
            if let Some(line) = status_line(&job, new) {
                println!("{line}");
            }
        }
        BatchEvent::BatchPaused => println!("Paused"),
        BatchEvent::BatchResumed => println!("Resumed"),
        BatchEvent::BatchStopped => println!("Stopped"),
        BatchEvent::BatchFinished(_) => {}
    }
}

async fn find_job(handle: &BatchHandle, job_id: JobId) -> Option<JobRecord> {
    handle
        .snapshot()
        .await
        .into_iter()
        .find(|job| job.id == job_id)
}

fn status_line(job: &JobRecord, status: JobStatus) -> Option<String> {
    let label = &job.display_title;
    match status {
        JobStatus::Running => Some(format!("[{}] downloading {label}", job.id)),
        JobStatus::Completed => Some(match &job.output_path {
            Some(path) => format!("[{}] done: {label} -> {}", job.id, path.display()),
            None => format!("[{}] done: {label}", job.id),
        }),
        JobStatus::Failed => {
            let reason = job
                .error
                .as_ref()
                .map_or("unknown error", |error| error.message.as_str());
            Some(format!("[{}] failed: {label}: {reason}", job.id))
        }
        JobStatus::Skipped => Some(match job.skip_reason {
            Some(reason) => format!("[{}] skipped ({reason}): {label}", job.id),
            None => format!("[{}] skipped: {label}", job.id),
        }),
        JobStatus::Queued | JobStatus::Paused => None,
    }
}

fn print_summary(summary: &BatchSummary) {
    println!(
        "{} downloaded, {} failed, {} skipped, {} rejected ({} jobs)",
        summary.completed, summary.failed, summary.skipped, summary.rejected, summary.total
    );
}

pub fn history(config: &AppConfig, args: &HistoryArgs) -> CliResult<ExitCode> {
    let mut store = config.history_store();

    if args.clear {
        store.clear()?;
        println!("History cleared");
        return Ok(ExitCode::SUCCESS);
    }

    let entries = store.recent(args.limit)?;
    if args.json {
        let json = serde_json::to_string_pretty(&entries).map_err(easycut_core::Error::from)?;
        println!("{json}");
        return Ok(ExitCode::SUCCESS);
    }

    if entries.is_empty() {
        println!("No downloads yet");
        return Ok(ExitCode::SUCCESS);
    }
    let now = now_millis();
    for entry in &entries {
        println!("{}", history_line(entry, now));
    }
    println!(
        "{} successful downloads recorded",
        store.success_count()?
    );
    Ok(ExitCode::SUCCESS)
}

fn history_line(entry: &HistoryEntry, now_ms: u64) -> String {
    let status = if entry.is_success() { "ok " } else { "err" };
    let live = if entry.is_live { " [live]" } else { "" };
    format!(
        "{status} {:>8}  {}{live}  {}",
        format_age(now_ms.saturating_sub(entry.timestamp)),
        entry.display_title,
        entry.resource_id
    )
}

pub fn archive(config: &AppConfig, command: ArchiveCommand) -> CliResult<ExitCode> {
    let mut archive = config.archive_set();
    match command {
        ArchiveCommand::Count => println!("{}", archive.len()?),
        ArchiveCommand::Export { path } => {
            archive.export(&path)?;
            println!("Exported {} ids to {}", archive.len()?, path.display());
        }
        ArchiveCommand::Import { path } => {
            let added = archive.import_and_merge(&path)?;
            info!("Imported {} new ids from {}", added, path.display());
            println!("Added {added} new ids ({} total)", archive.len()?);
        }
        ArchiveCommand::Clear => {
            archive.clear()?;
            println!("Archive cleared");
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub fn config(config: &AppConfig, path: &Path, command: ConfigCommand) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Path => println!("{}", path.display()),
        ConfigCommand::Show => {
            let json = serde_json::to_string_pretty(config).map_err(easycut_core::Error::from)?;
            println!("{json}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn read_url_list(path: &Path) -> CliResult<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|source| CliError::UrlList {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_url_list(&content))
}

fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

fn format_age(elapsed_ms: u64) -> String {
    let secs = elapsed_ms / 1000;
    match secs {
        0..60 => "just now".to_string(),
        60..3600 => format!("{}m ago", secs / 60),
        3600..86_400 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
