//! Download orchestrator.
//!
//! Accepts batches of resource ids and drives every admitted job through its
//! lifecycle with bounded concurrency:
//!
//! - one dispatcher task per batch walks the jobs in submission order
//! - a semaphore shared by every batch of an orchestrator bounds the number
//!   of `Running` jobs
//! - pause and stop are cooperative flags checked before dispatch; running
//!   fetches are never interrupted
//! - every status change is published on a per-batch event channel
//!
//! History and archive mutations from concurrent runners are serialized
//! through a single lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::archive::ArchiveSet;
use crate::channel::ChannelDefaultsResolver;
use crate::classify::{ClassifiedError, ErrorKind, classify};
use crate::error::Result;
use crate::fetcher::{
    CredentialProvider, FetchError, FetchResult, MediaFetcher, Metadata, NoCredentials,
};
use crate::history::{DEFAULT_MAX_ENTRIES, HistoryEntry, HistoryStore};
use crate::job::{JobId, JobRecord, JobStatus, SkipReason, unix_millis};
use crate::options::{BatchOptions, DownloadMode, DownloadSettings, JobOptions};
use crate::validate::{extract_video_id, validate_resource_id};

/// Upper bound for the concurrency gate.
pub const MAX_CONCURRENT_JOBS_LIMIT: usize = 8;

// =============================================================================
// Configuration
// =============================================================================

/// Orchestrator tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Capacity of the concurrency gate.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_jobs: usize,
    /// Sleep between checks while a batch is paused.
    #[serde(default = "default_pause_poll_interval_ms")]
    pub pause_poll_interval_ms: u64,
    /// History retention cap.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

const fn default_max_concurrent() -> usize {
    3
}

const fn default_pause_poll_interval_ms() -> u64 {
    500
}

const fn default_history_limit() -> usize {
    DEFAULT_MAX_ENTRIES
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent(),
            pause_poll_interval_ms: default_pause_poll_interval_ms(),
            history_limit: default_history_limit(),
        }
    }
}

impl OrchestratorConfig {
    /// Clamp values to supported ranges.
    pub fn validate(&mut self) {
        self.max_concurrent_jobs = self
            .max_concurrent_jobs
            .clamp(1, MAX_CONCURRENT_JOBS_LIMIT);
        self.pause_poll_interval_ms = self.pause_poll_interval_ms.max(1);
        self.history_limit = self.history_limit.max(1);
    }

    /// Pause poll interval as a duration.
    #[must_use]
    pub const fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms)
    }
}

// =============================================================================
// Collaborators
// =============================================================================

/// Decides whether an item already in history is downloaded again.
#[cfg_attr(test, mockall::automock)]
pub trait DuplicatePrompt: Send + Sync {
    /// Return `true` to download `resource_id` again.
    fn should_redownload(&self, resource_id: &str, previous: &HistoryEntry) -> bool;
}

/// Never re-download items already in history.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysSkip;

impl DuplicatePrompt for AlwaysSkip {
    fn should_redownload(&self, _resource_id: &str, _previous: &HistoryEntry) -> bool {
        false
    }
}

/// Always re-download items already in history.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRedownload;

impl DuplicatePrompt for AlwaysRedownload {
    fn should_redownload(&self, _resource_id: &str, _previous: &HistoryEntry) -> bool {
        true
    }
}

/// Everything the orchestrator talks to.
pub struct Dependencies {
    /// History log.
    pub history: HistoryStore,
    /// Archive of completed unique ids.
    pub archive: ArchiveSet,
    /// Media engine.
    pub fetcher: Arc<dyn MediaFetcher>,
    /// Credential source.
    pub credentials: Arc<dyn CredentialProvider>,
    /// Channel quality defaults.
    pub channel_defaults: ChannelDefaultsResolver,
    /// Duplicate decision.
    pub duplicate_prompt: Arc<dyn DuplicatePrompt>,
}

impl Dependencies {
    /// Bundle the required collaborators; the rest take neutral defaults.
    #[must_use]
    pub fn new(history: HistoryStore, archive: ArchiveSet, fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self {
            history,
            archive,
            fetcher,
            credentials: Arc::new(NoCredentials),
            channel_defaults: ChannelDefaultsResolver::default(),
            duplicate_prompt: Arc::new(AlwaysSkip),
        }
    }

    /// Set the credential source.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the channel defaults.
    #[must_use]
    pub fn with_channel_defaults(mut self, channel_defaults: ChannelDefaultsResolver) -> Self {
        self.channel_defaults = channel_defaults;
        self
    }

    /// Set the duplicate decision.
    #[must_use]
    pub fn with_duplicate_prompt(mut self, prompt: Arc<dyn DuplicatePrompt>) -> Self {
        self.duplicate_prompt = prompt;
        self
    }
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependencies")
            .field("history", &self.history)
            .field("archive", &self.archive)
            .field("channel_defaults", &self.channel_defaults)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Events
// =============================================================================

/// Counts per terminal state once a batch is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Jobs created.
    pub total: usize,
    /// Jobs completed.
    pub completed: usize,
    /// Jobs failed.
    pub failed: usize,
    /// Jobs skipped.
    pub skipped: usize,
    /// Entries rejected at submission (no job created).
    pub rejected: usize,
}

/// Event published on a batch's channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BatchEvent {
    /// An entry failed validation; no job was created for it.
    ItemRejected {
        /// Position in the submitted list.
        index: usize,
        /// The rejected input.
        resource_id: String,
    },
    /// A job changed status.
    StatusChanged {
        /// The job.
        job_id: JobId,
        /// Previous status.
        old: JobStatus,
        /// New status.
        new: JobStatus,
    },
    /// Dispatch was paused.
    BatchPaused,
    /// Dispatch was resumed.
    BatchResumed,
    /// Dispatch was stopped.
    BatchStopped,
    /// Every job is terminal. Last event of the batch.
    BatchFinished(BatchSummary),
}

// =============================================================================
// Batch state
// =============================================================================

struct BatchShared {
    jobs: RwLock<Vec<JobRecord>>,
    options: BatchOptions,
    rejected: usize,
    paused: AtomicBool,
    fatal: AtomicBool,
    stop_tx: watch::Sender<bool>,
    finished_tx: watch::Sender<Option<BatchSummary>>,
    events: mpsc::UnboundedSender<BatchEvent>,
}

impl BatchShared {
    fn emit(&self, event: BatchEvent) {
        // A dropped receiver only means nobody is watching.
        let _ = self.events.send(event);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    fn is_finished(&self) -> bool {
        self.finished_tx.borrow().is_some()
    }

    /// Why dispatch must not continue, if it must not.
    fn halt_reason(&self) -> Option<SkipReason> {
        if self.is_stopped() {
            Some(SkipReason::Stopped)
        } else if self.fatal.load(Ordering::SeqCst) {
            Some(SkipReason::BatchFatal)
        } else {
            None
        }
    }

    /// Like [`Self::halt_reason`], but the first job of a batch is exempt
    /// from stop. Only a batch-fatal failure halts it.
    fn halt_reason_for(&self, first: bool) -> Option<SkipReason> {
        match self.halt_reason() {
            Some(SkipReason::Stopped) if first => self
                .fatal
                .load(Ordering::SeqCst)
                .then_some(SkipReason::BatchFatal),
            other => other,
        }
    }

    async fn resource_id(&self, index: usize) -> String {
        self.jobs
            .read()
            .await
            .get(index)
            .map(|job| job.resource_id.clone())
            .unwrap_or_default()
    }

    async fn transition(
        &self,
        index: usize,
        next: JobStatus,
        mutate: impl FnOnce(&mut JobRecord),
    ) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(index) else {
            return false;
        };

        match job.transition(next) {
            Some(old) => {
                mutate(job);
                debug!("Job {} {} -> {}", job.id, old, next);
                self.emit(BatchEvent::StatusChanged {
                    job_id: job.id,
                    old,
                    new: next,
                });
                true
            }
            None => {
                warn!("Job {} cannot move from {} to {}", job.id, job.status, next);
                false
            }
        }
    }

    async fn update(&self, index: usize, mutate: impl FnOnce(&mut JobRecord)) {
        if let Some(job) = self.jobs.write().await.get_mut(index) {
            mutate(job);
        }
    }

    async fn skip(&self, index: usize, reason: SkipReason) {
        if self
            .transition(index, JobStatus::Skipped, |job| job.skip_reason = Some(reason))
            .await
        {
            info!("Skipped job at position {} ({})", index, reason);
        }
    }

    /// Relabel every waiting job from `from` to `to`.
    async fn relabel(&self, from: JobStatus, to: JobStatus) {
        let mut jobs = self.jobs.write().await;
        for job in jobs.iter_mut().filter(|job| job.status == from) {
            if let Some(old) = job.transition(to) {
                self.emit(BatchEvent::StatusChanged {
                    job_id: job.id,
                    old,
                    new: to,
                });
            }
        }
    }

    /// Fail any job a crashed runner left behind.
    async fn fail_unfinished(&self) {
        let mut jobs = self.jobs.write().await;
        for job in jobs.iter_mut().filter(|job| !job.is_finished()) {
            let next = if job.status == JobStatus::Running {
                JobStatus::Failed
            } else {
                JobStatus::Skipped
            };
            if let Some(old) = job.transition(next) {
                if next == JobStatus::Failed {
                    job.error = Some(ClassifiedError {
                        kind: ErrorKind::Unknown,
                        message: "Job task ended unexpectedly".to_string(),
                    });
                } else {
                    job.skip_reason = Some(SkipReason::Stopped);
                }
                error!("Job {} left unfinished, marked {}", job.id, next);
                self.emit(BatchEvent::StatusChanged {
                    job_id: job.id,
                    old,
                    new: next,
                });
            }
        }
    }

    async fn summary(&self) -> BatchSummary {
        let jobs = self.jobs.read().await;
        let mut summary = BatchSummary {
            total: jobs.len(),
            rejected: self.rejected,
            ..Default::default()
        };
        for job in jobs.iter() {
            match job.status {
                JobStatus::Completed => summary.completed += 1,
                JobStatus::Failed => summary.failed += 1,
                JobStatus::Skipped => summary.skipped += 1,
                JobStatus::Queued | JobStatus::Paused | JobStatus::Running => {}
            }
        }
        summary
    }
}

/// Caller-side control over a submitted batch.
///
/// Cloning a handle yields another view of the same batch.
#[derive(Clone)]
pub struct BatchHandle {
    shared: Arc<BatchShared>,
}

impl BatchHandle {
    /// Stop dispatching new jobs until [`resume`](Self::resume).
    ///
    /// Running jobs are unaffected; waiting jobs are shown as `Paused`.
    pub async fn pause(&self) {
        if self.shared.is_finished() {
            return;
        }
        if self
            .shared
            .paused
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.shared
                .relabel(JobStatus::Queued, JobStatus::Paused)
                .await;
            self.shared.emit(BatchEvent::BatchPaused);
            info!("Batch paused");
        }
    }

    /// Resume dispatch after [`pause`](Self::pause).
    pub async fn resume(&self) {
        if self.shared.is_finished() {
            return;
        }
        if self
            .shared
            .paused
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.shared
                .relabel(JobStatus::Paused, JobStatus::Queued)
                .await;
            self.shared.emit(BatchEvent::BatchResumed);
            info!("Batch resumed");
        }
    }

    /// Stop dispatching; jobs not yet started end up `Skipped`.
    ///
    /// In-flight fetches run to completion.
    pub fn stop(&self) {
        if self.shared.is_finished() {
            return;
        }
        let changed = self.shared.stop_tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        });
        if changed {
            self.shared.emit(BatchEvent::BatchStopped);
            info!("Batch stopped");
        }
    }

    /// Whether the batch is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// Whether the batch was stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Whether an earlier failure halted the batch.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.shared.fatal.load(Ordering::SeqCst)
    }

    /// Whether every job is terminal.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.shared.is_finished()
    }

    /// Options the batch was submitted with.
    #[must_use]
    pub fn options(&self) -> &BatchOptions {
        &self.shared.options
    }

    /// Copy of every job record, in submission order.
    pub async fn snapshot(&self) -> Vec<JobRecord> {
        self.shared.jobs.read().await.clone()
    }

    /// Resource ids of failed jobs worth submitting again.
    pub async fn retry_candidates(&self) -> Vec<String> {
        self.shared
            .jobs
            .read()
            .await
            .iter()
            .filter(|job| job.is_retry_candidate())
            .map(|job| job.resource_id.clone())
            .collect()
    }

    /// Wait until every job is terminal.
    pub async fn wait(&self) -> BatchSummary {
        let mut finished = self.shared.finished_tx.subscribe();
        let summary = finished
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|summary| *summary);
        match summary {
            Some(summary) => summary,
            None => self.shared.summary().await,
        }
    }
}

impl std::fmt::Debug for BatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchHandle")
            .field("paused", &self.shared.is_paused())
            .field("stopped", &self.shared.is_stopped())
            .field("finished", &self.shared.is_finished())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

struct Stores {
    history: HistoryStore,
    archive: ArchiveSet,
}

struct Inner {
    config: OrchestratorConfig,
    settings: RwLock<DownloadSettings>,
    stores: Mutex<Stores>,
    archive_path: PathBuf,
    fetcher: Arc<dyn MediaFetcher>,
    credentials: Arc<dyn CredentialProvider>,
    channel_defaults: ChannelDefaultsResolver,
    duplicate_prompt: Arc<dyn DuplicatePrompt>,
    gate: Arc<Semaphore>,
    next_job_id: AtomicU64,
}

/// Outcome of walking one job up to the concurrency gate.
enum Dispatch {
    Run {
        permit: OwnedSemaphorePermit,
        settings: DownloadSettings,
        metadata: Option<Metadata>,
    },
    Skip(SkipReason),
}

/// Bounded-concurrency job orchestrator.
#[derive(Clone)]
pub struct DownloadOrchestrator {
    inner: Arc<Inner>,
}

impl DownloadOrchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(
        mut config: OrchestratorConfig,
        settings: DownloadSettings,
        dependencies: Dependencies,
    ) -> Self {
        config.validate();
        let archive_path = dependencies.archive.path().to_path_buf();

        info!(
            "Orchestrator ready: {} concurrent jobs, history cap {}",
            config.max_concurrent_jobs,
            dependencies.history.max_entries()
        );

        Self {
            inner: Arc::new(Inner {
                gate: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
                config,
                settings: RwLock::new(settings),
                stores: Mutex::new(Stores {
                    history: dependencies.history,
                    archive: dependencies.archive,
                }),
                archive_path,
                fetcher: dependencies.fetcher,
                credentials: dependencies.credentials,
                channel_defaults: dependencies.channel_defaults,
                duplicate_prompt: dependencies.duplicate_prompt,
                next_job_id: AtomicU64::new(0),
            }),
        }
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Concurrency slots not currently held.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.inner.gate.available_permits()
    }

    /// Current global download settings.
    pub async fn settings(&self) -> DownloadSettings {
        self.inner.settings.read().await.clone()
    }

    /// Replace the global download settings.
    ///
    /// Jobs already dispatched keep the settings they started with.
    pub async fn update_settings(&self, settings: DownloadSettings) {
        *self.inner.settings.write().await = settings;
        info!("Download settings updated");
    }

    /// Submit a batch of resource ids.
    ///
    /// Entries that fail validation are reported as
    /// [`BatchEvent::ItemRejected`] and get no job. Must be called from
    /// within a Tokio runtime.
    pub fn submit_batch<I, S>(
        &self,
        resource_ids: I,
        options: BatchOptions,
    ) -> (BatchHandle, mpsc::UnboundedReceiver<BatchEvent>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut jobs = Vec::new();
        let mut rejected = 0;
        for (index, resource_id) in resource_ids.into_iter().enumerate() {
            let resource_id: String = resource_id.into();
            if validate_resource_id(&resource_id) {
                let id = self.inner.next_job_id.fetch_add(1, Ordering::SeqCst);
                jobs.push(JobRecord::new(id, resource_id.trim()));
            } else {
                warn!("Rejected invalid entry {}: {:?}", index, resource_id);
                rejected += 1;
                let _ = events_tx.send(BatchEvent::ItemRejected { index, resource_id });
            }
        }

        info!(
            "Submitted batch: {} jobs, {} rejected, mode {}",
            jobs.len(),
            rejected,
            options.mode
        );

        let (stop_tx, _) = watch::channel(false);
        let (finished_tx, _) = watch::channel(None);
        let shared = Arc::new(BatchShared {
            jobs: RwLock::new(jobs),
            options,
            rejected,
            paused: AtomicBool::new(false),
            fatal: AtomicBool::new(false),
            stop_tx,
            finished_tx,
            events: events_tx,
        });

        tokio::spawn(Self::run_batch(Arc::clone(&self.inner), Arc::clone(&shared)));

        (BatchHandle { shared }, events_rx)
    }

    /// The `n` most recent history entries, newest first.
    pub async fn recent_history(&self, n: usize) -> Result<Vec<HistoryEntry>> {
        self.inner.stores.lock().await.history.recent(n)
    }

    /// Clear the history.
    pub async fn clear_history(&self) -> Result<()> {
        self.inner.stores.lock().await.history.clear()
    }

    /// Number of archived ids.
    pub async fn archive_count(&self) -> Result<usize> {
        self.inner.stores.lock().await.archive.len()
    }

    /// Export the archive to a file.
    pub async fn export_archive(&self, destination: &Path) -> Result<()> {
        self.inner.stores.lock().await.archive.export(destination)
    }

    /// Merge ids from a file into the archive; returns how many were new.
    pub async fn import_archive(&self, source: &Path) -> Result<usize> {
        self.inner.stores.lock().await.archive.import_and_merge(source)
    }

    /// Clear the archive.
    pub async fn clear_archive(&self) -> Result<()> {
        self.inner.stores.lock().await.archive.clear()
    }

    async fn run_batch(inner: Arc<Inner>, batch: Arc<BatchShared>) {
        let job_count = batch.jobs.read().await.len();
        let mut runners = JoinSet::new();

        for index in 0..job_count {
            match inner.dispatch(&batch, index).await {
                Dispatch::Run {
                    permit,
                    settings,
                    metadata,
                } => {
                    runners.spawn(Arc::clone(&inner).run_job(
                        Arc::clone(&batch),
                        index,
                        settings,
                        metadata,
                        permit,
                    ));
                }
                Dispatch::Skip(reason) => batch.skip(index, reason).await,
            }
        }

        while let Some(joined) = runners.join_next().await {
            if let Err(e) = joined {
                error!("Job task failed: {}", e);
            }
        }
        batch.fail_unfinished().await;

        let summary = batch.summary().await;
        info!(
            "Batch finished: {} completed, {} failed, {} skipped, {} rejected",
            summary.completed, summary.failed, summary.skipped, summary.rejected
        );
        batch.emit(BatchEvent::BatchFinished(summary));
        batch.finished_tx.send_replace(Some(summary));
    }
}

impl Inner {
    /// Walk one job through stop, pause, dedup and the gate.
    ///
    /// A stop requested before the first job is dispatched does not skip
    /// that job; every later one is skipped.
    async fn dispatch(&self, batch: &BatchShared, index: usize) -> Dispatch {
        let first = index == 0;
        if let Some(reason) = self.wait_until_dispatchable(batch, first).await {
            return Dispatch::Skip(reason);
        }

        let resource_id = batch.resource_id(index).await;
        let archive_mode = self.settings.read().await.archive_mode;

        let mut metadata = None;
        let unique_id = match extract_video_id(&resource_id) {
            Some(id) => Some(id),
            None => match self.probe(&resource_id).await {
                Ok(probed) => {
                    let id = Some(probed.unique_id.clone()).filter(|id| !id.is_empty());
                    metadata = Some(probed);
                    id
                }
                Err(e) => {
                    debug!("Probe failed for {}: {}", resource_id, e);
                    None
                }
            },
        };

        if let Some(unique_id) = unique_id {
            let known_title = metadata
                .as_ref()
                .map(|m| m.title.clone())
                .filter(|title| !title.is_empty());
            let recorded_id = unique_id.clone();
            batch
                .update(index, move |job| {
                    job.unique_id = Some(recorded_id);
                    if let Some(title) = known_title {
                        job.display_title = title;
                    }
                })
                .await;

            if let Some(reason) = self
                .duplicate_reason(&resource_id, &unique_id, archive_mode)
                .await
            {
                return Dispatch::Skip(reason);
            }
        }

        let mut stop_rx = batch.stop_tx.subscribe();
        loop {
            let permit = tokio::select! {
                biased;
                () = stop_requested(&mut stop_rx), if !first => {
                    return Dispatch::Skip(SkipReason::Stopped);
                }
                permit = Arc::clone(&self.gate).acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                error!("Concurrency gate closed");
                return Dispatch::Skip(SkipReason::Stopped);
            };

            if let Some(reason) = batch.halt_reason_for(first) {
                return Dispatch::Skip(reason);
            }
            if batch.is_paused() {
                // Paused while waiting for a slot; give it back.
                drop(permit);
                if let Some(reason) = self.wait_until_dispatchable(batch, first).await {
                    return Dispatch::Skip(reason);
                }
                continue;
            }

            // Global settings are frozen for this job from here on.
            let settings = self.settings.read().await.clone();
            if !batch.transition(index, JobStatus::Running, |_| {}).await {
                return Dispatch::Skip(SkipReason::Stopped);
            }
            return Dispatch::Run {
                permit,
                settings,
                metadata,
            };
        }
    }

    /// Sleep while paused; report a halt observed on any wake.
    ///
    /// Stop cancels a paused wait even for the first job.
    async fn wait_until_dispatchable(
        &self,
        batch: &BatchShared,
        first: bool,
    ) -> Option<SkipReason> {
        loop {
            if !batch.is_paused() {
                return batch.halt_reason_for(first);
            }
            if let Some(reason) = batch.halt_reason() {
                return Some(reason);
            }
            tokio::time::sleep(self.config.pause_poll_interval()).await;
        }
    }

    async fn duplicate_reason(
        &self,
        resource_id: &str,
        unique_id: &str,
        archive_mode: bool,
    ) -> Option<SkipReason> {
        let previous = {
            let mut stores = self.stores.lock().await;
            if archive_mode {
                match stores.archive.contains(unique_id) {
                    Ok(true) => {
                        info!("{} is in the archive", unique_id);
                        return Some(SkipReason::Archived);
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Archive lookup failed: {}", e),
                }
            }
            match stores.history.find_by_unique_id(unique_id) {
                Ok(previous) => previous,
                Err(e) => {
                    warn!("History lookup failed: {}", e);
                    None
                }
            }
        }?;

        let prompt = Arc::clone(&self.duplicate_prompt);
        let resource = resource_id.to_string();
        let redownload =
            tokio::task::spawn_blocking(move || prompt.should_redownload(&resource, &previous))
                .await
                .unwrap_or(false);

        if redownload {
            info!("{} already downloaded, downloading again", unique_id);
            None
        } else {
            info!("{} already downloaded, skipping", unique_id);
            Some(SkipReason::Duplicate)
        }
    }

    async fn run_job(
        self: Arc<Self>,
        batch: Arc<BatchShared>,
        index: usize,
        settings: DownloadSettings,
        metadata: Option<Metadata>,
        permit: OwnedSemaphorePermit,
    ) {
        let resource_id = batch.resource_id(index).await;

        let metadata = match metadata {
            Some(metadata) => Some(metadata),
            None if !self.channel_defaults.is_empty() => self.probe(&resource_id).await.ok(),
            None => None,
        };
        let channel_quality = metadata
            .as_ref()
            .and_then(|m| m.uploader.as_deref())
            .and_then(|uploader| self.channel_defaults.resolve(uploader));
        if let Some(quality) = channel_quality {
            debug!("Channel default {} applies to {}", quality, resource_id);
        }

        let archive_file = settings.archive_mode.then(|| self.archive_path.clone());
        let auth_token_path = if self.credentials.is_authenticated() {
            self.credentials.auth_token_path()
        } else {
            None
        };
        let options = JobOptions::resolve(&settings, &batch.options, channel_quality, unix_millis())
            .with_archive_file(archive_file)
            .with_auth_token_path(auth_token_path);

        let is_live = matches!(options.mode, DownloadMode::Live { .. })
            || metadata.as_ref().is_some_and(|m| m.is_live);
        let frozen = options.clone();
        let probed_title = metadata
            .map(|m| m.title)
            .filter(|title| !title.is_empty());
        batch
            .update(index, move |job| {
                job.options = Some(frozen);
                if let Some(title) = probed_title {
                    job.display_title = title;
                }
            })
            .await;

        match self.fetch(&resource_id, options).await {
            Ok(result) => {
                self.record_success(&resource_id, &result, is_live, settings.archive_mode)
                    .await;
                info!("Completed {} -> {}", result.title, result.output_path.display());
                batch
                    .transition(index, JobStatus::Completed, move |job| {
                        job.display_title = result.title;
                        job.unique_id = Some(result.unique_id);
                        job.output_path = Some(result.output_path);
                        job.thumbnail_url = result.thumbnail_url;
                    })
                    .await;
            }
            Err(e) => {
                let classified = classify(&e.message);
                error!(
                    "Job for {} failed ({}): {}",
                    resource_id, classified.kind, e.message
                );

                self.record_failure(&batch, index, &resource_id, is_live).await;
                if classified.kind.is_batch_fatal() && !batch.fatal.swap(true, Ordering::SeqCst) {
                    warn!("Halting batch: {}", classified.message);
                }
                batch
                    .transition(index, JobStatus::Failed, move |job| {
                        job.error = Some(classified);
                    })
                    .await;
            }
        }

        // Released only after the final status is visible.
        drop(permit);
    }

    async fn probe(&self, resource_id: &str) -> std::result::Result<Metadata, FetchError> {
        let fetcher = Arc::clone(&self.fetcher);
        let resource = resource_id.to_string();
        match tokio::task::spawn_blocking(move || fetcher.probe(&resource)).await {
            Ok(result) => result,
            Err(e) => Err(FetchError::new(format!("Probe task failed: {e}"))),
        }
    }

    async fn fetch(
        &self,
        resource_id: &str,
        options: JobOptions,
    ) -> std::result::Result<FetchResult, FetchError> {
        let fetcher = Arc::clone(&self.fetcher);
        let resource = resource_id.to_string();
        match tokio::task::spawn_blocking(move || fetcher.fetch(&resource, &options)).await {
            Ok(result) => result,
            Err(e) => Err(FetchError::new(format!("Fetch task failed: {e}"))),
        }
    }

    async fn record_success(
        &self,
        resource_id: &str,
        result: &FetchResult,
        is_live: bool,
        archive_mode: bool,
    ) {
        let entry = HistoryEntry::success(
            resource_id,
            result.title.clone(),
            Some(result.unique_id.clone()),
        )
        .with_live(is_live);

        let mut stores = self.stores.lock().await;
        if let Err(e) = stores.history.append(entry) {
            error!("Failed to record history: {}", e);
        }
        if archive_mode
            && let Err(e) = stores.archive.insert(&result.unique_id)
        {
            error!("Failed to update archive: {}", e);
        }
    }

    async fn record_failure(
        &self,
        batch: &BatchShared,
        index: usize,
        resource_id: &str,
        is_live: bool,
    ) {
        let (title, unique_id) = batch
            .jobs
            .read()
            .await
            .get(index)
            .map(|job| (job.display_title.clone(), job.unique_id.clone()))
            .unwrap_or_default();
        let entry = HistoryEntry::error(resource_id, title, unique_id).with_live(is_live);

        if let Err(e) = self.stores.lock().await.history.append(entry) {
            error!("Failed to record history: {}", e);
        }
    }
}

impl std::fmt::Debug for DownloadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Resolves once stop is requested; never if the sender is gone.
async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    if stop_rx.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}
