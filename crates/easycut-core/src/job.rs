//! Job records and their lifecycle.
//!
//! ```text
//! Queued <-> Paused
//!    |         |
//!    +----+----+
//!         |-----------------> Skipped
//!         v
//!      Running -> Completed | Failed | Skipped
//! ```
//!
//! `Queued` and `Paused` differ only for display. Terminal states are never
//! left; a retry is a brand-new record.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::classify::ClassifiedError;
use crate::options::JobOptions;

/// Unique identifier for a job.
pub type JobId = u64;

/// Maximum characters of the resource id used as the initial display title.
pub const DISPLAY_TITLE_MAX_CHARS: usize = 50;

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for dispatch.
    Queued,
    /// Waiting for dispatch while the batch is paused.
    Paused,
    /// Holding a concurrency slot; the fetch is in flight.
    Running,
    /// Fetched successfully.
    Completed,
    /// Fetch failed; see the record's error.
    Failed,
    /// Never fetched; see the record's skip reason.
    Skipped,
}

impl JobStatus {
    /// Whether the status is final.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Whether the job is still waiting for dispatch.
    #[must_use]
    pub const fn is_waiting(self) -> bool {
        matches!(self, Self::Queued | Self::Paused)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Queued => matches!(next, Self::Paused | Self::Running | Self::Skipped),
            Self::Paused => matches!(next, Self::Queued | Self::Running | Self::Skipped),
            Self::Running => matches!(next, Self::Completed | Self::Failed | Self::Skipped),
            Self::Completed | Self::Failed | Self::Skipped => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "Queued"),
            Self::Paused => write!(f, "Paused"),
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Skipped => write!(f, "Skipped"),
        }
    }
}

/// Why a job was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Already in history and the caller declined a re-download.
    Duplicate,
    /// Already in the archive while archive mode is on.
    Archived,
    /// The batch was stopped before dispatch.
    Stopped,
    /// An earlier job failed in a way that repeats for every job.
    BatchFatal,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Duplicate => write!(f, "already downloaded"),
            Self::Archived => write!(f, "in archive"),
            Self::Stopped => write!(f, "stopped"),
            Self::BatchFatal => write!(f, "batch halted"),
        }
    }
}

/// One job's lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Sequence number assigned at submission.
    pub id: JobId,
    /// Raw input as supplied by the caller.
    pub resource_id: String,
    /// Human-readable label.
    pub display_title: String,
    /// Current status.
    pub status: JobStatus,
    /// Options, frozen once the job is dispatched.
    pub options: Option<JobOptions>,
    /// Set only when `status == Failed`.
    pub error: Option<ClassifiedError>,
    /// Set only when `status == Skipped`.
    pub skip_reason: Option<SkipReason>,
    /// Unique id of the fetched item, once known.
    pub unique_id: Option<String>,
    /// Output file, once written.
    pub output_path: Option<PathBuf>,
    /// Thumbnail URL, if the engine reported one.
    pub thumbnail_url: Option<String>,
    /// Submission time (Unix millis).
    pub queued_at: u64,
    /// Time the job entered `Running` (Unix millis).
    pub started_at: Option<u64>,
    /// Time the job reached a terminal state (Unix millis).
    pub finished_at: Option<u64>,
}

impl JobRecord {
    /// Create a queued record for a resource id.
    #[must_use]
    pub fn new(id: JobId, resource_id: impl Into<String>) -> Self {
        let resource_id = resource_id.into();
        Self {
            id,
            display_title: truncate_title(&resource_id),
            resource_id,
            status: JobStatus::Queued,
            options: None,
            error: None,
            skip_reason: None,
            unique_id: None,
            output_path: None,
            thumbnail_url: None,
            queued_at: unix_millis(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Move to `next` if the lifecycle allows it, stamping times.
    ///
    /// Returns the previous status, or `None` if the move was refused.
    pub fn transition(&mut self, next: JobStatus) -> Option<JobStatus> {
        if !self.status.can_transition_to(next) {
            return None;
        }
        let previous = self.status;
        self.status = next;
        if next == JobStatus::Running {
            self.started_at = Some(unix_millis());
        }
        if next.is_terminal() {
            self.finished_at = Some(unix_millis());
        }
        Some(previous)
    }

    /// Whether the record is in a terminal state.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether a failed record is worth resubmitting.
    #[must_use]
    pub fn is_retry_candidate(&self) -> bool {
        self.status == JobStatus::Failed
            && self
                .error
                .as_ref()
                .is_some_and(|error| error.kind.is_retryable())
    }
}

/// Initial display title: the resource id cut to a readable length.
fn truncate_title(resource_id: &str) -> String {
    let trimmed = resource_id.trim();
    if trimmed.chars().count() <= DISPLAY_TITLE_MAX_CHARS {
        trimmed.to_string()
    } else {
        let mut title: String = trimmed.chars().take(DISPLAY_TITLE_MAX_CHARS).collect();
        title.push_str("...");
        title
    }
}

/// Current time as Unix milliseconds.
pub(crate) fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ErrorKind, classify};

    #[test]
    fn test_new_record_is_queued() {
        let record = JobRecord::new(7, "https://youtu.be/dQw4w9WgXcQ");
        assert_eq!(record.id, 7);
        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.display_title, "https://youtu.be/dQw4w9WgXcQ");
        assert!(record.options.is_none());
        assert!(record.queued_at > 0);
    }

    #[test]
    fn test_display_title_truncated() {
        let url = format!("https://www.youtube.com/watch?v={}", "a".repeat(80));
        let record = JobRecord::new(0, url.as_str());
        assert_eq!(
            record.display_title.chars().count(),
            DISPLAY_TITLE_MAX_CHARS + 3
        );
        assert_eq!(record.resource_id, url);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut record = JobRecord::new(0, "https://youtu.be/x");
        assert_eq!(record.transition(JobStatus::Running), Some(JobStatus::Queued));
        assert!(record.started_at.is_some());
        assert_eq!(
            record.transition(JobStatus::Completed),
            Some(JobStatus::Running)
        );
        assert!(record.finished_at.is_some());
        assert!(record.is_finished());
    }

    #[test]
    fn test_pause_relabel_is_reversible() {
        let mut record = JobRecord::new(0, "https://youtu.be/x");
        assert!(record.transition(JobStatus::Paused).is_some());
        assert!(record.transition(JobStatus::Queued).is_some());
        assert!(record.transition(JobStatus::Paused).is_some());
        assert!(record.transition(JobStatus::Running).is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Skipped] {
            for next in [
                JobStatus::Queued,
                JobStatus::Paused,
                JobStatus::Running,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Skipped,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_refused_transition_leaves_record_untouched() {
        let mut record = JobRecord::new(0, "https://youtu.be/x");
        assert_eq!(record.transition(JobStatus::Completed), None);
        assert_eq!(record.status, JobStatus::Queued);
        assert!(record.finished_at.is_none());
    }

    #[test]
    fn test_retry_candidate() {
        let mut record = JobRecord::new(0, "https://youtu.be/x");
        record.transition(JobStatus::Running);
        record.transition(JobStatus::Failed);
        record.error = Some(classify("HTTP Error 429: Too Many Requests"));
        assert!(record.is_retry_candidate());

        record.error = Some(classify("Private video"));
        assert_eq!(
            record.error.as_ref().map(|e| e.kind),
            Some(ErrorKind::PrivateOrRestricted)
        );
        assert!(!record.is_retry_candidate());
    }
}
