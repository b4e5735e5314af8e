//! Persistent download history.
//!
//! The history is a pretty-printed JSON array of [`HistoryEntry`] records,
//! oldest first, capped at a fixed number of entries. It is loaded on first
//! access and cached for the rest of the run; every mutation rewrites the
//! whole file. A single orchestrator owns the store, so there is no
//! cross-process coordination.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::job::unix_millis;

/// Default history file name.
pub const HISTORY_FILE_NAME: &str = "history.json";

/// Default retention cap.
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Outcome recorded for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    /// The job completed.
    Success,
    /// The job failed.
    Error,
}

/// One persisted job outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Unix millis when the outcome was recorded.
    pub timestamp: u64,
    /// Resource id as submitted.
    pub resource_id: String,
    /// Title at the time of recording.
    pub display_title: String,
    /// Outcome.
    pub status: HistoryStatus,
    /// Unique id of the item, if known.
    #[serde(default)]
    pub resource_unique_id: Option<String>,
    /// Whether the item was a live recording.
    #[serde(default)]
    pub is_live: bool,
}

impl HistoryEntry {
    /// Create a success entry stamped with the current time.
    #[must_use]
    pub fn success(
        resource_id: impl Into<String>,
        display_title: impl Into<String>,
        unique_id: Option<String>,
    ) -> Self {
        Self {
            timestamp: unix_millis(),
            resource_id: resource_id.into(),
            display_title: display_title.into(),
            status: HistoryStatus::Success,
            resource_unique_id: unique_id,
            is_live: false,
        }
    }

    /// Create an error entry stamped with the current time.
    #[must_use]
    pub fn error(
        resource_id: impl Into<String>,
        display_title: impl Into<String>,
        unique_id: Option<String>,
    ) -> Self {
        Self {
            status: HistoryStatus::Error,
            ..Self::success(resource_id, display_title, unique_id)
        }
    }

    /// Mark the entry as a live recording.
    #[must_use]
    pub const fn with_live(mut self, is_live: bool) -> Self {
        self.is_live = is_live;
        self
    }

    /// Whether this entry records a success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == HistoryStatus::Success
    }
}

/// File-backed, size-bounded history log.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    max_entries: usize,
    entries: Option<Vec<HistoryEntry>>,
    success_ids: HashSet<String>,
}

impl HistoryStore {
    /// Open a store at `path`. Nothing is read until first access.
    ///
    /// A cap of zero is treated as one.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        Self {
            path: path.into(),
            max_entries: max_entries.max(1),
            entries: None,
            success_ids: HashSet::new(),
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Retention cap.
    #[must_use]
    pub const fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Append an entry, evicting the oldest ones beyond the cap.
    pub fn append(&mut self, entry: HistoryEntry) -> Result<()> {
        let max_entries = self.max_entries;
        let entries = self.entries_mut()?;
        entries.push(entry);

        let overflow = entries.len().saturating_sub(max_entries);
        if overflow > 0 {
            entries.drain(..overflow);
            debug!("Evicted {} history entries", overflow);
        }

        self.rebuild_index();
        self.persist()
    }

    /// All entries, oldest first.
    pub fn load_all(&mut self) -> Result<Vec<HistoryEntry>> {
        Ok(self.entries_mut()?.clone())
    }

    /// The `n` most recent entries, newest first.
    pub fn recent(&mut self, n: usize) -> Result<Vec<HistoryEntry>> {
        Ok(self.entries_mut()?.iter().rev().take(n).cloned().collect())
    }

    /// Number of stored success entries.
    pub fn success_count(&mut self) -> Result<usize> {
        Ok(self
            .entries_mut()?
            .iter()
            .filter(|e| e.is_success())
            .count())
    }

    /// Remove every entry. A store with nothing to clear is left untouched.
    pub fn clear(&mut self) -> Result<()> {
        let had_entries = !self.entries_mut()?.is_empty();
        if !had_entries && !self.path.exists() {
            return Ok(());
        }

        self.entries = Some(Vec::new());
        self.success_ids.clear();
        self.persist()?;
        info!("Cleared history at {}", self.path.display());
        Ok(())
    }

    /// Most recent success entry for a unique id.
    pub fn find_by_unique_id(&mut self, unique_id: &str) -> Result<Option<HistoryEntry>> {
        self.entries_mut()?;
        if !self.success_ids.contains(unique_id) {
            return Ok(None);
        }

        Ok(self.entries.as_ref().and_then(|entries| {
            entries
                .iter()
                .rev()
                .find(|e| e.is_success() && e.resource_unique_id.as_deref() == Some(unique_id))
                .cloned()
        }))
    }

    fn entries_mut(&mut self) -> Result<&mut Vec<HistoryEntry>> {
        if self.entries.is_none() {
            let loaded = self.read_file()?;
            self.entries = Some(loaded);
            self.rebuild_index();
        }
        // Populated above.
        Ok(self.entries.get_or_insert_with(Vec::new))
    }

    fn read_file(&self) -> Result<Vec<HistoryEntry>> {
        if !self.path.exists() {
            debug!("No history file at {}", self.path.display());
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).map_err(|e| Error::history(&self.path, e))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Vec<HistoryEntry>>(&content) {
            Ok(mut entries) => {
                let overflow = entries.len().saturating_sub(self.max_entries);
                entries.drain(..overflow);
                debug!(
                    "Loaded {} history entries from {}",
                    entries.len(),
                    self.path.display()
                );
                Ok(entries)
            }
            Err(e) => {
                warn!(
                    "Failed to parse history file {}, starting empty: {}",
                    self.path.display(),
                    e
                );
                Ok(Vec::new())
            }
        }
    }

    fn rebuild_index(&mut self) {
        self.success_ids = self
            .entries
            .iter()
            .flatten()
            .filter(|e| e.is_success())
            .filter_map(|e| e.resource_unique_id.clone())
            .collect();
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| Error::history(&self.path, e))?;
        }

        let entries = self.entries.as_deref().unwrap_or_default();
        let content = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, content).map_err(|e| Error::history(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir, cap: usize) -> HistoryStore {
        HistoryStore::open(dir.path().join(HISTORY_FILE_NAME), cap)
    }

    fn entry(n: usize) -> HistoryEntry {
        HistoryEntry::success(
            format!("https://youtu.be/{n}"),
            format!("Video {n}"),
            Some(format!("id{n}")),
        )
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut history = store(&dir, 10);
        assert!(history.load_all().unwrap().is_empty());
        assert!(!history.path().exists());
    }

    #[test]
    fn test_append_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let mut history = store(&dir, 10);
        history.append(entry(1)).unwrap();
        history.append(entry(2)).unwrap();

        let mut reopened = store(&dir, 10);
        let entries = reopened.load_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].display_title, "Video 1");
        assert_eq!(entries[1].display_title, "Video 2");
    }

    #[test]
    fn test_retention_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let mut history = store(&dir, 3);
        for n in 0..4 {
            history.append(entry(n)).unwrap();
        }

        let entries = history.load_all().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].display_title, "Video 1");
        assert!(history.find_by_unique_id("id0").unwrap().is_none());
    }

    #[test]
    fn test_recent_is_newest_first() {
        let dir = TempDir::new().unwrap();
        let mut history = store(&dir, 10);
        for n in 0..5 {
            history.append(entry(n)).unwrap();
        }
        let recent = history.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].display_title, "Video 4");
        assert_eq!(recent[1].display_title, "Video 3");
    }

    #[test]
    fn test_find_by_unique_id_ignores_errors() {
        let dir = TempDir::new().unwrap();
        let mut history = store(&dir, 10);
        history
            .append(HistoryEntry::error("https://youtu.be/x", "X", Some("x".into())))
            .unwrap();
        assert!(history.find_by_unique_id("x").unwrap().is_none());

        history
            .append(HistoryEntry::success("https://youtu.be/x", "X", Some("x".into())))
            .unwrap();
        let found = history.find_by_unique_id("x").unwrap().unwrap();
        assert!(found.is_success());
        assert_eq!(history.success_count().unwrap(), 1);
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let mut history = store(&dir, 10);
        history.clear().unwrap();
        assert!(!history.path().exists());

        history.append(entry(1)).unwrap();
        history.clear().unwrap();
        assert!(history.load_all().unwrap().is_empty());
        assert!(history.find_by_unique_id("id1").unwrap().is_none());

        let mut reopened = store(&dir, 10);
        assert!(reopened.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(HISTORY_FILE_NAME);
        fs::write(&path, "{ not json").unwrap();

        let mut history = HistoryStore::open(&path, 10);
        assert!(history.load_all().unwrap().is_empty());
        history.append(entry(1)).unwrap();
        assert_eq!(history.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_oversized_file_is_trimmed_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(HISTORY_FILE_NAME);
        let entries: Vec<HistoryEntry> = (0..5).map(entry).collect();
        fs::write(&path, serde_json::to_string(&entries).unwrap()).unwrap();

        let mut history = HistoryStore::open(&path, 2);
        let loaded = history.load_all().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].display_title, "Video 3");
    }

    #[test]
    fn test_serialized_status_names() {
        let json = serde_json::to_string(&entry(1).with_live(true)).unwrap();
        assert!(json.contains("\"status\":\"success\""));
        assert!(json.contains("\"is_live\":true"));
    }
}
