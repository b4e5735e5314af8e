//! Archive of completed unique ids.
//!
//! The archive is a line-oriented text file, one unique id per line. It is
//! loaded on first access; single inserts append one line, while import and
//! clear rewrite the file sorted and deduplicated.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};

/// Default archive file name.
pub const ARCHIVE_FILE_NAME: &str = "archive.txt";

/// File-backed set of unique ids.
#[derive(Debug)]
pub struct ArchiveSet {
    path: PathBuf,
    ids: Option<BTreeSet<String>>,
}

impl ArchiveSet {
    /// Open an archive at `path`. Nothing is read until first access.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ids: None,
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `unique_id` is archived.
    pub fn contains(&mut self, unique_id: &str) -> Result<bool> {
        Ok(self.ids_mut()?.contains(unique_id.trim()))
    }

    /// Number of archived ids.
    pub fn len(&mut self) -> Result<usize> {
        Ok(self.ids_mut()?.len())
    }

    /// Whether the archive is empty.
    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.ids_mut()?.is_empty())
    }

    /// Add one id. Returns `true` if it was not present.
    pub fn insert(&mut self, unique_id: &str) -> Result<bool> {
        let id = unique_id.trim();
        if id.is_empty() {
            return Ok(false);
        }
        if self.ids_mut()?.contains(id) {
            return Ok(false);
        }

        self.append_line(id)
            .map_err(|e| Error::archive(&self.path, e))?;
        self.ids_mut()?.insert(id.to_string());
        Ok(true)
    }

    /// Write the archive, sorted, to `destination`.
    pub fn export(&mut self, destination: &Path) -> Result<()> {
        let content = render(self.ids_mut()?);
        fs::write(destination, content).map_err(|e| Error::archive(destination, e))?;
        info!(
            "Exported {} archive ids to {}",
            self.ids.as_ref().map_or(0, BTreeSet::len),
            destination.display()
        );
        Ok(())
    }

    /// Merge the ids listed in `source` and return how many were new.
    pub fn import_and_merge(&mut self, source: &Path) -> Result<usize> {
        let content = fs::read_to_string(source).map_err(|e| Error::archive(source, e))?;

        let mut merged = self.ids_mut()?.clone();
        let before = merged.len();
        merged.extend(parse_lines(&content));
        let added = merged.len() - before;

        self.write_ids(&merged)?;
        self.ids = Some(merged);
        info!(
            "Imported {} new archive ids from {}",
            added,
            source.display()
        );
        Ok(added)
    }

    /// Empty the archive.
    pub fn clear(&mut self) -> Result<()> {
        let empty = BTreeSet::new();
        if self.path.exists() {
            self.write_ids(&empty)?;
        }
        self.ids = Some(empty);
        info!("Cleared archive at {}", self.path.display());
        Ok(())
    }

    fn ids_mut(&mut self) -> Result<&mut BTreeSet<String>> {
        if self.ids.is_none() {
            let loaded = if self.path.exists() {
                let content =
                    fs::read_to_string(&self.path).map_err(|e| Error::archive(&self.path, e))?;
                parse_lines(&content).collect()
            } else {
                BTreeSet::new()
            };
            debug!(
                "Loaded {} archive ids from {}",
                loaded.len(),
                self.path.display()
            );
            self.ids = Some(loaded);
        }
        Ok(self.ids.get_or_insert_with(BTreeSet::new))
    }

    fn write_ids(&self, ids: &BTreeSet<String>) -> Result<()> {
        self.ensure_parent()?;
        fs::write(&self.path, render(ids)).map_err(|e| Error::archive(&self.path, e))
    }

    /// Append one line, terminating an unterminated last line first.
    fn append_line(&self, id: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;

        let mut line = String::new();
        if file.metadata()?.len() > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                line.push('\n');
            }
        }
        line.push_str(id);
        line.push('\n');
        file.write_all(line.as_bytes())
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| Error::archive(&self.path, e))?;
        }
        Ok(())
    }
}

fn parse_lines(content: &str) -> impl Iterator<Item = String> + '_ {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
}

fn render(ids: &BTreeSet<String>) -> String {
    let mut out = String::new();
    for id in ids {
        out.push_str(id);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn archive(dir: &TempDir) -> ArchiveSet {
        ArchiveSet::open(dir.path().join(ARCHIVE_FILE_NAME))
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive(&dir);
        assert_eq!(archive.len().unwrap(), 0);
        assert!(!archive.contains("abc").unwrap());
    }

    #[test]
    fn test_insert_appends_and_dedups() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive(&dir);
        assert!(archive.insert("b").unwrap());
        assert!(archive.insert("a").unwrap());
        assert!(!archive.insert("a").unwrap());
        assert!(!archive.insert("  ").unwrap());

        let content = fs::read_to_string(archive.path()).unwrap();
        assert_eq!(content, "b\na\n");

        let mut reopened = ArchiveSet::open(archive.path());
        assert!(reopened.contains("a").unwrap());
        assert_eq!(reopened.len().unwrap(), 2);
    }

    #[test]
    fn test_insert_after_unterminated_last_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(ARCHIVE_FILE_NAME);
        fs::write(&path, "aaa").unwrap();

        let mut archive = ArchiveSet::open(&path);
        assert!(archive.insert("bbb").unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "aaa\nbbb\n");

        let mut reopened = ArchiveSet::open(&path);
        assert!(reopened.contains("aaa").unwrap());
        assert!(reopened.contains("bbb").unwrap());
        assert_eq!(reopened.len().unwrap(), 2);
    }

    #[test]
    fn test_failed_write_leaves_set_unchanged() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();
        let mut archive = ArchiveSet::open(blocker.join(ARCHIVE_FILE_NAME));

        assert!(archive.insert("a").is_err());
        assert!(!archive.contains("a").unwrap());

        let source = dir.path().join("import.txt");
        fs::write(&source, "x\ny\n").unwrap();
        assert!(archive.import_and_merge(&source).is_err());
        assert!(archive.is_empty().unwrap());
    }

    #[test]
    fn test_import_merges_sorted() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive(&dir);
        for id in ["d", "c", "b"] {
            archive.insert(id).unwrap();
        }

        let source = dir.path().join("import.txt");
        fs::write(&source, "c\na\n\nb\na\n").unwrap();

        let added = archive.import_and_merge(&source).unwrap();
        assert_eq!(added, 1);
        assert_eq!(
            fs::read_to_string(archive.path()).unwrap(),
            "a\nb\nc\nd\n"
        );
    }

    #[test]
    fn test_import_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive(&dir);
        let err = archive
            .import_and_merge(&dir.path().join("missing.txt"))
            .unwrap_err();
        assert!(matches!(err, Error::Archive { .. }));
    }

    #[test]
    fn test_export() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive(&dir);
        archive.insert("z").unwrap();
        archive.insert("m").unwrap();

        let destination = dir.path().join("export.txt");
        archive.export(&destination).unwrap();
        assert_eq!(fs::read_to_string(&destination).unwrap(), "m\nz\n");
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive(&dir);
        archive.insert("a").unwrap();
        archive.clear().unwrap();
        assert!(archive.is_empty().unwrap());
        assert_eq!(fs::read_to_string(archive.path()).unwrap(), "");

        // Clearing something that never existed does not create a file.
        let other_dir = TempDir::new().unwrap();
        let mut untouched = ArchiveSet::open(other_dir.path().join("none.txt"));
        untouched.clear().unwrap();
        assert!(!untouched.path().exists());
    }
}
