//! Application configuration management.
//!
//! The configuration is a pretty-printed JSON file under the platform config
//! directory. A missing file yields defaults, which are written back so the
//! user has something to edit.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::archive::{ARCHIVE_FILE_NAME, ArchiveSet};
use crate::channel::{ChannelDefault, ChannelDefaultsResolver};
use crate::error::{Error, Result};
use crate::history::{HISTORY_FILE_NAME, HistoryStore};
use crate::options::DownloadSettings;
use crate::orchestrator::OrchestratorConfig;

/// Application directory name under the platform config/data directories.
pub const APP_DIR_NAME: &str = "easycut";

/// Audio bitrates offered for extraction, in kbps.
pub const SUPPORTED_BITRATES: [u32; 4] = [128, 192, 256, 320];

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global download defaults.
    #[serde(default)]
    pub download: DownloadSettings,
    /// Orchestrator tuning.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Per-channel quality defaults, most specific first.
    #[serde(default)]
    pub channel_defaults: Vec<ChannelDefault>,
    /// History file location.
    #[serde(default = "default_history_file")]
    pub history_file: PathBuf,
    /// Archive file location.
    #[serde(default = "default_archive_file")]
    pub archive_file: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download: DownloadSettings::default(),
            orchestrator: OrchestratorConfig::default(),
            channel_defaults: Vec::new(),
            history_file: default_history_file(),
            archive_file: default_archive_file(),
        }
    }
}

impl AppConfig {
    /// Load from the default location, creating it with defaults if absent.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file_path())
    }

    /// Save to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_file_path())
    }

    /// Location of the default config file.
    #[must_use]
    pub fn config_file_path() -> PathBuf {
        config_file_path()
    }

    /// Load from `path`, creating it with defaults if absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found, using defaults");
            let config = Self::default();
            if let Err(e) = config.save_to(path) {
                warn!("Failed to save default config: {}", e);
            }
            return Ok(config);
        }

        let content = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {e}")))?;
        config.validate()?;

        info!("Loaded config from {}", path.display());
        debug!(
            "Output directory: {}",
            config.download.output_dir.display()
        );
        Ok(config)
    }

    /// Save to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Configuration(format!(
                    "Failed to create config directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| {
            Error::Configuration(format!(
                "Failed to write config file {}: {e}",
                path.display()
            ))
        })?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Clamp tunables and reject values that cannot work.
    pub fn validate(&mut self) -> Result<()> {
        self.orchestrator.validate();

        if self.download.output_dir.as_os_str().is_empty() {
            return Err(Error::Configuration(
                "Output directory must not be empty".to_string(),
            ));
        }
        if !SUPPORTED_BITRATES.contains(&self.download.audio.bitrate_kbps) {
            return Err(Error::Configuration(format!(
                "Unsupported audio bitrate {} kbps (expected one of {:?})",
                self.download.audio.bitrate_kbps, SUPPORTED_BITRATES
            )));
        }
        Ok(())
    }

    /// Open the history store described by this config.
    #[must_use]
    pub fn history_store(&self) -> HistoryStore {
        HistoryStore::open(&self.history_file, self.orchestrator.history_limit)
    }

    /// Open the archive described by this config.
    #[must_use]
    pub fn archive_set(&self) -> ArchiveSet {
        ArchiveSet::open(&self.archive_file)
    }

    /// Build the channel defaults lookup.
    #[must_use]
    pub fn channel_resolver(&self) -> ChannelDefaultsResolver {
        ChannelDefaultsResolver::new(&self.channel_defaults)
    }
}

fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

fn default_history_file() -> PathBuf {
    app_data_dir().join(HISTORY_FILE_NAME)
}

fn default_archive_file() -> PathBuf {
    app_data_dir().join(ARCHIVE_FILE_NAME)
}

fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(APP_DIR_NAME)
        .join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::QualityPreset;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let mut config = AppConfig::default();
        config.download.quality = QualityPreset::P1080;
        config.download.archive_mode = true;
        config
            .channel_defaults
            .push(ChannelDefault::new("Some Channel", QualityPreset::P480));
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"download":{"output_dir":"/videos","quality":"720p"}}"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.download.output_dir, PathBuf::from("/videos"));
        assert_eq!(config.download.quality, QualityPreset::P720);
        assert_eq!(config.download.audio.bitrate_kbps, 192);
        assert_eq!(config.download.network.retries, 10);
        assert_eq!(config.orchestrator.max_concurrent_jobs, 3);
        assert!(config.history_file.ends_with(HISTORY_FILE_NAME));
    }

    #[test]
    fn test_parse_error_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();

        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_validate_clamps_concurrency() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"download":{"output_dir":"/videos"},"orchestrator":{"max_concurrent_jobs":64}}"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.orchestrator.max_concurrent_jobs, 8);
    }

    #[test]
    fn test_validate_rejects_bitrate() {
        let mut config = AppConfig::default();
        config.download.audio.bitrate_kbps = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_path() {
        let path = AppConfig::config_file_path();
        assert!(path.ends_with("easycut/config.json"));
    }

    #[test]
    fn test_store_helpers_use_configured_paths() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig {
            history_file: dir.path().join("h.json"),
            archive_file: dir.path().join("a.txt"),
            channel_defaults: vec![ChannelDefault::new("x", QualityPreset::Worst)],
            ..Default::default()
        };
        assert_eq!(config.history_store().path(), dir.path().join("h.json"));
        assert_eq!(config.archive_set().path(), dir.path().join("a.txt"));
        assert_eq!(config.channel_resolver().len(), 1);
    }
}
