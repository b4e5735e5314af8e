//! EasyCut Core Library
//!
//! This crate provides the download orchestration behind EasyCut:
//! - Resource id validation and failure classification
//! - A bounded-concurrency job orchestrator with pause, resume and stop
//! - Persistent download history and an archive of completed ids
//! - A pure Rust media fetcher built on `rusty_ytdl`

pub mod archive;
pub mod channel;
pub mod classify;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod history;
pub mod job;
pub mod options;
pub mod orchestrator;
pub mod validate;
pub mod ytdl;

pub use archive::ArchiveSet;
pub use channel::{ChannelDefault, ChannelDefaultsResolver};
pub use classify::{ClassifiedError, ErrorKind, classify};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use fetcher::{CredentialProvider, FetchError, FetchResult, MediaFetcher, Metadata};
pub use history::{HistoryEntry, HistoryStore};
pub use job::{JobId, JobRecord, JobStatus, SkipReason};
pub use options::{BatchOptions, DownloadMode, DownloadSettings, JobOptions, QualityPreset};
pub use orchestrator::{
    BatchEvent, BatchHandle, BatchSummary, Dependencies, DownloadOrchestrator, OrchestratorConfig,
};
pub use validate::validate_resource_id;
pub use ytdl::RustyYtdlFetcher;
