//! Errors surfaced by the command-line front end.

use std::path::PathBuf;

use thiserror::Error;

use crate::logging::LoggingError;

/// Result alias for command handlers.
pub type CliResult<T> = std::result::Result<T, CliError>;

/// Errors that end a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Failure inside the core library.
    #[error(transparent)]
    Core(#[from] easycut_core::Error),

    /// Logging could not be set up.
    #[error(transparent)]
    Logging(#[from] LoggingError),

    /// A URL list file could not be read.
    #[error("Failed to read URL list {path}: {source}")]
    UrlList {
        /// The list file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Nothing to download.
    #[error("No URLs given; pass them as arguments or with --file")]
    NoInput,

    /// Contradictory command-line options.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}
