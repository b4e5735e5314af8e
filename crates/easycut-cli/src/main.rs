//! EasyCut - batch media downloads from the command line.
//!
//! Loads the persisted configuration, sets up logging and hands the work
//! to [`easycut_core::DownloadOrchestrator`].

mod commands;
mod error;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use easycut_core::AppConfig;
use tracing::{Level, debug, error, info};

use crate::commands::{ArchiveCommand, ConfigCommand, DownloadArgs, HistoryArgs};
use crate::error::CliResult;
use crate::logging::LoggingConfig;

#[derive(Debug, Parser)]
#[command(name = "easycut", version, about = "Download videos and audio in batches")]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long = "config", global = true, value_name = "FILE")]
    config_file: Option<PathBuf>,

    /// Directory for log files
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Verbose console logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors to the console
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download a batch of URLs
    Download(DownloadArgs),
    /// Show or clear the download history
    History(HistoryArgs),
    /// Maintain the download archive
    Archive {
        #[command(subcommand)]
        command: ArchiveCommand,
    },
    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logging_config = LoggingConfig::for_verbosity(cli.verbose);
    if cli.quiet {
        logging_config = logging_config.with_console_level(Level::ERROR);
    }
    if let Some(dir) = cli.log_dir.clone() {
        logging_config = logging_config.with_log_directory(dir);
    }
    let _guard = match logging::init(&logging_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("easycut: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("easycut: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<ExitCode> {
    let config_path = cli.config_file.unwrap_or_else(AppConfig::config_file_path);
    let config = AppConfig::load_from(&config_path)?;
    debug!("Using config {}", config_path.display());
    info!("EasyCut {} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Download(args) => commands::download(config, args).await,
        Command::History(args) => commands::history(&config, &args),
        Command::Archive { command } => commands::archive(&config, command),
        Command::Config { command } => commands::config(&config, &config_path, command),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_download() {
        let cli = Cli::try_parse_from([
            "easycut",
            "download",
            "https://youtu.be/dQw4w9WgXcQ",
            "--mode",
            "audio",
            "-j",
            "2",
        ])
        .unwrap();
        let Command::Download(args) = cli.command else {
            panic!("expected download");
        };
        assert_eq!(args.urls.len(), 1);
        assert_eq!(args.concurrency, Some(2));
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["easycut", "-v", "-q", "history"]).is_err());
    }

    #[test]
    fn test_parse_archive_import() {
        let cli = Cli::try_parse_from(["easycut", "archive", "import", "ids.txt"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Archive {
                command: ArchiveCommand::Import { .. }
            }
        ));
    }
}
