//! # guardian-cli
//!
//! Offline operator commands for a Guardian event log directory.
//!
//! ## Commands
//!
//! - `guardian validate-replay` - Check every log line decodes and folds
//! - `guardian migrate` - Upgrade legacy records to the current schema
//! - `guardian consistency` - Compare the persisted snapshot with a full replay
//!
//! ## Configuration
//!
//! - `GUARDIAN_DATA_DIR` - Directory holding `events.jsonl` and `snapshot.json`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Guardian CLI - event log maintenance.
#[derive(Debug, Parser)]
#[command(name = "guardian")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding the event log.
    #[arg(long, global = true, env = "GUARDIAN_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the effective configuration.
    #[must_use]
    pub fn config(&self) -> Config {
        Config {
            data_dir: self.data_dir.clone(),
            format: self.format.clone(),
        }
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Check that every log line decodes and folds cleanly.
    ValidateReplay(commands::validate_replay::ValidateReplayArgs),
    /// Upgrade legacy records to the current schema.
    Migrate(commands::migrate::MigrateArgs),
    /// Compare the persisted snapshot with a full replay.
    Consistency(commands::consistency::ConsistencyArgs),
}

/// Output format.
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
}

/// CLI configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Event log directory.
    pub data_dir: Option<PathBuf>,
    /// Output format.
    pub format: OutputFormat,
}

impl Config {
    /// Returns the data directory or a usage error.
    ///
    /// # Errors
    ///
    /// Returns an error when neither `--data-dir` nor `GUARDIAN_DATA_DIR` is set.
    pub fn require_data_dir(&self) -> anyhow::Result<&PathBuf> {
        self.data_dir
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Data directory is required. Set GUARDIAN_DATA_DIR or use --data-dir"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_config_from_flags() {
        let cli = Cli::parse_from([
            "guardian",
            "validate-replay",
            "--data-dir",
            "/var/lib/guardian",
            "--format",
            "json",
            "--strict",
        ]);

        let config = cli.config();
        assert_eq!(
            config.data_dir.as_deref(),
            Some(std::path::Path::new("/var/lib/guardian"))
        );
        assert!(matches!(config.format, OutputFormat::Json));
        assert!(matches!(
            cli.command,
            Commands::ValidateReplay(ref args) if args.strict
        ));
    }

    #[test]
    fn test_missing_data_dir_is_a_usage_error() {
        let config = Config::default();
        let err = config.require_data_dir().unwrap_err();
        assert!(err.to_string().contains("GUARDIAN_DATA_DIR"));
    }

    #[test]
    fn test_migrate_defaults_to_dry_run() {
        let cli = Cli::parse_from(["guardian", "migrate", "--data-dir", "/tmp/g"]);
        let Commands::Migrate(args) = cli.command else {
            panic!("expected migrate");
        };
        assert!(!args.apply);
        assert!(!args.no_backup);
        assert!(args.dest.is_none());
    }
}
