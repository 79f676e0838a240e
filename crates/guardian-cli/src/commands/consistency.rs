//! Consistency command - compare the persisted snapshot with a full replay.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use guardian_autotune::{AutotuneMode, Baseline, ConsistencyReport, Governance, GovernanceOptions};
use guardian_core::{EventRepository, FileRepository};

use crate::{Config, OutputFormat};

/// Arguments for the consistency command.
///
/// The baseline must match the one the server runs with, or every
/// replayed field the baseline seeds will show as a divergence.
#[derive(Debug, Args)]
pub struct ConsistencyArgs {
    /// Baseline master switch.
    #[arg(long, env = "GUARDIAN_AUTOTUNE_ENABLED")]
    pub autotune_enabled: Option<bool>,

    /// Baseline mode (`shadow` or `assist`).
    #[arg(long, env = "GUARDIAN_AUTOTUNE_MODE")]
    pub autotune_mode: Option<String>,
}

impl ConsistencyArgs {
    fn baseline(&self) -> Result<Baseline> {
        let mut baseline = Baseline::default();
        if let Some(enabled) = self.autotune_enabled {
            baseline.config.enabled = enabled;
        }
        if let Some(mode) = self.autotune_mode.as_deref() {
            baseline.config.mode = AutotuneMode::parse(mode)?;
        }
        Ok(baseline)
    }
}

/// Opens the log read-only and runs the consistency check.
///
/// # Errors
///
/// Returns an error if the log cannot be opened or replayed.
pub async fn check(data_dir: &std::path::Path, baseline: Baseline) -> Result<ConsistencyReport> {
    let repo: Arc<dyn EventRepository> = Arc::new(FileRepository::open(data_dir).await?);
    let options = GovernanceOptions {
        baseline,
        // Never write a snapshot from an offline check.
        snapshot_interval: 0,
        ..GovernanceOptions::default()
    };
    let governance = Governance::open(repo, options).await?;
    Ok(governance.validator().validate().await?)
}

/// Execute the consistency command.
///
/// # Errors
///
/// Returns an error if the check cannot run or live state diverges.
pub async fn execute(args: &ConsistencyArgs, config: &Config) -> Result<()> {
    let data_dir = config.require_data_dir()?;
    let report = check(data_dir, args.baseline()?).await?;

    match config.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => match &report {
            ConsistencyReport::Ok { version, checksum } => {
                println!("Consistent at version {version}");
                println!("  Checksum: {checksum}");
            }
            ConsistencyReport::Divergence {
                version,
                live_checksum,
                replay_checksum,
                diffs,
                truncated,
            } => {
                println!("DIVERGENCE at version {version}");
                println!("  Live checksum:   {live_checksum}");
                println!("  Replay checksum: {replay_checksum}");
                println!();
                for diff in diffs {
                    println!(
                        "  {}: live={} replay={}",
                        diff.path,
                        diff.live.as_ref().map_or_else(|| "-".to_string(), ToString::to_string),
                        diff.replay.as_ref().map_or_else(|| "-".to_string(), ToString::to_string),
                    );
                }
                if *truncated {
                    println!("  ... more differences not shown");
                }
            }
        },
    }

    if !report.is_ok() {
        anyhow::bail!("live state diverges from replay");
    }
    Ok(())
}
