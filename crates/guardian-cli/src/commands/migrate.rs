//! Migrate command - upgrade legacy records to the current schema.
//!
//! Dry-run by default. With `--apply` the normalized log is written to
//! `--dest`, or in place after taking a timestamped backup. An in-place
//! rewrite renumbers events, so the persisted snapshot is removed and the
//! next open replays from scratch.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;

use guardian_core::migration::{Migration, MigrationReport, migrate_log};
use guardian_core::repository::{EVENT_LOG_FILE, SNAPSHOT_FILE};

use crate::{Config, OutputFormat};

/// Arguments for the migrate command.
#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Write the migrated log here instead of replacing the original.
    #[arg(long)]
    pub dest: Option<PathBuf>,

    /// Write output. Without this flag nothing on disk changes.
    #[arg(long)]
    pub apply: bool,

    /// Skip the backup when migrating in place.
    #[arg(long)]
    pub no_backup: bool,
}

/// Files touched by an applied migration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationOutput {
    /// Where the migrated log was written.
    pub written: Option<PathBuf>,
    /// Backup of the original log, when one was taken.
    pub backup: Option<PathBuf>,
    /// Whether a stale snapshot was removed.
    pub snapshot_removed: bool,
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    dry_run: bool,
    report: &'a MigrationReport,
    output: &'a MigrationOutput,
}

/// Backup file name for a migration started at `now`.
#[must_use]
pub fn backup_file_name(now: DateTime<Utc>) -> String {
    format!("events.backup_{}.jsonl", now.format("%Y%m%d_%H%M%S"))
}

/// Renders migrated records as JSONL.
///
/// # Errors
///
/// Returns an error if a record cannot be encoded.
pub fn render(migration: &Migration) -> Result<String> {
    let mut out = String::new();
    for record in &migration.records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}

/// Writes a migration to disk.
///
/// # Errors
///
/// Returns an error if any file operation fails.
pub async fn write_migration(
    data_dir: &Path,
    migration: &Migration,
    dest: Option<&Path>,
    backup: bool,
    now: DateTime<Utc>,
) -> Result<MigrationOutput> {
    let source = data_dir.join(EVENT_LOG_FILE);
    let target = dest.map_or_else(|| source.clone(), Path::to_path_buf);
    let in_place = target == source;
    let mut output = MigrationOutput::default();

    if in_place && backup && tokio::fs::try_exists(&source).await? {
        let backup_path = data_dir.join(backup_file_name(now));
        tokio::fs::copy(&source, &backup_path)
            .await
            .with_context(|| format!("failed to back up to {}", backup_path.display()))?;
        output.backup = Some(backup_path);
    }

    // Write beside the target first so a crash never leaves a half-written log.
    let staging = target.with_extension("jsonl.tmp");
    tokio::fs::write(&staging, render(migration)?)
        .await
        .with_context(|| format!("failed to write {}", staging.display()))?;
    tokio::fs::rename(&staging, &target)
        .await
        .with_context(|| format!("failed to replace {}", target.display()))?;
    output.written = Some(target);

    if in_place {
        let snapshot = data_dir.join(SNAPSHOT_FILE);
        match tokio::fs::remove_file(&snapshot).await {
            Ok(()) => output.snapshot_removed = true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("failed to remove {}", snapshot.display()));
            }
        }
    }

    tracing::info!(
        written = ?output.written,
        backup = ?output.backup,
        snapshot_removed = output.snapshot_removed,
        "migration written"
    );
    Ok(output)
}

/// Execute the migrate command.
///
/// # Errors
///
/// Returns an error if the log cannot be read, contains unreadable records,
/// or the output cannot be written.
pub async fn execute(args: MigrateArgs, config: &Config) -> Result<()> {
    let data_dir = config.require_data_dir()?;
    let now = Utc::now();
    let contents = super::read_log(data_dir).await?;
    let migration = migrate_log(&contents, now);
    let report = &migration.report;

    if !report.can_apply() {
        for (line, issue) in &migration.issues {
            eprintln!("line {line}: {issue}");
        }
        anyhow::bail!(
            "migration aborted: {} parse errors, {} shape errors",
            report.parse_errors,
            report.shape_errors
        );
    }

    let output = if args.apply {
        write_migration(data_dir, &migration, args.dest.as_deref(), !args.no_backup, now).await?
    } else {
        MigrationOutput::default()
    };

    match config.format {
        OutputFormat::Json => {
            let summary = JsonSummary {
                dry_run: !args.apply,
                report,
                output: &output,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Text => {
            println!(
                "Migration {}",
                if args.apply { "applied" } else { "dry run" }
            );
            println!();
            println!("  Total:    {}", report.total);
            println!("  Changed:  {}", report.changed);
            println!("  Schema before: {:?}", report.schema_before);
            println!("  Schema after:  {:?}", report.schema_after);
            if let Some(path) = &output.written {
                println!("  Written:  {}", path.display());
            }
            if let Some(path) = &output.backup {
                println!("  Backup:   {}", path.display());
            }
            if output.snapshot_removed {
                println!("  Snapshot removed; next open replays the full log");
            }
            if !args.apply && report.changed > 0 {
                println!();
                println!("Re-run with --apply to write changes");
            }
        }
    }

    Ok(())
}
