//! Validate-replay command - check a log decodes and folds cleanly.
//!
//! Every non-blank line is parsed, shape-checked, decoded into an event and
//! folded into a scratch projection. Problems are counted per stage:
//!
//! - `parse_errors`: not a JSON object
//! - `shape_errors`: required envelope fields missing
//! - `apply_errors`: undecodable records, id gaps, and projection anomalies
//!
//! Lenient mode reads legacy records through the migration normalizer so a
//! log can be checked before it is migrated. Strict mode treats them as
//! apply errors, matching what the live store accepts.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use serde::Serialize;
use serde_json::Value;

use guardian_autotune::StateProjector;
use guardian_autotune::projector::fold_event;
use guardian_core::event::declared_schema_version;
use guardian_core::migration::{missing_fields, normalize_record, schema_label};
use guardian_core::{Event, MIN_SUPPORTED_SCHEMA_VERSION};

use crate::{Config, OutputFormat};

/// Issues printed in text mode before the rest are summarized.
const MAX_PRINTED_ISSUES: usize = 20;

/// Arguments for the validate-replay command.
#[derive(Debug, Args)]
pub struct ValidateReplayArgs {
    /// Require `schema_version` and `event_id` on every record.
    #[arg(long)]
    pub strict: bool,
}

/// Stage at which a record failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Not a JSON object.
    Parse,
    /// Missing envelope fields.
    Shape,
    /// Could not be decoded or folded.
    Apply,
}

/// One problem, keyed by 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    /// Line in the log file.
    pub line: usize,
    /// Failing stage.
    pub kind: IssueKind,
    /// What went wrong.
    pub message: String,
}

/// Counters for a validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Non-blank lines read.
    pub total: u64,
    /// Lines that are not JSON objects.
    pub parse_errors: u64,
    /// Records missing required fields.
    pub shape_errors: u64,
    /// Records that could not be decoded or folded.
    pub apply_errors: u64,
    /// Declared schema versions.
    pub schema_versions: BTreeMap<String, u64>,
    /// Event type counts.
    pub event_types: BTreeMap<String, u64>,
    /// Individual problems, in file order.
    pub issues: Vec<Issue>,
}

impl ReplayReport {
    /// Returns true when no stage reported an error.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.parse_errors == 0 && self.shape_errors == 0 && self.apply_errors == 0
    }

    fn push(&mut self, line: usize, kind: IssueKind, message: impl Into<String>) {
        match kind {
            IssueKind::Parse => self.parse_errors += 1,
            IssueKind::Shape => self.shape_errors += 1,
            IssueKind::Apply => self.apply_errors += 1,
        }
        self.issues.push(Issue {
            line,
            kind,
            message: message.into(),
        });
    }
}

/// Validates a raw log.
#[must_use]
pub fn validate_log(contents: &str, strict: bool) -> ReplayReport {
    let mut report = ReplayReport::default();
    let mut state = StateProjector::default().initial_state();
    let now = Utc::now();

    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line_no = idx + 1;
        report.total += 1;

        let raw: Value = match serde_json::from_str(line) {
            Ok(v @ Value::Object(_)) => v,
            Ok(_) => {
                report.push(line_no, IssueKind::Parse, "record is not a JSON object");
                continue;
            }
            Err(e) => {
                report.push(line_no, IssueKind::Parse, format!("invalid json ({e})"));
                continue;
            }
        };

        *report.schema_versions.entry(schema_label(&raw)).or_default() += 1;
        if let Some(event_type) = raw.get("type").and_then(Value::as_str) {
            *report.event_types.entry(event_type.to_string()).or_default() += 1;
        }

        let missing = missing_fields(&raw, strict);
        if !missing.is_empty() {
            report.push(
                line_no,
                IssueKind::Shape,
                format!("missing required fields: {}", missing.join(", ")),
            );
            continue;
        }

        let event = match decode(&raw, strict, state.last_event_id + 1, now) {
            Ok(event) => event,
            Err(message) => {
                report.push(line_no, IssueKind::Apply, message);
                continue;
            }
        };

        let expected = state.last_event_id + 1;
        if event.event_id != expected {
            report.push(
                line_no,
                IssueKind::Apply,
                format!("event id {} does not follow {}", event.event_id, state.last_event_id),
            );
            // Resync so one gap is reported once.
            state.last_event_id = event.event_id.saturating_sub(1);
        }

        let anomalies_before = state.anomalies.len();
        if let Err(e) = fold_event(&mut state, &event) {
            report.push(line_no, IssueKind::Apply, e.to_string());
            continue;
        }
        let new_anomalies: Vec<String> = state
            .anomalies
            .iter()
            .skip(anomalies_before)
            .map(|a| a.reason.clone())
            .collect();
        for reason in new_anomalies {
            report.push(line_no, IssueKind::Apply, reason);
        }
    }

    report
}

fn decode(raw: &Value, strict: bool, next_id: u64, now: chrono::DateTime<Utc>) -> Result<Event, String> {
    let legacy = declared_schema_version(raw) < MIN_SUPPORTED_SCHEMA_VERSION;
    if legacy && !strict {
        let normalized = normalize_record(raw, next_id, now)?;
        return serde_json::from_value(normalized).map_err(|e| format!("invalid record ({e})"));
    }
    let line = serde_json::to_string(raw).map_err(|e| e.to_string())?;
    Event::from_json_line(&line).map_err(|e| e.to_string())
}

/// Execute the validate-replay command.
///
/// # Errors
///
/// Returns an error if the log cannot be read or any record fails validation.
pub async fn execute(args: &ValidateReplayArgs, config: &Config) -> Result<()> {
    let data_dir = config.require_data_dir()?;
    let contents = super::read_log(data_dir).await?;
    let report = validate_log(&contents, args.strict);

    match config.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => print_text(&report, args.strict),
    }

    if !report.is_clean() {
        anyhow::bail!(
            "replay validation failed: {} parse, {} shape, {} apply errors",
            report.parse_errors,
            report.shape_errors,
            report.apply_errors
        );
    }
    Ok(())
}

fn print_text(report: &ReplayReport, strict: bool) {
    println!(
        "Replay validation ({})",
        if strict { "strict" } else { "lenient" }
    );
    println!();
    println!("  Total:          {}", report.total);
    println!("  Parse errors:   {}", report.parse_errors);
    println!("  Shape errors:   {}", report.shape_errors);
    println!("  Apply errors:   {}", report.apply_errors);

    if !report.schema_versions.is_empty() {
        println!();
        println!("Schema versions:");
        for (version, count) in &report.schema_versions {
            println!("  {version:<20} {count}");
        }
    }
    if !report.event_types.is_empty() {
        println!();
        println!("Event types:");
        for (event_type, count) in &report.event_types {
            println!("  {event_type:<28} {count}");
        }
    }
    if !report.issues.is_empty() {
        println!();
        println!("Issues:");
        for issue in report.issues.iter().take(MAX_PRINTED_ISSUES) {
            println!("  line {}: {}", issue.line, issue.message);
        }
        if report.issues.len() > MAX_PRINTED_ISSUES {
            println!("  ... {} more", report.issues.len() - MAX_PRINTED_ISSUES);
        }
    }
}
