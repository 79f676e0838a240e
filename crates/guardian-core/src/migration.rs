//! Offline schema migration and shape checks for raw log lines.
//!
//! Legacy (version 1) records carried string ids like `evt_1a2b`, optional
//! `schema_version`, naive local timestamps, and type-specific fields at the
//! top level. Migration rewrites them into the current envelope. It never
//! runs implicitly: the live store refuses old records until an operator
//! migrates the file.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::event::{CURRENT_SCHEMA_VERSION, declared_schema_version};

/// Envelope fields that stay at the top level of a record.
const ENVELOPE_FIELDS: [&str; 7] = [
    "event_id",
    "schema_version",
    "type",
    "timestamp",
    "actor",
    "payload",
    "correlation_id",
];

/// Actor assigned to legacy records that did not name one.
pub const LEGACY_ACTOR: &str = "system";

/// Required fields for shape validation.
const LENIENT_FIELDS: [&str; 2] = ["type", "timestamp"];
const STRICT_FIELDS: [&str; 4] = ["type", "timestamp", "schema_version", "event_id"];

/// Returns the required fields missing from a raw record.
///
/// Lenient mode only requires `type` and `timestamp`; strict mode also
/// requires `schema_version` and `event_id`.
#[must_use]
pub fn missing_fields(raw: &Value, strict: bool) -> Vec<&'static str> {
    let required: &[&'static str] = if strict { &STRICT_FIELDS } else { &LENIENT_FIELDS };
    required
        .iter()
        .copied()
        .filter(|field| match raw.get(*field) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        })
        .collect()
}

/// Counters describing a migration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Non-blank lines read.
    pub total: u64,
    /// Records whose normalized form differs from the input.
    pub changed: u64,
    /// Lines that are not JSON objects.
    pub parse_errors: u64,
    /// Records without a usable `type`, or with an unreadable timestamp.
    pub shape_errors: u64,
    /// Declared schema versions before migration.
    pub schema_before: BTreeMap<String, u64>,
    /// Schema versions after migration.
    pub schema_after: BTreeMap<String, u64>,
}

impl MigrationReport {
    /// Returns true when the output may be written.
    #[must_use]
    pub const fn can_apply(&self) -> bool {
        self.parse_errors == 0 && self.shape_errors == 0
    }
}

/// Result of normalizing a whole log.
#[derive(Debug, Clone, Default)]
pub struct Migration {
    /// Normalized records, in input order.
    pub records: Vec<Value>,
    /// Counters.
    pub report: MigrationReport,
    /// Human-readable problems keyed by 1-based line number.
    pub issues: Vec<(usize, String)>,
}

/// Normalizes every record of a raw log.
///
/// Records are renumbered `1..=n` in file order. `now` fills in missing
/// timestamps.
#[must_use]
pub fn migrate_log(contents: &str, now: DateTime<Utc>) -> Migration {
    let mut migration = Migration::default();
    let mut next_id: u64 = 1;

    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line_no = idx + 1;
        migration.report.total += 1;

        let raw: Value = match serde_json::from_str(line) {
            Ok(v @ Value::Object(_)) => v,
            Ok(_) => {
                migration.report.parse_errors += 1;
                migration.issues.push((line_no, "record is not a JSON object".into()));
                continue;
            }
            Err(e) => {
                migration.report.parse_errors += 1;
                migration.issues.push((line_no, format!("invalid json ({e})")));
                continue;
            }
        };

        *migration
            .report
            .schema_before
            .entry(schema_label(&raw))
            .or_default() += 1;

        match normalize_record(&raw, next_id, now) {
            Ok(normalized) => {
                if normalized != raw {
                    migration.report.changed += 1;
                }
                *migration
                    .report
                    .schema_after
                    .entry(schema_label(&normalized))
                    .or_default() += 1;
                migration.records.push(normalized);
                next_id += 1;
            }
            Err(reason) => {
                migration.report.shape_errors += 1;
                migration.issues.push((line_no, reason));
            }
        }
    }

    migration
}

/// Label used when counting schema versions.
#[must_use]
pub fn schema_label(raw: &Value) -> String {
    match raw.get("schema_version") {
        None | Some(Value::Null) => "legacy_or_missing".to_string(),
        Some(_) => declared_schema_version(raw).to_string(),
    }
}

/// Rewrites one record into the current envelope.
///
/// # Errors
///
/// Returns a reason string when the record has no `type` or carries a
/// timestamp that cannot be read.
pub fn normalize_record(raw: &Value, event_id: u64, now: DateTime<Utc>) -> Result<Value, String> {
    let Some(object) = raw.as_object() else {
        return Err("record is not a JSON object".into());
    };
    let event_type = match object.get("type") {
        Some(Value::String(t)) if !t.trim().is_empty() => t.clone(),
        _ => return Err("missing required field: type".into()),
    };
    let timestamp = match object.get("timestamp") {
        None | Some(Value::Null) => now,
        Some(Value::String(s)) => parse_timestamp(s).ok_or_else(|| format!("unreadable timestamp {s:?}"))?,
        Some(other) => return Err(format!("unreadable timestamp {other}")),
    };

    let mut payload = match object.get("payload") {
        Some(Value::Object(p)) => p.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(other) => {
            let mut wrapped = Map::new();
            wrapped.insert("value".into(), other.clone());
            wrapped
        }
    };
    for (key, value) in object {
        if !ENVELOPE_FIELDS.contains(&key.as_str()) && !payload.contains_key(key) {
            payload.insert(key.clone(), value.clone());
        }
    }
    if let Some(Value::String(legacy_id)) = object.get("event_id") {
        payload
            .entry("legacy_event_id")
            .or_insert_with(|| Value::String(legacy_id.clone()));
    }

    let actor = match object.get("actor") {
        Some(Value::String(a)) if !a.trim().is_empty() => a.clone(),
        _ => LEGACY_ACTOR.to_string(),
    };

    let mut out = Map::new();
    out.insert("event_id".into(), Value::from(event_id));
    out.insert("schema_version".into(), Value::from(CURRENT_SCHEMA_VERSION));
    out.insert("type".into(), Value::String(event_type));
    out.insert(
        "timestamp".into(),
        serde_json::to_value(timestamp).unwrap_or(Value::Null),
    );
    out.insert("actor".into(), Value::String(actor));
    out.insert("payload".into(), Value::Object(payload));
    if let Some(Value::String(c)) = object.get("correlation_id") {
        out.insert("correlation_id".into(), Value::String(c.clone()));
    }
    Ok(Value::Object(out))
}

/// Reads RFC 3339 timestamps, or naive ones which are taken as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T00:00:00Z")
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default()
    }

    #[test]
    fn legacy_record_becomes_current_envelope() {
        let raw = json!({
            "type": "task_updated",
            "timestamp": "2026-02-11T10:00:00",
            "event_id": "evt_abc123",
            "task_id": "t1",
            "updates": {"status": "skipped"}
        });
        let normalized = normalize_record(&raw, 4, now()).unwrap_or_default();
        assert_eq!(normalized["event_id"], json!(4));
        assert_eq!(normalized["schema_version"], json!(CURRENT_SCHEMA_VERSION));
        assert_eq!(normalized["actor"], json!(LEGACY_ACTOR));
        assert_eq!(normalized["payload"]["updates"]["status"], json!("skipped"));
        assert_eq!(normalized["payload"]["legacy_event_id"], json!("evt_abc123"));

        let line = serde_json::to_string(&normalized).unwrap_or_default();
        let event = Event::from_json_line(&line);
        assert!(event.is_ok(), "normalized record must load: {event:?}");
    }

    #[test]
    fn migrate_log_counts_and_renumbers() {
        let log = [
            r#"{"type":"signal.skip","timestamp":"2026-02-11T10:00:00Z"}"#,
            "not json",
            r#"{"timestamp":"2026-02-11T10:00:00Z"}"#,
            "",
            r#"{"type":"signal.skip","schema_version":"1.0"}"#,
        ]
        .join("\n");

        let migration = migrate_log(&log, now());
        assert_eq!(migration.report.total, 4);
        assert_eq!(migration.report.parse_errors, 1);
        assert_eq!(migration.report.shape_errors, 1);
        assert_eq!(migration.report.changed, 2);
        assert!(!migration.report.can_apply());

        let ids: Vec<Value> = migration.records.iter().map(|r| r["event_id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2)]);
        assert_eq!(migration.report.schema_before.get("legacy_or_missing"), Some(&2));
        assert_eq!(migration.report.schema_before.get("1"), Some(&1));
        assert_eq!(migration.report.schema_after.get("2"), Some(&2));
        assert_eq!(migration.records[1]["timestamp"], json!("2026-03-01T00:00:00Z"));
    }

    #[test]
    fn current_records_are_unchanged() {
        let line = r#"{"event_id":1,"schema_version":2,"type":"signal.skip","timestamp":"2026-02-11T10:00:00Z","actor":"user","payload":{"n":1}}"#;
        let migration = migrate_log(line, now());
        assert_eq!(migration.report.changed, 0);
        assert!(migration.report.can_apply());
    }

    #[test]
    fn missing_fields_honours_strictness() {
        let raw = json!({"type": "x", "timestamp": "2026-01-01T00:00:00Z"});
        assert!(missing_fields(&raw, false).is_empty());
        assert_eq!(missing_fields(&raw, true), vec!["schema_version", "event_id"]);
        assert_eq!(missing_fields(&json!({"type": ""}), false), vec!["type", "timestamp"]);
    }
}
