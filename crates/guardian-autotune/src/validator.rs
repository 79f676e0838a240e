//! Replay verification.
//!
//! Compares the live projection against a fresh replay of the log up to
//! the same version. Divergence is reported with a field-level diff and
//! logged; nothing is repaired.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use guardian_core::ReplayCursor;

use crate::error::Result;
use crate::ledger::Ledger;
use crate::metrics::GuardianMetrics;
use crate::projector::Snapshot;

/// Cap on reported field differences.
pub const MAX_DIFFS: usize = 100;

/// One differing field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDiff {
    /// JSON-pointer-like path (`proposals.atp_x.status`).
    pub path: String,
    /// Value in the live state.
    pub live: Option<Value>,
    /// Value in the replayed state.
    pub replay: Option<Value>,
}

/// Outcome of a consistency check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConsistencyReport {
    /// Live state equals replay.
    Ok {
        /// Compared version.
        version: u64,
        /// Shared checksum.
        checksum: String,
    },
    /// Live state differs from replay.
    Divergence {
        /// Compared version.
        version: u64,
        /// Live checksum.
        live_checksum: String,
        /// Replay checksum.
        replay_checksum: String,
        /// Differing fields, at most [`MAX_DIFFS`].
        diffs: Vec<FieldDiff>,
        /// Whether `diffs` was cut short.
        truncated: bool,
    },
}

impl ConsistencyReport {
    /// Returns true when no divergence was found.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// Checks live projections against full replays.
#[derive(Debug, Clone)]
pub struct ConsistencyValidator {
    ledger: Arc<Ledger>,
    metrics: GuardianMetrics,
}

impl ConsistencyValidator {
    /// Creates a validator over a ledger.
    #[must_use]
    pub const fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            metrics: GuardianMetrics::new(),
        }
    }

    /// Replays the log up to the live version and compares checksums.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or folded.
    pub async fn validate(&self) -> Result<ConsistencyReport> {
        let live = self.ledger.live_snapshot().await;
        let report = check(&live, &self.ledger).await?;
        if let ConsistencyReport::Divergence { diffs, .. } = &report {
            self.metrics.record_divergence();
            tracing::error!(
                version = live.version,
                diff_count = diffs.len(),
                "live state diverges from replay"
            );
        }
        Ok(report)
    }
}

/// Compares an arbitrary snapshot with a replay of the ledger's log.
///
/// # Errors
///
/// Returns an error if the log cannot be read or folded.
pub async fn check(live: &Snapshot, ledger: &Ledger) -> Result<ConsistencyReport> {
    let events = ReplayCursor::new(Arc::clone(ledger.repository()), 1)
        .with_upper_bound(live.version)
        .collect_all()
        .await?;
    let replay = ledger.projector().project(&events)?;
    compare(live, &replay)
}

/// Diffs two snapshots.
///
/// # Errors
///
/// Returns a serialization error if either state cannot be encoded.
pub fn compare(live: &Snapshot, replay: &Snapshot) -> Result<ConsistencyReport> {
    if live.checksum == replay.checksum {
        return Ok(ConsistencyReport::Ok {
            version: live.version,
            checksum: live.checksum.clone(),
        });
    }
    let live_value = serde_json::to_value(&live.state).map_err(guardian_core::Error::serialization)?;
    let replay_value =
        serde_json::to_value(&replay.state).map_err(guardian_core::Error::serialization)?;
    let mut diffs = Vec::new();
    let mut truncated = false;
    diff_values("", Some(&live_value), Some(&replay_value), &mut diffs, &mut truncated);
    Ok(ConsistencyReport::Divergence {
        version: live.version,
        live_checksum: live.checksum.clone(),
        replay_checksum: replay.checksum.clone(),
        diffs,
        truncated,
    })
}

fn diff_values(
    path: &str,
    live: Option<&Value>,
    replay: Option<&Value>,
    out: &mut Vec<FieldDiff>,
    truncated: &mut bool,
) {
    if live == replay {
        return;
    }
    if out.len() >= MAX_DIFFS {
        *truncated = true;
        return;
    }
    match (live, replay) {
        (Some(Value::Object(a)), Some(Value::Object(b))) => {
            let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
            keys.sort_unstable();
            keys.dedup();
            for key in keys {
                diff_values(&join(path, key), a.get(key), b.get(key), out, truncated);
            }
        }
        (Some(Value::Array(a)), Some(Value::Array(b))) => {
            for i in 0..a.len().max(b.len()) {
                diff_values(&join(path, &i.to_string()), a.get(i), b.get(i), out, truncated);
            }
        }
        _ => out.push(FieldDiff {
            path: if path.is_empty() { ".".into() } else { path.to_string() },
            live: live.cloned(),
            replay: replay.cloned(),
        }),
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projector::StateProjector;
    use crate::thresholds::{REPEATED_SKIP, ThresholdValue};
    use guardian_core::event::types;
    use guardian_core::{EventRepository, MemoryRepository, NewEvent};
    use serde_json::json;

    async fn ledger_with_skips(n: usize) -> Result<Arc<Ledger>> {
        let repo: Arc<dyn EventRepository> = Arc::new(MemoryRepository::new());
        let ledger = Arc::new(Ledger::new(repo, StateProjector::default(), 0)?);
        for _ in 0..n {
            ledger
                .record(NewEvent::new(types::SIGNAL_SKIP, "user", json!({}), chrono::Utc::now()))
                .await?;
        }
        Ok(ledger)
    }

    #[tokio::test]
    async fn live_state_matches_replay() -> Result<()> {
        let ledger = ledger_with_skips(3).await?;
        let report = ConsistencyValidator::new(Arc::clone(&ledger)).validate().await?;
        assert!(report.is_ok(), "{report:?}");
        Ok(())
    }

    #[tokio::test]
    async fn tampered_snapshot_reports_field_diff() -> Result<()> {
        let ledger = ledger_with_skips(2).await?;
        let mut live = ledger.snapshot().await?;
        live.state.thresholds.set(REPEATED_SKIP, ThresholdValue::Int(9));
        live.checksum = guardian_core::canonical::checksum(&live.state)?;

        let report = check(&live, &ledger).await?;
        let ConsistencyReport::Divergence { diffs, truncated, .. } = report else {
            panic!("expected divergence");
        };
        assert!(!truncated);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "thresholds.deviation_signals.repeated_skip");
        assert_eq!(diffs[0].live, Some(json!(9)));
        assert_eq!(diffs[0].replay, Some(json!(2)));
        Ok(())
    }
}
