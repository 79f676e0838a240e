//! Deviation signals and their per-target aggregation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use guardian_core::Event;
use guardian_core::event::types;

use crate::thresholds::{L2_INTERRUPTION, L2_PROTECTION_HIGH, REPEATED_SKIP, STAGNATION_DAYS};

/// Kind of deviation signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// A task was skipped.
    Skip,
    /// A protected block was interrupted.
    Interruption,
    /// A goal stalled for some days.
    Stagnation,
    /// The user overrode protection.
    L2Override,
}

impl SignalKind {
    /// Threshold a signal of this kind tunes unless the event names one.
    #[must_use]
    pub const fn default_target(self) -> &'static str {
        match self {
            Self::Skip => REPEATED_SKIP,
            Self::Interruption => L2_INTERRUPTION,
            Self::Stagnation => STAGNATION_DAYS,
            Self::L2Override => L2_PROTECTION_HIGH,
        }
    }
}

/// A signal extracted from one event.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalObservation {
    /// Kind.
    pub kind: SignalKind,
    /// Threshold key the signal counts against.
    pub target_param: String,
    /// Weight (1 per event, or stalled days).
    pub magnitude: f64,
    /// Event time.
    pub timestamp: DateTime<Utc>,
}

/// Extracts a deviation signal from an event, if it carries one.
#[must_use]
pub fn classify(event: &Event) -> Option<SignalObservation> {
    let kind = match event.event_type.as_str() {
        types::SIGNAL_SKIP => SignalKind::Skip,
        types::SIGNAL_INTERRUPTION => SignalKind::Interruption,
        types::SIGNAL_STAGNATION => SignalKind::Stagnation,
        types::SIGNAL_L2_OVERRIDE => SignalKind::L2Override,
        types::LEGACY_TASK_UPDATED if legacy_skip(&event.payload) => SignalKind::Skip,
        _ => return None,
    };
    let magnitude = match kind {
        SignalKind::Stagnation => event
            .payload
            .get("days")
            .and_then(Value::as_f64)
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(1.0),
        _ => 1.0,
    };
    let target_param = event
        .payload_str("target_param")
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| kind.default_target())
        .to_string();
    Some(SignalObservation {
        kind,
        target_param,
        magnitude,
        timestamp: event.timestamp,
    })
}

fn legacy_skip(payload: &Value) -> bool {
    payload
        .get("updates")
        .and_then(|u| u.get("status"))
        .and_then(Value::as_str)
        == Some("skipped")
}

/// Running totals for one target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalTally {
    /// Signal events seen.
    pub count: u64,
    /// Summed weight; stagnation keeps the longest span instead.
    pub magnitude: f64,
    /// Most recent signal time.
    pub last_seen: Option<DateTime<Utc>>,
}

impl SignalTally {
    /// Adds one observation.
    pub fn record(&mut self, observation: &SignalObservation) {
        self.count += 1;
        if observation.kind == SignalKind::Stagnation {
            self.magnitude = self.magnitude.max(observation.magnitude);
        } else {
            self.magnitude += observation.magnitude;
        }
        self.last_seen = Some(match self.last_seen {
            Some(seen) if seen > observation.timestamp => seen,
            _ => observation.timestamp,
        });
    }
}

/// Tallies signals per target for events at or after `since`.
#[must_use]
pub fn aggregate<'a, I>(events: I, since: DateTime<Utc>) -> BTreeMap<String, SignalTally>
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut tallies: BTreeMap<String, SignalTally> = BTreeMap::new();
    for observation in events
        .into_iter()
        .filter(|e| e.timestamp >= since)
        .filter_map(classify)
    {
        tallies
            .entry(observation.target_param.clone())
            .or_default()
            .record(&observation);
    }
    tallies
}
