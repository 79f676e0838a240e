//! The tunable threshold registry.
//!
//! Targets are flat dotted keys (`deviation_signals.repeated_skip`). Values
//! keep their numeric kind for life: an integer target never becomes a
//! float, which is what lets rollback restore the recorded value exactly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Skip-count threshold.
pub const REPEATED_SKIP: &str = "deviation_signals.repeated_skip";
/// Interruption-count threshold.
pub const L2_INTERRUPTION: &str = "deviation_signals.l2_interruption";
/// Days without progress before a goal counts as stagnant.
pub const STAGNATION_DAYS: &str = "deviation_signals.stagnation_days";
/// High-protection cutoff.
pub const L2_PROTECTION_HIGH: &str = "l2_protection.high";
/// Medium-protection cutoff.
pub const L2_PROTECTION_MEDIUM: &str = "l2_protection.medium";

/// Float values are stored rounded to this many decimals.
const FLOAT_DECIMALS: i32 = 6;

/// A threshold value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdValue {
    /// Counts and day spans.
    Int(i64),
    /// Ratios within `[0, 1]`.
    Float(f64),
}

impl ThresholdValue {
    /// Numeric value for arithmetic and reporting.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    /// Returns true for integer targets.
    #[must_use]
    pub const fn is_int(self) -> bool {
        matches!(self, Self::Int(_))
    }

    /// Returns the value moved by `delta`, kept within the target's domain.
    ///
    /// Integers round the delta toward zero and floor at 1. Floats are
    /// clamped to `[0, 1]` and rounded to six decimals.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn shifted(self, delta: f64) -> Self {
        match self {
            Self::Int(v) => Self::Int(v.saturating_add(delta.trunc() as i64).max(1)),
            Self::Float(v) => Self::Float(round_float((v + delta).clamp(0.0, 1.0))),
        }
    }

    /// Absolute distance to another value.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn distance(self, other: Self) -> f64 {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => (a - b).unsigned_abs() as f64,
            (a, b) => (a.as_f64() - b.as_f64()).abs(),
        }
    }

    /// Returns true when both sides have the same kind.
    #[must_use]
    pub const fn same_kind(self, other: Self) -> bool {
        matches!(
            (self, other),
            (Self::Int(_), Self::Int(_)) | (Self::Float(_), Self::Float(_))
        )
    }
}

impl std::fmt::Display for ThresholdValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

fn round_float(value: f64) -> f64 {
    let scale = 10f64.powi(FLOAT_DECIMALS);
    (value * scale).round() / scale
}

/// Current value of every tunable target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Thresholds(BTreeMap<String, ThresholdValue>);

impl Default for Thresholds {
    fn default() -> Self {
        Self(BTreeMap::from([
            (REPEATED_SKIP.to_string(), ThresholdValue::Int(2)),
            (L2_INTERRUPTION.to_string(), ThresholdValue::Int(1)),
            (STAGNATION_DAYS.to_string(), ThresholdValue::Int(3)),
            (L2_PROTECTION_HIGH.to_string(), ThresholdValue::Float(0.75)),
            (L2_PROTECTION_MEDIUM.to_string(), ThresholdValue::Float(0.50)),
        ]))
    }
}

impl Thresholds {
    /// Builds a registry from explicit entries.
    #[must_use]
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, ThresholdValue)>,
        K: Into<String>,
    {
        Self(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Value of a target.
    #[must_use]
    pub fn get(&self, target: &str) -> Option<ThresholdValue> {
        self.0.get(target).copied()
    }

    /// Returns true when the target is registered.
    #[must_use]
    pub fn contains(&self, target: &str) -> bool {
        self.0.contains_key(target)
    }

    /// Replaces a target's value.
    pub fn set(&mut self, target: impl Into<String>, value: ThresholdValue) {
        self.0.insert(target.into(), value);
    }

    /// Iterates targets in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, ThresholdValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_values_keep_kind() -> serde_json::Result<()> {
        let t = Thresholds::default();
        let json = serde_json::to_string(&t)?;
        let back: Thresholds = serde_json::from_str(&json)?;
        assert_eq!(back, t);
        assert_eq!(back.get(REPEATED_SKIP), Some(ThresholdValue::Int(2)));
        assert_eq!(back.get(L2_PROTECTION_HIGH), Some(ThresholdValue::Float(0.75)));
        Ok(())
    }

    #[test]
    fn shifted_respects_domain() {
        assert_eq!(ThresholdValue::Int(2).shifted(1.7), ThresholdValue::Int(3));
        assert_eq!(ThresholdValue::Int(1).shifted(-3.0), ThresholdValue::Int(1));
        assert_eq!(ThresholdValue::Float(0.98).shifted(0.05), ThresholdValue::Float(1.0));
        assert_eq!(
            ThresholdValue::Float(0.75).shifted(-0.050_000_000_1),
            ThresholdValue::Float(0.7)
        );
    }

    #[test]
    fn distance_between_values() {
        assert!((ThresholdValue::Int(2).distance(ThresholdValue::Int(4)) - 2.0).abs() < 1e-12);
        assert!(
            (ThresholdValue::Float(0.75).distance(ThresholdValue::Float(0.7)) - 0.05).abs() < 1e-9
        );
        assert!(!ThresholdValue::Int(1).same_kind(ThresholdValue::Float(1.0)));
    }
}
