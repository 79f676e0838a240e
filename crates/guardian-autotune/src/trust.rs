//! Trust index capability.

use chrono::{DateTime, Utc};

use crate::projector::DerivedState;

/// Supplies the current trust index.
pub trait TrustIndexSource: Send + Sync {
    /// Trust index in `[0, 1]`, or `None` when not measurable.
    fn trust_index(&self, state: &DerivedState, now: DateTime<Utc>) -> Option<f64>;
}

/// Reads the latest `trust.sampled` event folded into state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectedTrustIndex;

impl TrustIndexSource for ProjectedTrustIndex {
    fn trust_index(&self, state: &DerivedState, now: DateTime<Utc>) -> Option<f64> {
        state
            .trust
            .as_ref()
            .filter(|sample| sample.timestamp <= now)
            .map(|sample| sample.score)
    }
}

/// Returns a fixed value, for tests and environments without sampling.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedTrustIndex(pub Option<f64>);

impl TrustIndexSource for FixedTrustIndex {
    fn trust_index(&self, _state: &DerivedState, _now: DateTime<Utc>) -> Option<f64> {
        self.0
    }
}
