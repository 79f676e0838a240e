//! Candidate generation capability.
//!
//! The engine asks a [`CandidateGenerator`] for a raw delta and a
//! confidence; bounding, cooldown and emission stay in the engine. An
//! LLM-backed generator plugs in here without touching governance logic.

use serde::{Deserialize, Serialize};

use crate::thresholds::ThresholdValue;

/// Aggregated evidence for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSummary {
    /// Threshold key.
    pub target_param: String,
    /// Current value.
    pub current_value: ThresholdValue,
    /// Signal events in the lookback window.
    pub count: u64,
    /// Aggregated magnitude in the window.
    pub magnitude: f64,
    /// Magnitude at which the target triggers.
    pub trigger_level: f64,
}

impl SignalSummary {
    /// Magnitude relative to the trigger level.
    #[must_use]
    pub fn pressure(&self) -> f64 {
        if self.trigger_level > 0.0 {
            self.magnitude / self.trigger_level
        } else {
            self.magnitude
        }
    }
}

/// A proposed change before guardrails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Signed change to apply.
    pub delta: f64,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Human-readable explanation.
    pub rationale: String,
}

/// Produces candidate changes from signal evidence.
pub trait CandidateGenerator: Send + Sync {
    /// Name recorded on emitted proposals.
    fn name(&self) -> &str;

    /// Returns a candidate, or `None` when no change is warranted.
    fn generate(&self, summary: &SignalSummary) -> Option<Candidate>;
}

/// Deterministic rule-based generator.
///
/// Integer targets (counts, day spans) move up by whole steps as pressure
/// grows, making the detector less eager. Float targets (protection
/// cutoffs) move down, relaxing protection the user keeps overriding.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicGenerator;

/// Float step per unit of pressure.
const FLOAT_STEP_PER_PRESSURE: f64 = 0.05;

impl CandidateGenerator for HeuristicGenerator {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn generate(&self, summary: &SignalSummary) -> Option<Candidate> {
        let pressure = summary.pressure();
        if !pressure.is_finite() || pressure < 1.0 {
            return None;
        }
        let delta = if summary.current_value.is_int() {
            pressure.floor()
        } else {
            -FLOAT_STEP_PER_PRESSURE * pressure
        };
        let confidence = 0.15f64.mul_add(pressure, 0.4).min(0.95);
        Some(Candidate {
            delta,
            confidence,
            rationale: format!(
                "{} signals (magnitude {:.2}) against trigger {:.2} for {}",
                summary.count, summary.magnitude, summary.trigger_level, summary.target_param
            ),
        })
    }
}

/// Generator returning a fixed candidate, for tests and dry runs.
#[derive(Debug, Clone)]
pub struct FixedCandidateGenerator {
    candidate: Option<Candidate>,
}

impl FixedCandidateGenerator {
    /// Always proposes `delta` with `confidence`.
    #[must_use]
    pub fn new(delta: f64, confidence: f64) -> Self {
        Self {
            candidate: Some(Candidate {
                delta,
                confidence,
                rationale: "fixed candidate".into(),
            }),
        }
    }

    /// Never proposes anything.
    #[must_use]
    pub const fn silent() -> Self {
        Self { candidate: None }
    }
}

impl CandidateGenerator for FixedCandidateGenerator {
    fn name(&self) -> &str {
        "fixed"
    }

    fn generate(&self, _summary: &SignalSummary) -> Option<Candidate> {
        self.candidate.clone()
    }
}
