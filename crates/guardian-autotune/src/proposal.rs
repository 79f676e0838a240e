//! Proposal records and the lifecycle state machine.
//!
//! ```text
//! proposed ──► reviewed ──► applied ──► evaluated
//!    │            │            │            │
//!    │            ▼            ▼            ▼
//!    └────────► rejected   rolled_back ◄────┘
//!    └──────────────────────► applied
//! ```
//!
//! `rejected` and `rolled_back` are terminal. `evaluated` only leads to
//! `rolled_back`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AutotuneMode;
use crate::thresholds::ThresholdValue;

/// Proposal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Emitted by the engine.
    Proposed,
    /// Annotated by a reviewer.
    Reviewed,
    /// Live in configuration.
    Applied,
    /// Declined without a configuration change.
    Rejected,
    /// Outcome settled.
    Evaluated,
    /// Configuration reverted.
    RolledBack,
}

impl ProposalStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Proposed,
        Self::Reviewed,
        Self::Applied,
        Self::Rejected,
        Self::Evaluated,
        Self::RolledBack,
    ];

    /// Returns true if moving to `target` is legal.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Proposed, Self::Reviewed | Self::Applied | Self::Rejected)
                | (Self::Reviewed, Self::Applied | Self::Rejected)
                | (Self::Applied, Self::Evaluated | Self::RolledBack)
                | (Self::Evaluated, Self::RolledBack)
        )
    }

    /// Statuses reachable in one step.
    #[must_use]
    pub fn valid_transitions(self) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|t| self.can_transition_to(*t))
            .collect()
    }

    /// Returns true when no further transition exists.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::RolledBack)
    }

    /// Returns true while the proposal blocks new proposals for its target.
    #[must_use]
    pub const fn occupies_target(self) -> bool {
        matches!(self, Self::Proposed | Self::Reviewed | Self::Applied)
    }

    /// Stable label.
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Reviewed => "reviewed",
            Self::Applied => "applied",
            Self::Rejected => "rejected",
            Self::Evaluated => "evaluated",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// An operator action on a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    /// `proposed → reviewed`.
    Review,
    /// `proposed|reviewed → applied`.
    Apply,
    /// `proposed|reviewed → rejected`.
    Reject,
    /// `applied → evaluated`.
    Evaluate,
    /// `applied|evaluated → rolled_back`.
    Rollback,
}

impl LifecycleAction {
    /// Every action.
    pub const ALL: [Self; 5] = [
        Self::Review,
        Self::Apply,
        Self::Reject,
        Self::Evaluate,
        Self::Rollback,
    ];

    /// Status the action moves a proposal into.
    #[must_use]
    pub const fn target_status(self) -> ProposalStatus {
        match self {
            Self::Review => ProposalStatus::Reviewed,
            Self::Apply => ProposalStatus::Applied,
            Self::Reject => ProposalStatus::Rejected,
            Self::Evaluate => ProposalStatus::Evaluated,
            Self::Rollback => ProposalStatus::RolledBack,
        }
    }

    /// Stable label.
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::Review => "review",
            Self::Apply => "apply",
            Self::Reject => "reject",
            Self::Evaluate => "evaluate",
            Self::Rollback => "rollback",
        }
    }
}

impl std::fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Outcome of an applied change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Trust rose by at least the verdict margin.
    Improved,
    /// Within the margin, or not measurable.
    Neutral,
    /// Trust fell by at least the verdict margin.
    Regressed,
}

/// Trust delta at or beyond which a verdict is not neutral.
pub const VERDICT_MARGIN: f64 = 0.02;

impl Verdict {
    /// Classifies a trust delta. `None` means a side was not measured.
    #[must_use]
    pub fn from_delta(delta: Option<f64>) -> Self {
        match delta {
            Some(d) if d >= VERDICT_MARGIN => Self::Improved,
            Some(d) if d <= -VERDICT_MARGIN => Self::Regressed,
            _ => Self::Neutral,
        }
    }
}

/// One candidate change tracked end to end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    /// `atp_` id.
    pub proposal_id: String,
    /// Current optimistic-concurrency token.
    pub fingerprint: String,
    /// Threshold key being tuned.
    pub target_param: String,
    /// Value when proposed; replaced by the observed value at apply time.
    pub old_value: ThresholdValue,
    /// Value the proposal sets.
    pub new_value: ThresholdValue,
    /// Generator confidence in `[0, 1]`.
    pub confidence: f64,
    /// Lifecycle status.
    pub status: ProposalStatus,
    /// Mode the proposal was emitted under.
    pub mode: AutotuneMode,
    /// Signal events behind the proposal.
    pub signal_count: u64,
    /// Aggregated signal magnitude.
    pub signal_magnitude: f64,
    /// Generator explanation.
    pub rationale: String,
    /// Trust index when applied.
    pub trust_index_before: Option<f64>,
    /// Trust index when evaluated.
    pub trust_index_after_48h: Option<f64>,
    /// `trust_index_after_48h - trust_index_before`.
    pub trust_delta_48h: Option<f64>,
    /// Settled outcome.
    pub verdict: Option<Verdict>,
    /// Emission time.
    pub proposed_at: DateTime<Utc>,
    /// Review time.
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Apply time.
    pub applied_at: Option<DateTime<Utc>>,
    /// Rejection time.
    pub rejected_at: Option<DateTime<Utc>>,
    /// Evaluation time.
    pub evaluated_at: Option<DateTime<Utc>>,
    /// Rollback time.
    pub rolled_back_at: Option<DateTime<Utc>>,
    /// Set when a rollback followed an evaluation; the outcome is kept.
    pub rolled_back_after_evaluation: bool,
    /// Id of the last event that touched this proposal.
    pub last_event_id: u64,
}

/// One entry of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Source event id.
    pub event_id: u64,
    /// Proposal id.
    pub proposal_id: String,
    /// Status before the transition; `None` for emission.
    pub from_status: Option<ProposalStatus>,
    /// Status after the transition.
    pub to_status: ProposalStatus,
    /// Who acted.
    pub actor: String,
    /// Calling surface (`api`, `scheduler`, ...).
    pub source: Option<String>,
    /// Operator reason.
    pub reason: Option<String>,
    /// Operator note.
    pub note: Option<String>,
    /// When.
    pub timestamp: DateTime<Utc>,
}

/// Scheduler tick status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every due target was evaluated.
    Completed,
    /// Some targets failed.
    Partial,
    /// Every target failed.
    Failed,
    /// Nothing was due.
    Idle,
    /// Autotune or auto-evaluation is switched off.
    Disabled,
    /// Mode does not allow governance.
    Skipped,
}

impl RunStatus {
    /// Stable label.
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Idle => "idle",
            Self::Disabled => "disabled",
            Self::Skipped => "skipped",
        }
    }

    /// Returns true for runs that performed work and are persisted.
    #[must_use]
    pub const fn did_work(self) -> bool {
        matches!(self, Self::Completed | Self::Partial | Self::Failed)
    }
}

/// One evaluated target of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationTarget {
    /// Proposal id.
    pub proposal_id: String,
    /// Threshold key.
    pub target_param: String,
    /// Settled verdict.
    pub verdict: Verdict,
    /// Trust delta, when measurable.
    pub trust_delta: Option<f64>,
    /// Proposal status after the attempt.
    pub status: ProposalStatus,
}

/// One failed target of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationError {
    /// Proposal id.
    pub proposal_id: String,
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Summary of one scheduler tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRun {
    /// `evr_` id.
    pub run_id: String,
    /// Outcome.
    pub status: RunStatus,
    /// What started the tick (`cycle`, `manual`, ...).
    pub trigger: String,
    /// Tick time.
    pub started_at: DateTime<Utc>,
    /// Successful evaluations.
    pub evaluated_count: u32,
    /// Targets attempted.
    pub target_count: u32,
    /// Failed evaluations.
    pub error_count: u32,
    /// Successes.
    pub targets: Vec<EvaluationTarget>,
    /// Failures.
    pub errors: Vec<EvaluationError>,
    /// Why a non-working run did nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_graph_matches_lifecycle() {
        use ProposalStatus::{Applied, Evaluated, Proposed, Rejected, Reviewed, RolledBack};
        assert_eq!(Proposed.valid_transitions(), vec![Reviewed, Applied, Rejected]);
        assert_eq!(Reviewed.valid_transitions(), vec![Applied, Rejected]);
        assert_eq!(Applied.valid_transitions(), vec![Evaluated, RolledBack]);
        assert_eq!(Evaluated.valid_transitions(), vec![RolledBack]);
        assert!(Rejected.valid_transitions().is_empty());
        assert!(RolledBack.valid_transitions().is_empty());
    }

    #[test]
    fn terminal_and_occupying_statuses() {
        let terminal: Vec<_> = ProposalStatus::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(terminal, vec![ProposalStatus::Rejected, ProposalStatus::RolledBack]);
        assert!(ProposalStatus::Applied.occupies_target());
        assert!(!ProposalStatus::Evaluated.occupies_target());
    }

    #[test]
    fn status_labels_round_trip_through_serde() -> serde_json::Result<()> {
        for status in ProposalStatus::ALL {
            let json = serde_json::to_string(&status)?;
            assert_eq!(json, format!("\"{}\"", status.as_label()));
        }
        Ok(())
    }

    #[test]
    fn verdict_margin_is_inclusive() {
        assert_eq!(Verdict::from_delta(Some(0.02)), Verdict::Improved);
        assert_eq!(Verdict::from_delta(Some(-0.02)), Verdict::Regressed);
        assert_eq!(Verdict::from_delta(Some(0.019)), Verdict::Neutral);
        assert_eq!(Verdict::from_delta(None), Verdict::Neutral);
    }
}
