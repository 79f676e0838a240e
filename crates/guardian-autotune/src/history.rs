//! Read-side audit queries.
//!
//! Everything here is computed from a snapshot; nothing is appended.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AutotuneMode;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::proposal::{
    EvaluationRun, LifecycleAction, LifecycleEvent, Proposal, ProposalStatus, Verdict,
};
use crate::trust::TrustIndexSource;

/// Trust below which an active change is flagged for rollback.
pub const LOW_TRUST_THRESHOLD: f64 = 0.5;

/// Readiness of a derived metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricStatus {
    /// Value is computed from at least one sample.
    Ready,
    /// Samples exist but have not been measured yet.
    Pending,
    /// Nothing to measure.
    Unavailable,
}

/// A metric value with explicit readiness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    /// Rounded value; present only when `status` is `ready`.
    pub value: Option<f64>,
    /// Readiness.
    pub status: MetricStatus,
    /// Samples behind the value.
    pub sample_size: u64,
}

impl MetricValue {
    fn ready(value: f64, sample_size: usize) -> Self {
        Self {
            value: Some(round4(value)),
            status: MetricStatus::Ready,
            sample_size: u64::try_from(sample_size).unwrap_or(u64::MAX),
        }
    }

    const fn empty(status: MetricStatus) -> Self {
        Self {
            value: None,
            status,
            sample_size: 0,
        }
    }
}

/// Aggregated governance metrics over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleMetrics {
    /// Median hours from proposal to first review or apply.
    pub review_turnaround_hours: MetricValue,
    /// Share of evaluated applies whose verdict is not regressed.
    pub apply_success_rate: MetricValue,
    /// Share of applies later rolled back.
    pub rollback_rate: MetricValue,
    /// Mean trust change over the evaluation horizon.
    pub post_apply_trust_delta_48h: MetricValue,
}

/// Why a rollback is recommended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackReason {
    /// Current trust index is below [`LOW_TRUST_THRESHOLD`].
    LowHumanTrustIndex,
    /// Evaluation found the change made things worse.
    RegressedOutcome,
}

/// Rollback suggestion for the active change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecommendation {
    /// Proposal to roll back.
    pub proposal_id: String,
    /// Fingerprint to pass to `rollback`.
    pub fingerprint: String,
    /// Trigger.
    pub reason: RollbackReason,
    /// Trust index at the time of the query.
    pub trust_index: Option<f64>,
    /// Recorded verdict, if evaluated.
    pub verdict: Option<Verdict>,
}

/// Response of [`AuditHistory::latest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestView {
    /// Whether autotune is enabled.
    pub enabled: bool,
    /// Current mode.
    pub mode: AutotuneMode,
    /// Most recent proposal.
    pub proposal: Option<Proposal>,
    /// Lifecycle trail of that proposal, oldest first.
    pub chain: Vec<LifecycleEvent>,
    /// Actions that are legal for it right now.
    pub available_actions: Vec<LifecycleAction>,
    /// Current trust index.
    pub trust_index: Option<f64>,
    /// Present when the active change should be undone.
    pub rollback_recommendation: Option<RollbackRecommendation>,
}

/// Response of [`AuditHistory::history`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryView {
    /// Window in days.
    pub days: u32,
    /// Maximum chain entries returned.
    pub limit: usize,
    /// Lifecycle events in the window, newest first.
    pub chain: Vec<LifecycleEvent>,
    /// Metrics over proposals raised in the window.
    pub metrics: LifecycleMetrics,
}

/// Audit query surface.
pub struct AuditHistory {
    ledger: Arc<Ledger>,
    trust: Arc<dyn TrustIndexSource>,
}

impl std::fmt::Debug for AuditHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditHistory").finish_non_exhaustive()
    }
}

impl AuditHistory {
    /// Creates the query surface.
    #[must_use]
    pub fn new(ledger: Arc<Ledger>, trust: Arc<dyn TrustIndexSource>) -> Self {
        Self { ledger, trust }
    }

    /// Most recent proposal with its trail and any rollback recommendation.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub async fn latest(&self, now: DateTime<Utc>) -> Result<LatestView> {
        let snapshot = self.ledger.snapshot().await?;
        let state = &snapshot.state;
        let trust_index = self.trust.trust_index(state, now);

        let proposal = state
            .proposals
            .values()
            .max_by(|a, b| {
                a.proposed_at
                    .cmp(&b.proposed_at)
                    .then_with(|| a.proposal_id.cmp(&b.proposal_id))
            })
            .cloned();
        let chain = proposal
            .as_ref()
            .map(|p| {
                state
                    .lifecycle
                    .iter()
                    .filter(|e| e.proposal_id == p.proposal_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let available_actions = proposal
            .as_ref()
            .map(|p| available_actions(p.status))
            .unwrap_or_default();

        let active = state
            .proposals
            .values()
            .filter(|p| matches!(p.status, ProposalStatus::Applied | ProposalStatus::Evaluated))
            .max_by(|a, b| {
                a.applied_at
                    .cmp(&b.applied_at)
                    .then_with(|| a.proposal_id.cmp(&b.proposal_id))
            });

        Ok(LatestView {
            enabled: state.config.enabled,
            mode: state.config.mode,
            proposal,
            chain,
            available_actions,
            trust_index,
            rollback_recommendation: active.and_then(|p| recommend_rollback(p, trust_index)),
        })
    }

    /// Lifecycle trail and metrics over the last `days`.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub async fn history(&self, days: u32, limit: usize, now: DateTime<Utc>) -> Result<HistoryView> {
        let snapshot = self.ledger.snapshot().await?;
        let state = &snapshot.state;
        let since = now - Duration::days(i64::from(days));

        let chain = state
            .lifecycle
            .iter()
            .rev()
            .filter(|e| e.timestamp >= since && e.timestamp <= now)
            .take(limit)
            .cloned()
            .collect();
        let window: Vec<&Proposal> = state
            .proposals
            .values()
            .filter(|p| p.proposed_at >= since && p.proposed_at <= now)
            .collect();

        Ok(HistoryView {
            days,
            limit,
            chain,
            metrics: lifecycle_metrics(&window),
        })
    }

    /// Persisted evaluation runs over the last `days`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub async fn evaluation_logs(
        &self,
        days: u32,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<EvaluationRun>> {
        let snapshot = self.ledger.snapshot().await?;
        let since = now - Duration::days(i64::from(days));
        Ok(snapshot
            .state
            .evaluation_runs
            .iter()
            .rev()
            .filter(|run| run.started_at >= since && run.started_at <= now)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Actions legal from `status`.
#[must_use]
pub fn available_actions(status: ProposalStatus) -> Vec<LifecycleAction> {
    LifecycleAction::ALL
        .into_iter()
        .filter(|action| status.can_transition_to(action.target_status()))
        .collect()
}

fn recommend_rollback(active: &Proposal, trust_index: Option<f64>) -> Option<RollbackRecommendation> {
    let reason = if trust_index.is_some_and(|t| t < LOW_TRUST_THRESHOLD) {
        RollbackReason::LowHumanTrustIndex
    } else if active.verdict == Some(Verdict::Regressed) {
        RollbackReason::RegressedOutcome
    } else {
        return None;
    };
    Some(RollbackRecommendation {
        proposal_id: active.proposal_id.clone(),
        fingerprint: active.fingerprint.clone(),
        reason,
        trust_index,
        verdict: active.verdict,
    })
}

/// Computes metrics over a set of proposals.
#[must_use]
pub fn lifecycle_metrics(proposals: &[&Proposal]) -> LifecycleMetrics {
    let mut turnaround: Vec<f64> = proposals
        .iter()
        .filter_map(|p| {
            let first = match (p.reviewed_at, p.applied_at) {
                (Some(r), Some(a)) => Some(r.min(a)),
                (r, a) => r.or(a),
            }?;
            Some(hours(first - p.proposed_at))
        })
        .collect();
    turnaround.sort_by(f64::total_cmp);
    let review_turnaround_hours = median(&turnaround).map_or_else(
        || {
            let waiting = proposals.iter().any(|p| p.status == ProposalStatus::Proposed);
            MetricValue::empty(if waiting {
                MetricStatus::Pending
            } else {
                MetricStatus::Unavailable
            })
        },
        |m| MetricValue::ready(m, turnaround.len()),
    );

    let applied: Vec<&&Proposal> = proposals.iter().filter(|p| p.applied_at.is_some()).collect();
    let verdicts: Vec<Verdict> = applied.iter().filter_map(|p| p.verdict).collect();
    let apply_success_rate = if verdicts.is_empty() {
        MetricValue::empty(pending_if(!applied.is_empty()))
    } else {
        let ok = verdicts.iter().filter(|v| **v != Verdict::Regressed).count();
        MetricValue::ready(ratio(ok, verdicts.len()), verdicts.len())
    };

    let rollback_rate = if applied.is_empty() {
        MetricValue::empty(MetricStatus::Unavailable)
    } else {
        let rolled = applied.iter().filter(|p| p.rolled_back_at.is_some()).count();
        MetricValue::ready(ratio(rolled, applied.len()), applied.len())
    };

    let deltas: Vec<f64> = applied.iter().filter_map(|p| p.trust_delta_48h).collect();
    let post_apply_trust_delta_48h = if deltas.is_empty() {
        let unmeasured = applied.iter().any(|p| p.evaluated_at.is_none());
        MetricValue::empty(pending_if(unmeasured))
    } else {
        MetricValue::ready(mean(&deltas), deltas.len())
    };

    LifecycleMetrics {
        review_turnaround_hours,
        apply_success_rate,
        rollback_rate,
        post_apply_trust_delta_48h,
    }
}

const fn pending_if(pending: bool) -> MetricStatus {
    if pending {
        MetricStatus::Pending
    } else {
        MetricStatus::Unavailable
    }
}

fn median(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(sorted[n / 2]),
        _ => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, whole: usize) -> f64 {
    part as f64 / whole as f64
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[allow(clippy::cast_precision_loss)]
fn hours(span: Duration) -> f64 {
    span.num_seconds() as f64 / 3600.0
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::ThresholdValue;

    fn at(hour: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::hours(hour)
    }

    fn proposal(id: &str, status: ProposalStatus) -> Proposal {
        Proposal {
            proposal_id: id.into(),
            fingerprint: format!("gatfp_{id}"),
            target_param: "deviation_signals.repeated_skip".into(),
            old_value: ThresholdValue::Int(2),
            new_value: ThresholdValue::Int(3),
            confidence: 0.8,
            status,
            mode: AutotuneMode::Assist,
            signal_count: 5,
            signal_magnitude: 5.0,
            rationale: String::new(),
            trust_index_before: None,
            trust_index_after_48h: None,
            trust_delta_48h: None,
            verdict: None,
            proposed_at: at(0),
            reviewed_at: None,
            applied_at: None,
            rejected_at: None,
            evaluated_at: None,
            rolled_back_at: None,
            rolled_back_after_evaluation: false,
            last_event_id: 1,
        }
    }

    #[test]
    fn empty_window_is_unavailable() {
        let m = lifecycle_metrics(&[]);
        assert_eq!(m.review_turnaround_hours.status, MetricStatus::Unavailable);
        assert_eq!(m.apply_success_rate.status, MetricStatus::Unavailable);
        assert_eq!(m.rollback_rate.status, MetricStatus::Unavailable);
        assert_eq!(m.post_apply_trust_delta_48h.value, None);
    }

    #[test]
    fn unevaluated_apply_is_pending_not_zero() {
        let mut p = proposal("a", ProposalStatus::Applied);
        p.applied_at = Some(at(2));
        let m = lifecycle_metrics(&[&p]);
        assert_eq!(m.review_turnaround_hours.value, Some(2.0));
        assert_eq!(m.apply_success_rate.status, MetricStatus::Pending);
        assert_eq!(m.post_apply_trust_delta_48h.status, MetricStatus::Pending);
        assert_eq!(m.rollback_rate.value, Some(0.0));
    }

    #[test]
    fn rolled_back_evaluation_still_counts() {
        let mut good = proposal("a", ProposalStatus::Evaluated);
        good.reviewed_at = Some(at(1));
        good.applied_at = Some(at(4));
        good.verdict = Some(Verdict::Improved);
        good.trust_delta_48h = Some(0.05);
        good.evaluated_at = Some(at(52));

        let mut bad = proposal("b", ProposalStatus::RolledBack);
        bad.applied_at = Some(at(3));
        bad.verdict = Some(Verdict::Regressed);
        bad.trust_delta_48h = Some(-0.1);
        bad.evaluated_at = Some(at(51));
        bad.rolled_back_at = Some(at(53));
        bad.rolled_back_after_evaluation = true;

        let m = lifecycle_metrics(&[&good, &bad]);
        assert_eq!(m.review_turnaround_hours.value, Some(2.0));
        assert_eq!(m.apply_success_rate.value, Some(0.5));
        assert_eq!(m.rollback_rate.value, Some(0.5));
        assert_eq!(m.post_apply_trust_delta_48h.value, Some(-0.025));
        assert_eq!(m.post_apply_trust_delta_48h.sample_size, 2);
    }

    #[test]
    fn low_trust_takes_precedence_over_verdict() {
        let mut p = proposal("a", ProposalStatus::Evaluated);
        p.verdict = Some(Verdict::Regressed);
        let rec = recommend_rollback(&p, Some(0.3)).map(|r| r.reason);
        assert_eq!(rec, Some(RollbackReason::LowHumanTrustIndex));
        let rec = recommend_rollback(&p, Some(0.8)).map(|r| r.reason);
        assert_eq!(rec, Some(RollbackReason::RegressedOutcome));

        p.verdict = Some(Verdict::Neutral);
        assert!(recommend_rollback(&p, None).is_none());
    }

    #[test]
    fn actions_follow_the_transition_graph() {
        assert_eq!(
            available_actions(ProposalStatus::Proposed),
            vec![LifecycleAction::Review, LifecycleAction::Apply, LifecycleAction::Reject]
        );
        assert_eq!(available_actions(ProposalStatus::Evaluated), vec![LifecycleAction::Rollback]);
        assert!(available_actions(ProposalStatus::Rejected).is_empty());
    }
}
