//! The proposal state machine.
//!
//! Every action runs the same checks in the same order:
//!
//! 1. mode is `assist`
//! 2. the proposal exists
//! 3. the presented fingerprint matches
//! 4. the transition is legal from the current status
//! 5. guardrails hold (apply)
//! 6. the evaluation horizon has elapsed (evaluate, unless forced)
//!
//! Checks run inside the ledger's append plan, so they always see the
//! latest state and a lost append race is re-validated from scratch. Two
//! callers racing with the same fingerprint therefore get exactly one
//! success; the projector rotates the fingerprint on every transition, so
//! the loser fails the fingerprint check.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use guardian_core::observability::governance_span;

use crate::config::AutotuneMode;
use crate::engine::step_limit;
use crate::error::{Error, Result};
use crate::events::{
    AppliedPayload, AutotuneEvent, EvaluatedPayload, RolledBackPayload, TransitionPayload,
};
use crate::ledger::{Ledger, Plan};
use crate::metrics::GuardianMetrics;
use crate::projector::{DerivedState, fingerprint};
use crate::proposal::{LifecycleAction, Proposal, ProposalStatus, Verdict};
use crate::trust::TrustIndexSource;

/// Tolerance when comparing a step against its guardrail.
const STEP_EPSILON: f64 = 1e-9;

/// Parameters of a governance call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Proposal id.
    pub proposal_id: String,
    /// Fingerprint the caller last saw.
    pub fingerprint: String,
    /// Who is acting.
    pub actor: String,
    /// Calling surface.
    #[serde(default)]
    pub source: Option<String>,
    /// Operator reason.
    #[serde(default)]
    pub reason: Option<String>,
    /// Operator note.
    #[serde(default)]
    pub note: Option<String>,
    /// Bypass the evaluation horizon.
    #[serde(default)]
    pub force: bool,
}

impl ActionRequest {
    /// Builds a request for the common fields.
    #[must_use]
    pub fn new(
        proposal_id: impl Into<String>,
        fingerprint: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            proposal_id: proposal_id.into(),
            fingerprint: fingerprint.into(),
            actor: actor.into(),
            ..Self::default()
        }
    }

    /// Sets the bypass flag.
    #[must_use]
    pub const fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Sets the calling surface.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Sets the note.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    fn transition_payload(&self) -> TransitionPayload {
        TransitionPayload {
            proposal_id: self.proposal_id.clone(),
            fingerprint: self.fingerprint.clone(),
            source: self.source.clone(),
            reason: self.reason.clone(),
            note: self.note.clone(),
        }
    }
}

/// Result status of a governance call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Moved to `reviewed`.
    Reviewed,
    /// Moved to `applied`.
    Applied,
    /// Moved to `rejected`.
    Rejected,
    /// Moved to `evaluated`.
    Evaluated,
    /// Moved to `rolled_back`.
    RolledBack,
    /// Evaluation horizon not reached; nothing changed.
    Pending,
}

impl From<ProposalStatus> for ActionStatus {
    fn from(status: ProposalStatus) -> Self {
        match status {
            ProposalStatus::Reviewed => Self::Reviewed,
            ProposalStatus::Applied => Self::Applied,
            ProposalStatus::Rejected => Self::Rejected,
            ProposalStatus::Evaluated => Self::Evaluated,
            ProposalStatus::RolledBack => Self::RolledBack,
            // Emission is not an action; nothing maps here.
            ProposalStatus::Proposed => Self::Pending,
        }
    }
}

/// When a pending evaluation becomes due.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingEvaluation {
    /// Earliest evaluation time.
    pub due_at: DateTime<Utc>,
    /// Hours until due.
    pub remaining_hours: f64,
}

/// Result of a governance call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutcome {
    /// What happened.
    pub status: ActionStatus,
    /// Mode at call time.
    pub mode: AutotuneMode,
    /// Proposal after the call.
    pub proposal: Proposal,
    /// Appended event, if any.
    pub event_id: Option<u64>,
    /// Set when `status` is `pending`.
    pub pending: Option<PendingEvaluation>,
}

enum Decision {
    Transition(ProposalStatus),
    Pending(PendingEvaluation),
}

/// Governs proposals through their lifecycle.
pub struct LifecycleManager {
    ledger: Arc<Ledger>,
    trust: Arc<dyn TrustIndexSource>,
    metrics: GuardianMetrics,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager").finish_non_exhaustive()
    }
}

impl LifecycleManager {
    /// Creates a manager.
    #[must_use]
    pub fn new(ledger: Arc<Ledger>, trust: Arc<dyn TrustIndexSource>) -> Self {
        Self {
            ledger,
            trust,
            metrics: GuardianMetrics::new(),
        }
    }

    /// `proposed → reviewed`.
    ///
    /// # Errors
    ///
    /// See [`LifecycleManager::execute`].
    pub async fn review(&self, request: &ActionRequest, now: DateTime<Utc>) -> Result<ActionOutcome> {
        self.execute(LifecycleAction::Review, request, now).await
    }

    /// `proposed|reviewed → applied`, writing the configuration change.
    ///
    /// # Errors
    ///
    /// See [`LifecycleManager::execute`].
    pub async fn apply(&self, request: &ActionRequest, now: DateTime<Utc>) -> Result<ActionOutcome> {
        self.execute(LifecycleAction::Apply, request, now).await
    }

    /// `proposed|reviewed → rejected`.
    ///
    /// # Errors
    ///
    /// See [`LifecycleManager::execute`].
    pub async fn reject(&self, request: &ActionRequest, now: DateTime<Utc>) -> Result<ActionOutcome> {
        self.execute(LifecycleAction::Reject, request, now).await
    }

    /// `applied → evaluated`, or `pending` before the horizon.
    ///
    /// # Errors
    ///
    /// See [`LifecycleManager::execute`].
    pub async fn evaluate(
        &self,
        request: &ActionRequest,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome> {
        self.execute(LifecycleAction::Evaluate, request, now).await
    }

    /// `applied|evaluated → rolled_back`, restoring the pre-apply value.
    ///
    /// # Errors
    ///
    /// See [`LifecycleManager::execute`].
    pub async fn rollback(
        &self,
        request: &ActionRequest,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome> {
        self.execute(LifecycleAction::Rollback, request, now).await
    }

    /// Runs one action.
    ///
    /// # Errors
    ///
    /// Returns `ModeNotAssist`, `ProposalNotFound`, `ConcurrencyConflict`,
    /// `InvalidTransition` or `GuardrailViolation` per the check order,
    /// and log errors from the append.
    pub async fn execute(
        &self,
        action: LifecycleAction,
        request: &ActionRequest,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome> {
        let span = governance_span(action.as_label(), &request.proposal_id);
        async move {
            let trust = &*self.trust;
            let written = self
                .ledger
                .append_with(|snapshot| plan_action(action, request, &snapshot.state, trust, now))
                .await;
            let written = match written {
                Ok(written) => written,
                Err(e) => {
                    tracing::warn!(code = e.code(), error = %e, "governance action refused");
                    return Err(e);
                }
            };

            let state = &written.snapshot.state;
            let proposal = state
                .proposals
                .get(&request.proposal_id)
                .cloned()
                .ok_or_else(|| Error::ProposalNotFound {
                    proposal_id: request.proposal_id.clone(),
                })?;

            let (status, pending) = match written.value {
                Decision::Transition(from) => {
                    self.metrics
                        .record_transition(from.as_label(), proposal.status.as_label());
                    tracing::info!(
                        from = %from,
                        to = %proposal.status,
                        actor = %request.actor,
                        "proposal transitioned"
                    );
                    (ActionStatus::from(proposal.status), None)
                }
                Decision::Pending(pending) => {
                    tracing::info!(due_at = %pending.due_at, "evaluation pending");
                    (ActionStatus::Pending, Some(pending))
                }
            };
            Ok(ActionOutcome {
                status,
                mode: state.config.mode,
                proposal,
                event_id: written.event.map(|e| e.event_id),
                pending,
            })
        }
        .instrument(span)
        .await
    }
}

fn plan_action(
    action: LifecycleAction,
    request: &ActionRequest,
    state: &DerivedState,
    trust: &dyn TrustIndexSource,
    now: DateTime<Utc>,
) -> Result<Plan<Decision>> {
    if state.config.mode != AutotuneMode::Assist {
        return Err(Error::ModeNotAssist {
            mode: state.config.mode.to_string(),
        });
    }
    let id = request.proposal_id.as_str();
    let proposal = state
        .proposals
        .get(id)
        .ok_or_else(|| Error::ProposalNotFound {
            proposal_id: id.to_string(),
        })?;
    if request.fingerprint != proposal.fingerprint {
        return Err(Error::conflict(id, "fingerprint mismatch; refetch the proposal"));
    }
    let target = action.target_status();
    if !proposal.status.can_transition_to(target) {
        return Err(Error::InvalidTransition {
            proposal_id: id.to_string(),
            from: proposal.status,
            action,
        });
    }

    let transition = request.transition_payload();
    let event = match action {
        LifecycleAction::Review => AutotuneEvent::Reviewed(transition),
        LifecycleAction::Reject => AutotuneEvent::Rejected(transition),
        LifecycleAction::Apply => AutotuneEvent::Applied(plan_apply(state, proposal, transition, trust, now)?),
        LifecycleAction::Evaluate => {
            match plan_evaluate(state, proposal, transition, request.force, trust, now)? {
                Ok(payload) => AutotuneEvent::Evaluated(payload),
                Err(pending) => return Ok(Plan::Skip(Decision::Pending(pending))),
            }
        }
        LifecycleAction::Rollback => AutotuneEvent::RolledBack(plan_rollback(state, proposal, transition)?),
    };
    let event = event
        .to_new_event(&request.actor, now)?
        .with_correlation_id(id);
    Ok(Plan::Append(event, Decision::Transition(proposal.status)))
}

fn plan_apply(
    state: &DerivedState,
    proposal: &Proposal,
    transition: TransitionPayload,
    trust: &dyn TrustIndexSource,
    now: DateTime<Utc>,
) -> Result<AppliedPayload> {
    let id = proposal.proposal_id.as_str();
    let Some(current) = state.thresholds.get(&proposal.target_param) else {
        return Err(Error::guardrail(
            id,
            format!("target {} is not registered", proposal.target_param),
        ));
    };

    let expected = fingerprint(id, proposal.status, &proposal.target_param, &state.thresholds)?;
    if expected != proposal.fingerprint {
        return Err(Error::conflict(id, "configuration changed since the proposal was issued"));
    }

    let guardrails = &state.config.guardrails;
    let new_value = proposal.new_value;
    if !new_value.same_kind(current) {
        return Err(Error::guardrail(id, "proposed value changes the target's numeric kind"));
    }
    if new_value.shifted(0.0) != new_value {
        return Err(Error::guardrail(id, format!("value {new_value} is outside the target's range")));
    }
    let step = new_value.distance(current);
    let limit = step_limit(current, &state.config);
    if step > limit + STEP_EPSILON {
        return Err(Error::guardrail(
            id,
            format!("step {step} exceeds maximum {limit} for {}", proposal.target_param),
        ));
    }
    if proposal.confidence < guardrails.min_confidence {
        return Err(Error::guardrail(
            id,
            format!(
                "confidence {} below minimum {}",
                proposal.confidence, guardrails.min_confidence
            ),
        ));
    }

    Ok(AppliedPayload {
        transition,
        target_param: proposal.target_param.clone(),
        old_value: current,
        new_value,
        trust_index_before: trust.trust_index(state, now),
    })
}

/// Returns the payload, or `Err(pending)` before the horizon.
fn plan_evaluate(
    state: &DerivedState,
    proposal: &Proposal,
    transition: TransitionPayload,
    force: bool,
    trust: &dyn TrustIndexSource,
    now: DateTime<Utc>,
) -> Result<std::result::Result<EvaluatedPayload, PendingEvaluation>> {
    let Some(applied_at) = proposal.applied_at else {
        return Err(guardian_core::Error::Internal {
            message: format!("applied proposal {} has no apply time", proposal.proposal_id),
        }
        .into());
    };
    let horizon = Duration::hours(i64::from(state.config.auto_evaluate.horizon_hours));
    let due_at = applied_at + horizon;
    if !force && now < due_at {
        return Ok(Err(PendingEvaluation {
            due_at,
            remaining_hours: hours(due_at - now),
        }));
    }

    let before = proposal.trust_index_before;
    let after = trust.trust_index(state, now);
    let delta = before.zip(after).map(|(b, a)| a - b);
    let verdict = Verdict::from_delta(delta);
    Ok(Ok(EvaluatedPayload {
        transition,
        forced: force,
        trust_index_before: before,
        trust_index_after_48h: after,
        trust_delta_48h: delta,
        verdict,
        success_within_48h: verdict != Verdict::Regressed,
        hours_since_apply: hours(now - applied_at),
    }))
}

fn plan_rollback(
    state: &DerivedState,
    proposal: &Proposal,
    transition: TransitionPayload,
) -> Result<RolledBackPayload> {
    let current = state.thresholds.get(&proposal.target_param);
    if current != Some(proposal.new_value) {
        return Err(Error::conflict(
            &proposal.proposal_id,
            format!(
                "{} no longer holds the applied value {}",
                proposal.target_param, proposal.new_value
            ),
        ));
    }
    Ok(RolledBackPayload {
        transition,
        target_param: proposal.target_param.clone(),
        restored_value: proposal.old_value,
        reverted_value: proposal.new_value,
    })
}

#[allow(clippy::cast_precision_loss)]
fn hours(span: Duration) -> f64 {
    span.num_seconds() as f64 / 3600.0
}
