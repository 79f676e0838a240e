//! Deterministic fold of the event log into derived state.
//!
//! The projector is pure: identical event sequences produce identical
//! states and checksums. [`StateProjector::incremental_update`] folds only
//! the events past a snapshot's version and must always equal a full
//! [`StateProjector::project`] over the same prefix.
//!
//! Events that cannot be folded (a transition for an unknown proposal, an
//! illegal transition, a malformed payload) are recorded as anomalies
//! rather than aborting the fold, so a single bad record never blocks
//! replay of the rest of the log.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use guardian_core::event::types;
use guardian_core::id::FINGERPRINT_PREFIX;
use guardian_core::{Event, StoredSnapshot};

use crate::config::AutotuneConfig;
use crate::error::Result;
use crate::events::{AutotuneEvent, TransitionPayload};
use crate::proposal::{EvaluationRun, LifecycleEvent, Proposal, ProposalStatus};
use crate::signals::{self, SignalTally};
use crate::thresholds::Thresholds;

/// Source label for engine-emitted proposals.
const ENGINE_SOURCE: &str = "engine";

/// Starting configuration before any event is folded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// Autotune settings.
    pub config: AutotuneConfig,
    /// Threshold registry.
    pub thresholds: Thresholds,
}

/// Latest trust index sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustSample {
    /// Score in `[0, 1]`.
    pub score: f64,
    /// Source event.
    pub event_id: u64,
    /// Sample time.
    pub timestamp: DateTime<Utc>,
}

/// A log event the projector could not fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Offending event.
    pub event_id: u64,
    /// Why it was skipped.
    pub reason: String,
}

/// Everything derivable from the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedState {
    /// Last folded event id.
    pub last_event_id: u64,
    /// Folded events.
    pub event_count: u64,
    /// Live autotune settings.
    pub config: AutotuneConfig,
    /// Live thresholds.
    pub thresholds: Thresholds,
    /// All-time signal tallies per target.
    pub signals: BTreeMap<String, SignalTally>,
    /// Latest trust sample.
    pub trust: Option<TrustSample>,
    /// Proposals by id.
    pub proposals: BTreeMap<String, Proposal>,
    /// Audit trail in log order.
    pub lifecycle: Vec<LifecycleEvent>,
    /// Persisted scheduler runs in log order.
    pub evaluation_runs: Vec<EvaluationRun>,
    /// Events that could not be folded.
    pub anomalies: Vec<Anomaly>,
}

impl DerivedState {
    /// Proposal currently occupying a target, if any.
    #[must_use]
    pub fn open_proposal_for(&self, target_param: &str) -> Option<&Proposal> {
        self.proposals
            .values()
            .find(|p| p.target_param == target_param && p.status.occupies_target())
    }

    /// Most recently emitted proposal for a target.
    #[must_use]
    pub fn latest_proposal_for(&self, target_param: &str) -> Option<&Proposal> {
        self.proposals
            .values()
            .filter(|p| p.target_param == target_param)
            .max_by_key(|p| (p.proposed_at, p.last_event_id))
    }
}

/// Projected state at a log position.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Last folded event id.
    pub version: u64,
    /// Derived state.
    pub state: DerivedState,
    /// Hex SHA-256 of the canonical state.
    pub checksum: String,
}

impl Snapshot {
    /// Encodes the snapshot for persistence, tagged with the digest of the
    /// baseline it was folded from.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the state cannot be encoded.
    pub fn to_stored(&self, baseline_digest: &str, written_at: DateTime<Utc>) -> Result<StoredSnapshot> {
        let state = serde_json::to_value(&self.state).map_err(guardian_core::Error::serialization)?;
        Ok(StoredSnapshot {
            version: self.version,
            checksum: self.checksum.clone(),
            baseline: Some(baseline_digest.to_string()),
            state,
            written_at,
        })
    }

    /// Decodes a persisted snapshot and verifies its checksum.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the state does not decode, and
    /// `Internal` if the checksum does not match the state.
    pub fn from_stored(stored: &StoredSnapshot) -> Result<Self> {
        let state: DerivedState = serde_json::from_value(stored.state.clone())
            .map_err(guardian_core::Error::serialization)?;
        let checksum = guardian_core::canonical::checksum(&state)?;
        if checksum != stored.checksum || state.last_event_id != stored.version {
            return Err(guardian_core::Error::Internal {
                message: format!(
                    "snapshot at version {} failed verification (stored checksum {}, computed {checksum})",
                    stored.version, stored.checksum
                ),
            }
            .into());
        }
        Ok(Self {
            version: stored.version,
            state,
            checksum,
        })
    }
}

/// Computes a proposal fingerprint.
///
/// # Errors
///
/// Returns a serialization error if the inputs cannot be encoded.
pub fn fingerprint(
    proposal_id: &str,
    status: ProposalStatus,
    target_param: &str,
    thresholds: &Thresholds,
) -> Result<String> {
    let material = json!({
        "proposal_id": proposal_id,
        "status": status,
        "target_param": target_param,
        "thresholds": thresholds,
    });
    Ok(guardian_core::id::content_id(FINGERPRINT_PREFIX, &material)?)
}

/// Folds events into [`DerivedState`].
#[derive(Debug, Clone, Default)]
pub struct StateProjector {
    baseline: Baseline,
}

impl StateProjector {
    /// Creates a projector seeded with a baseline.
    #[must_use]
    pub const fn new(baseline: Baseline) -> Self {
        Self { baseline }
    }

    /// The seed configuration.
    #[must_use]
    pub const fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    /// Hex SHA-256 of the canonical baseline.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the baseline cannot be encoded.
    pub fn baseline_digest(&self) -> Result<String> {
        Ok(guardian_core::canonical::checksum(&self.baseline)?)
    }

    /// State before any event.
    #[must_use]
    pub fn initial_state(&self) -> DerivedState {
        DerivedState {
            last_event_id: 0,
            event_count: 0,
            config: self.baseline.config.clone(),
            thresholds: self.baseline.thresholds.clone(),
            signals: BTreeMap::new(),
            trust: None,
            proposals: BTreeMap::new(),
            lifecycle: Vec::new(),
            evaluation_runs: Vec::new(),
            anomalies: Vec::new(),
        }
    }

    /// Snapshot before any event.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the baseline cannot be hashed.
    pub fn initial_snapshot(&self) -> Result<Snapshot> {
        seal(self.initial_state())
    }

    /// Full replay from the start of the log.
    ///
    /// # Errors
    ///
    /// Returns `EventIdGap` if `events` is not a contiguous run from id 1.
    pub fn project(&self, events: &[Event]) -> Result<Snapshot> {
        let _span = guardian_core::observability::replay_span("project", 0).entered();
        let mut state = self.initial_state();
        for event in events {
            fold_event(&mut state, event)?;
        }
        seal(state)
    }

    /// Folds events past `snapshot.version` onto a copy of the snapshot.
    ///
    /// Events at or below the snapshot version are skipped.
    ///
    /// # Errors
    ///
    /// Returns `EventIdGap` if the new events do not continue the snapshot.
    pub fn incremental_update(&self, snapshot: &Snapshot, events: &[Event]) -> Result<Snapshot> {
        let fresh: Vec<&Event> = events
            .iter()
            .filter(|e| e.event_id > snapshot.version)
            .collect();
        if fresh.is_empty() {
            return Ok(snapshot.clone());
        }
        let mut state = snapshot.state.clone();
        for event in fresh {
            fold_event(&mut state, event)?;
        }
        seal(state)
    }
}

fn seal(state: DerivedState) -> Result<Snapshot> {
    let checksum = guardian_core::canonical::checksum(&state)?;
    Ok(Snapshot {
        version: state.last_event_id,
        state,
        checksum,
    })
}

/// Applies one event to the state.
///
/// # Errors
///
/// Returns `EventIdGap` when `event` does not directly follow the state.
pub fn fold_event(state: &mut DerivedState, event: &Event) -> Result<()> {
    let expected = state.last_event_id + 1;
    if event.event_id != expected {
        return Err(guardian_core::Error::EventIdGap {
            event_id: event.event_id,
            expected,
        }
        .into());
    }
    state.last_event_id = event.event_id;
    state.event_count += 1;

    if let Some(observation) = signals::classify(event) {
        state
            .signals
            .entry(observation.target_param.clone())
            .or_default()
            .record(&observation);
        return Ok(());
    }

    if event.event_type == types::TRUST_SAMPLED {
        match event.payload.get("score").and_then(Value::as_f64) {
            Some(score) if (0.0..=1.0).contains(&score) => {
                state.trust = Some(TrustSample {
                    score,
                    event_id: event.event_id,
                    timestamp: event.timestamp,
                });
            }
            _ => anomaly(state, event, "trust sample without a score in [0, 1]"),
        }
        return Ok(());
    }

    match AutotuneEvent::from_event(event) {
        Ok(Some(decoded)) => fold_governance(state, event, decoded),
        Ok(None) => Ok(()),
        Err(e) => {
            anomaly(state, event, &e.to_string());
            Ok(())
        }
    }
}

fn anomaly(state: &mut DerivedState, event: &Event, reason: &str) {
    tracing::warn!(event_id = event.event_id, reason, "event not folded");
    state.anomalies.push(Anomaly {
        event_id: event.event_id,
        reason: reason.to_string(),
    });
}

fn fold_governance(state: &mut DerivedState, event: &Event, decoded: AutotuneEvent) -> Result<()> {
    match decoded {
        AutotuneEvent::Proposed(p) => {
            if state.proposals.contains_key(&p.proposal_id) {
                anomaly(state, event, &format!("duplicate proposal {}", p.proposal_id));
                return Ok(());
            }
            let fingerprint = fingerprint(
                &p.proposal_id,
                ProposalStatus::Proposed,
                &p.target_param,
                &state.thresholds,
            )?;
            state.lifecycle.push(LifecycleEvent {
                event_id: event.event_id,
                proposal_id: p.proposal_id.clone(),
                from_status: None,
                to_status: ProposalStatus::Proposed,
                actor: event.actor.clone(),
                source: Some(ENGINE_SOURCE.to_string()),
                reason: None,
                note: None,
                timestamp: event.timestamp,
            });
            state.proposals.insert(
                p.proposal_id.clone(),
                Proposal {
                    proposal_id: p.proposal_id,
                    fingerprint,
                    target_param: p.target_param,
                    old_value: p.old_value,
                    new_value: p.new_value,
                    confidence: p.confidence,
                    status: ProposalStatus::Proposed,
                    mode: p.mode,
                    signal_count: p.signal_count,
                    signal_magnitude: p.signal_magnitude,
                    rationale: p.rationale,
                    trust_index_before: None,
                    trust_index_after_48h: None,
                    trust_delta_48h: None,
                    verdict: None,
                    proposed_at: event.timestamp,
                    reviewed_at: None,
                    applied_at: None,
                    rejected_at: None,
                    evaluated_at: None,
                    rolled_back_at: None,
                    rolled_back_after_evaluation: false,
                    last_event_id: event.event_id,
                },
            );
            Ok(())
        }
        AutotuneEvent::Reviewed(t) => transition(state, event, &t, ProposalStatus::Reviewed, |p, _| {
            p.reviewed_at = Some(event.timestamp);
        }),
        AutotuneEvent::Rejected(t) => transition(state, event, &t, ProposalStatus::Rejected, |p, _| {
            p.rejected_at = Some(event.timestamp);
        }),
        AutotuneEvent::Applied(a) => {
            transition(state, event, &a.transition, ProposalStatus::Applied, |p, thresholds| {
                p.old_value = a.old_value;
                p.new_value = a.new_value;
                p.trust_index_before = a.trust_index_before;
                p.applied_at = Some(event.timestamp);
                thresholds.set(a.target_param.clone(), a.new_value);
            })
        }
        AutotuneEvent::Evaluated(e) => {
            transition(state, event, &e.transition, ProposalStatus::Evaluated, |p, _| {
                p.trust_index_before = e.trust_index_before;
                p.trust_index_after_48h = e.trust_index_after_48h;
                p.trust_delta_48h = e.trust_delta_48h;
                p.verdict = Some(e.verdict);
                p.evaluated_at = Some(event.timestamp);
            })
        }
        AutotuneEvent::RolledBack(r) => {
            transition(state, event, &r.transition, ProposalStatus::RolledBack, |p, thresholds| {
                p.rolled_back_after_evaluation = p.status == ProposalStatus::Evaluated;
                p.rolled_back_at = Some(event.timestamp);
                thresholds.set(r.target_param.clone(), r.restored_value);
            })
        }
        AutotuneEvent::ConfigUpdated(c) => {
            state.config = c.config;
            Ok(())
        }
        AutotuneEvent::EvaluationRun(run) => {
            state.evaluation_runs.push(run);
            Ok(())
        }
    }
}

/// Moves a proposal to `to`, applying `update` before the status changes.
fn transition<F>(
    state: &mut DerivedState,
    event: &Event,
    payload: &TransitionPayload,
    to: ProposalStatus,
    update: F,
) -> Result<()>
where
    F: FnOnce(&mut Proposal, &mut Thresholds),
{
    let Some(proposal) = state.proposals.get_mut(&payload.proposal_id) else {
        anomaly(state, event, &format!("unknown proposal {}", payload.proposal_id));
        return Ok(());
    };
    let from = proposal.status;
    if !from.can_transition_to(to) {
        let reason = format!("illegal transition {from} -> {to} for {}", payload.proposal_id);
        anomaly(state, event, &reason);
        return Ok(());
    }

    let before = state.thresholds.clone();
    update(proposal, &mut state.thresholds);
    proposal.status = to;
    proposal.last_event_id = event.event_id;
    proposal.fingerprint = fingerprint(
        &proposal.proposal_id,
        to,
        &proposal.target_param,
        &state.thresholds,
    )?;

    state.lifecycle.push(LifecycleEvent {
        event_id: event.event_id,
        proposal_id: payload.proposal_id.clone(),
        from_status: Some(from),
        to_status: to,
        actor: event.actor.clone(),
        source: payload.source.clone(),
        reason: payload.reason.clone(),
        note: payload.note.clone(),
        timestamp: event.timestamp,
    });

    // A configuration change stales every other open proposal's token.
    if state.thresholds != before {
        let thresholds = state.thresholds.clone();
        for other in state
            .proposals
            .values_mut()
            .filter(|p| p.proposal_id != payload.proposal_id && !p.status.is_terminal())
        {
            other.fingerprint =
                fingerprint(&other.proposal_id, other.status, &other.target_param, &thresholds)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutotuneMode;
    use crate::events::{AppliedPayload, ProposedPayload, RolledBackPayload};
    use crate::thresholds::{REPEATED_SKIP, ThresholdValue};
    use chrono::Duration;
    use guardian_core::NewEvent;

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-12T09:00:00Z")
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default()
    }

    fn commit(id: u64, event: &AutotuneEvent) -> Event {
        event
            .to_new_event("ops", ts() + Duration::minutes(i64::try_from(id).unwrap_or(0)))
            .map(|e| e.into_event(id))
            .unwrap_or_else(|e| panic!("encode: {e}"))
    }

    fn skip(id: u64) -> Event {
        NewEvent::new(types::SIGNAL_SKIP, "user", json!({}), ts()).into_event(id)
    }

    fn proposed(id: &str) -> AutotuneEvent {
        AutotuneEvent::Proposed(ProposedPayload {
            proposal_id: id.into(),
            target_param: REPEATED_SKIP.into(),
            old_value: ThresholdValue::Int(2),
            new_value: ThresholdValue::Int(3),
            confidence: 0.7,
            mode: AutotuneMode::Assist,
            signal_count: 3,
            signal_magnitude: 3.0,
            rationale: String::new(),
            generator: "heuristic".into(),
        })
    }

    fn transition_payload(id: &str) -> TransitionPayload {
        TransitionPayload {
            proposal_id: id.into(),
            ..TransitionPayload::default()
        }
    }

    #[test]
    fn three_skips_replay_to_same_checksum() -> Result<()> {
        let events = vec![skip(1), skip(2), skip(3)];
        let projector = StateProjector::default();
        let a = projector.project(&events)?;
        let b = projector.project(&events)?;
        assert_eq!(a.state.signals[REPEATED_SKIP].count, 3);
        assert_eq!(a.checksum, b.checksum);
        assert_eq!(a.version, 3);
        Ok(())
    }

    #[test]
    fn incremental_equals_full_replay() -> Result<()> {
        let events = vec![
            skip(1),
            commit(2, &proposed("atp_a")),
            skip(3),
            commit(4, &AutotuneEvent::Reviewed(transition_payload("atp_a"))),
        ];
        let projector = StateProjector::default();
        let full = projector.project(&events)?;
        let head = projector.project(&events[..2])?;
        let incremental = projector.incremental_update(&head, &events)?;
        assert_eq!(incremental, full);
        Ok(())
    }

    #[test]
    fn gap_is_rejected() {
        let projector = StateProjector::default();
        let err = projector.project(&[skip(1), skip(3)]);
        assert!(err.is_err());
    }

    #[test]
    fn apply_and_rollback_restore_threshold() -> Result<()> {
        let applied = AutotuneEvent::Applied(AppliedPayload {
            transition: transition_payload("atp_a"),
            target_param: REPEATED_SKIP.into(),
            old_value: ThresholdValue::Int(2),
            new_value: ThresholdValue::Int(3),
            trust_index_before: Some(0.6),
        });
        let rolled_back = AutotuneEvent::RolledBack(RolledBackPayload {
            transition: transition_payload("atp_a"),
            target_param: REPEATED_SKIP.into(),
            restored_value: ThresholdValue::Int(2),
            reverted_value: ThresholdValue::Int(3),
        });
        let projector = StateProjector::default();
        let events = vec![commit(1, &proposed("atp_a")), commit(2, &applied)];
        let after_apply = projector.project(&events)?;
        assert_eq!(
            after_apply.state.thresholds.get(REPEATED_SKIP),
            Some(ThresholdValue::Int(3))
        );

        let mut all = events;
        all.push(commit(3, &rolled_back));
        let after_rollback = projector.project(&all)?;
        let p = &after_rollback.state.proposals["atp_a"];
        assert_eq!(p.status, ProposalStatus::RolledBack);
        assert!(!p.rolled_back_after_evaluation);
        assert_eq!(
            after_rollback.state.thresholds.get(REPEATED_SKIP),
            Some(ThresholdValue::Int(2))
        );
        Ok(())
    }

    #[test]
    fn fingerprint_changes_on_every_transition() -> Result<()> {
        let projector = StateProjector::default();
        let proposed_only = projector.project(&[commit(1, &proposed("atp_a"))])?;
        let reviewed = projector.incremental_update(
            &proposed_only,
            &[commit(2, &AutotuneEvent::Reviewed(transition_payload("atp_a")))],
        )?;
        assert_ne!(
            proposed_only.state.proposals["atp_a"].fingerprint,
            reviewed.state.proposals["atp_a"].fingerprint
        );
        assert!(reviewed.state.proposals["atp_a"].fingerprint.starts_with("gatfp_"));
        Ok(())
    }

    #[test]
    fn unknown_and_illegal_transitions_become_anomalies() -> Result<()> {
        let projector = StateProjector::default();
        let snapshot = projector.project(&[
            commit(1, &AutotuneEvent::Reviewed(transition_payload("atp_missing"))),
            commit(2, &proposed("atp_a")),
            commit(3, &AutotuneEvent::Rejected(transition_payload("atp_a"))),
            commit(4, &AutotuneEvent::Reviewed(transition_payload("atp_a"))),
        ])?;
        let ids: Vec<u64> = snapshot.state.anomalies.iter().map(|a| a.event_id).collect();
        assert_eq!(ids, vec![1, 4]);
        assert_eq!(snapshot.state.proposals["atp_a"].status, ProposalStatus::Rejected);
        Ok(())
    }

    #[test]
    fn stored_snapshot_round_trips_and_detects_tampering() -> Result<()> {
        let projector = StateProjector::default();
        let snapshot = projector.project(&[skip(1), commit(2, &proposed("atp_a"))])?;
        let stored = snapshot.to_stored(&projector.baseline_digest()?, ts())?;
        assert_eq!(Snapshot::from_stored(&stored)?, snapshot);
        assert_eq!(stored.baseline, Some(projector.baseline_digest()?));

        let mut tampered = stored;
        tampered.state["event_count"] = json!(99);
        assert!(Snapshot::from_stored(&tampered).is_err());
        Ok(())
    }

    #[test]
    fn baseline_digest_tracks_the_seed() -> Result<()> {
        let shadow = StateProjector::default();
        let mut baseline = Baseline::default();
        baseline.config.mode = AutotuneMode::Assist;
        let assist = StateProjector::new(baseline);

        assert_eq!(shadow.baseline_digest()?, StateProjector::default().baseline_digest()?);
        assert_ne!(shadow.baseline_digest()?, assist.baseline_digest()?);
        Ok(())
    }
}
