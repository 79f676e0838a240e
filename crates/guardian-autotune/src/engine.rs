//! Proposal generation from deviation signals.
//!
//! A scan aggregates signal events inside the trigger lookback window per
//! target, asks the candidate generator for a delta on every target whose
//! magnitude crosses its trigger level, bounds the delta by the
//! guardrails, and appends one `autotune.proposed` event per surviving
//! target. Scans never touch live configuration.
//!
//! The open-proposal and cooldown checks run inside the append plan, so two
//! concurrent scans cannot both emit for the same target.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use guardian_core::ReplayCursor;

use crate::candidate::{CandidateGenerator, SignalSummary};
use crate::config::{AutotuneConfig, AutotuneMode};
use crate::error::Result;
use crate::events::{AutotuneEvent, ProposedPayload};
use crate::ledger::{Ledger, Plan};
use crate::metrics::GuardianMetrics;
use crate::proposal::Proposal;
use crate::projector::DerivedState;
use crate::signals::{self, SignalTally};
use crate::thresholds::ThresholdValue;

/// Actor recorded on engine-emitted events.
pub const ENGINE_ACTOR: &str = "guardian-autotune";

/// Overall scan result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// At least one proposal was emitted.
    Proposed,
    /// Nothing was emitted.
    Skipped,
    /// Autotune is switched off.
    Disabled,
}

/// Why a target produced no proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Too few signal events in the window.
    InsufficientEvents,
    /// Magnitude below the target's trigger level.
    BelowTrigger,
    /// A proposal for this target is still open.
    OpenProposal,
    /// The last proposal for this target is inside the cooldown window.
    CooldownActive,
    /// The generator declined.
    NoCandidate,
    /// The bounded change rounds to nothing.
    NoChange,
    /// Confidence below `guardrails.min_confidence`.
    LowConfidence,
    /// Guardrails forbid any change of this kind.
    Guardrail,
    /// Signals name a target that is not in the registry.
    UnknownTarget,
}

impl SkipReason {
    /// Stable label.
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::InsufficientEvents => "insufficient_events",
            Self::BelowTrigger => "below_trigger",
            Self::OpenProposal => "open_proposal",
            Self::CooldownActive => "cooldown_active",
            Self::NoCandidate => "no_candidate",
            Self::NoChange => "no_change",
            Self::LowConfidence => "low_confidence",
            Self::Guardrail => "guardrail",
            Self::UnknownTarget => "unknown_target",
        }
    }
}

/// A target that was considered but not proposed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedTarget {
    /// Threshold key.
    pub target_param: String,
    /// Why.
    pub reason: SkipReason,
}

/// Result of [`ProposalEngine::scan`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanOutcome {
    /// Overall status.
    pub status: ScanStatus,
    /// Mode at scan time.
    pub mode: AutotuneMode,
    /// What started the scan.
    pub trigger: String,
    /// Scan-level skip reason, when nothing was considered.
    pub reason: Option<SkipReason>,
    /// Emitted proposals.
    pub proposals: Vec<Proposal>,
    /// Considered targets that were not proposed.
    pub skipped: Vec<SkippedTarget>,
    /// Signal events inside the lookback window.
    pub window_event_count: u64,
    /// Generator consulted for candidates, when the scan got that far.
    pub generator: Option<String>,
}

enum TargetDecision {
    Proposed(String),
    Skipped(SkipReason),
}

/// Emits bounded proposals from deviation signals.
pub struct ProposalEngine {
    ledger: Arc<Ledger>,
    generator: Arc<dyn CandidateGenerator>,
    llm_generator: Option<Arc<dyn CandidateGenerator>>,
    metrics: GuardianMetrics,
}

impl std::fmt::Debug for ProposalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProposalEngine")
            .field("generator", &self.generator.name())
            .field("llm_generator", &self.llm_generator.as_ref().map(|g| g.name().to_string()))
            .finish_non_exhaustive()
    }
}

impl ProposalEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(ledger: Arc<Ledger>, generator: Arc<dyn CandidateGenerator>) -> Self {
        Self {
            ledger,
            generator,
            llm_generator: None,
            metrics: GuardianMetrics::new(),
        }
    }

    /// Adds an LLM-backed generator, consulted instead of the default one
    /// while `llm_enabled` is set in the live configuration.
    #[must_use]
    pub fn with_llm_generator(mut self, generator: Option<Arc<dyn CandidateGenerator>>) -> Self {
        self.llm_generator = generator;
        self
    }

    /// Generator a scan under `config` should consult.
    #[must_use]
    pub fn generator_for(&self, config: &AutotuneConfig) -> &Arc<dyn CandidateGenerator> {
        match &self.llm_generator {
            Some(llm) if config.llm_enabled => llm,
            _ => &self.generator,
        }
    }

    /// Scans recent signals and emits proposals.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or appended to.
    #[tracing::instrument(skip(self, now))]
    pub async fn scan(&self, trigger: &str, now: DateTime<Utc>) -> Result<ScanOutcome> {
        let snapshot = self.ledger.snapshot().await?;
        let config = snapshot.state.config.clone();
        let mut outcome = ScanOutcome {
            status: ScanStatus::Skipped,
            mode: config.mode,
            trigger: trigger.to_string(),
            reason: None,
            proposals: Vec::new(),
            skipped: Vec::new(),
            window_event_count: 0,
            generator: None,
        };
        if !config.enabled {
            outcome.status = ScanStatus::Disabled;
            return Ok(outcome);
        }

        let since = now - Duration::days(i64::from(config.trigger.lookback_days));
        let events = ReplayCursor::new(Arc::clone(self.ledger.repository()), 1)
            .with_upper_bound(snapshot.version)
            .collect_all()
            .await?;
        let tallies = signals::aggregate(&events, since);
        outcome.window_event_count = tallies.values().map(|t| t.count).sum();

        if outcome.window_event_count < u64::from(config.trigger.min_event_count) {
            outcome.reason = Some(SkipReason::InsufficientEvents);
            self.metrics
                .record_scan_outcome(SkipReason::InsufficientEvents.as_label());
            return Ok(outcome);
        }

        let generator = Arc::clone(self.generator_for(&config));
        outcome.generator = Some(generator.name().to_string());

        for (target, tally) in &tallies {
            let Some(current) = snapshot.state.thresholds.get(target) else {
                self.skip(&mut outcome, target, SkipReason::UnknownTarget);
                continue;
            };
            let summary = SignalSummary {
                target_param: target.clone(),
                current_value: current,
                count: tally.count,
                magnitude: tally.magnitude,
                trigger_level: trigger_level(current, &config),
            };
            if summary.magnitude < summary.trigger_level {
                self.skip(&mut outcome, target, SkipReason::BelowTrigger);
                continue;
            }

            let written = self
                .ledger
                .append_with(|latest| plan_target(&latest.state, &summary, tally, &*generator, now))
                .await?;
            match written.value {
                TargetDecision::Proposed(id) => {
                    let Some(proposal) = written.snapshot.state.proposals.get(&id) else {
                        continue;
                    };
                    tracing::info!(
                        proposal_id = %id,
                        target_param = %target,
                        old_value = %proposal.old_value,
                        new_value = %proposal.new_value,
                        confidence = proposal.confidence,
                        generator = generator.name(),
                        "proposal emitted"
                    );
                    self.metrics.record_scan_outcome("proposed");
                    self.metrics.record_transition("none", "proposed");
                    outcome.proposals.push(proposal.clone());
                }
                TargetDecision::Skipped(reason) => self.skip(&mut outcome, target, reason),
            }
        }

        if !outcome.proposals.is_empty() {
            outcome.status = ScanStatus::Proposed;
        }
        Ok(outcome)
    }

    fn skip(&self, outcome: &mut ScanOutcome, target: &str, reason: SkipReason) {
        tracing::debug!(target_param = target, reason = reason.as_label(), "target skipped");
        self.metrics.record_scan_outcome(reason.as_label());
        outcome.skipped.push(SkippedTarget {
            target_param: target.to_string(),
            reason,
        });
    }
}

/// Magnitude at which a target triggers.
///
/// Integer thresholds are their own trigger (a skip threshold of 2 fires on
/// the second skip); float cutoffs use the minimum event count.
#[must_use]
pub fn trigger_level(current: ThresholdValue, config: &AutotuneConfig) -> f64 {
    match current {
        ThresholdValue::Int(_) => current.as_f64().max(1.0),
        ThresholdValue::Float(_) => f64::from(config.trigger.min_event_count.max(1)),
    }
}

fn plan_target(
    state: &DerivedState,
    summary: &SignalSummary,
    tally: &SignalTally,
    generator: &dyn CandidateGenerator,
    now: DateTime<Utc>,
) -> Result<Plan<TargetDecision>> {
    let config = &state.config;
    let target = summary.target_param.as_str();
    let skip = |reason| Ok(Plan::Skip(TargetDecision::Skipped(reason)));

    if state.open_proposal_for(target).is_some() {
        return skip(SkipReason::OpenProposal);
    }
    let cooldown = Duration::hours(i64::from(config.trigger.cooldown_hours));
    if state
        .latest_proposal_for(target)
        .is_some_and(|p| now - p.proposed_at < cooldown)
    {
        return skip(SkipReason::CooldownActive);
    }

    // Re-read the value: an apply may have landed since the scan started.
    let Some(current) = state.thresholds.get(target) else {
        return skip(SkipReason::UnknownTarget);
    };
    let Some(candidate) = generator.generate(&SignalSummary {
        current_value: current,
        ..summary.clone()
    }) else {
        return skip(SkipReason::NoCandidate);
    };
    if !candidate.confidence.is_finite() || candidate.confidence < config.guardrails.min_confidence
    {
        return skip(SkipReason::LowConfidence);
    }

    let limit = step_limit(current, config);
    if limit <= 0.0 || !candidate.delta.is_finite() {
        return skip(SkipReason::Guardrail);
    }
    let proposed = current.shifted(candidate.delta.clamp(-limit, limit));
    if proposed == current {
        return skip(SkipReason::NoChange);
    }

    let proposal_id = guardian_core::id::proposal_id();
    let event = AutotuneEvent::Proposed(ProposedPayload {
        proposal_id: proposal_id.clone(),
        target_param: target.to_string(),
        old_value: current,
        new_value: proposed,
        confidence: candidate.confidence,
        mode: config.mode,
        signal_count: tally.count,
        signal_magnitude: tally.magnitude,
        rationale: candidate.rationale,
        generator: generator.name().to_string(),
    })
    .to_new_event(ENGINE_ACTOR, now)?;
    Ok(Plan::Append(event, TargetDecision::Proposed(proposal_id)))
}

/// Largest permitted change for a target's kind.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn step_limit(current: ThresholdValue, config: &AutotuneConfig) -> f64 {
    match current {
        ThresholdValue::Int(_) => config.guardrails.max_int_step as f64,
        ThresholdValue::Float(_) => config.guardrails.max_float_step,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{FixedCandidateGenerator, HeuristicGenerator};
    use crate::projector::{Baseline, StateProjector};
    use crate::thresholds::{L2_PROTECTION_HIGH, REPEATED_SKIP};
    use guardian_core::event::types;
    use guardian_core::{EventRepository, MemoryRepository, NewEvent};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-12T09:00:00Z")
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default()
    }

    fn enabled() -> Baseline {
        let mut baseline = Baseline::default();
        baseline.config.enabled = true;
        baseline
    }

    async fn engine_with(
        baseline: Baseline,
        generator: Arc<dyn CandidateGenerator>,
        signals: &[(&str, serde_json::Value)],
    ) -> Result<ProposalEngine> {
        let repo: Arc<dyn EventRepository> = Arc::new(MemoryRepository::new());
        for (event_type, payload) in signals {
            repo.append(
                NewEvent::new(*event_type, "user", payload.clone(), now() - Duration::hours(1)),
                None,
            )
            .await?;
        }
        let ledger = Arc::new(Ledger::new(repo, StateProjector::new(baseline), 0)?);
        Ok(ProposalEngine::new(ledger, generator))
    }

    fn skips(n: usize) -> Vec<(&'static str, serde_json::Value)> {
        (0..n).map(|_| (types::SIGNAL_SKIP, json!({}))).collect()
    }

    #[tokio::test]
    async fn disabled_config_does_nothing() -> Result<()> {
        let engine =
            engine_with(Baseline::default(), Arc::new(HeuristicGenerator), &skips(6)).await?;
        let outcome = engine.scan("manual", now()).await?;
        assert_eq!(outcome.status, ScanStatus::Disabled);
        Ok(())
    }

    #[tokio::test]
    async fn heuristic_proposal_is_bounded_by_int_step() -> Result<()> {
        let engine = engine_with(enabled(), Arc::new(HeuristicGenerator), &skips(6)).await?;
        let outcome = engine.scan("manual", now()).await?;
        assert_eq!(outcome.status, ScanStatus::Proposed);
        assert_eq!(outcome.window_event_count, 6);
        let proposal = &outcome.proposals[0];
        assert_eq!(proposal.target_param, REPEATED_SKIP);
        assert_eq!(proposal.old_value, ThresholdValue::Int(2));
        assert_eq!(proposal.new_value, ThresholdValue::Int(3));
        Ok(())
    }

    #[tokio::test]
    async fn insufficient_events_skip_the_scan() -> Result<()> {
        let engine = engine_with(enabled(), Arc::new(HeuristicGenerator), &skips(3)).await?;
        let outcome = engine.scan("manual", now()).await?;
        assert_eq!(outcome.status, ScanStatus::Skipped);
        assert_eq!(outcome.reason, Some(SkipReason::InsufficientEvents));
        Ok(())
    }

    #[tokio::test]
    async fn llm_switch_selects_the_generator() -> Result<()> {
        let llm: Arc<dyn CandidateGenerator> = Arc::new(FixedCandidateGenerator::new(1.0, 0.9));

        let mut baseline = enabled();
        baseline.config.llm_enabled = true;
        let engine = engine_with(baseline, Arc::new(HeuristicGenerator), &skips(6))
            .await?
            .with_llm_generator(Some(Arc::clone(&llm)));
        let outcome = engine.scan("manual", now()).await?;
        assert_eq!(outcome.generator.as_deref(), Some("fixed"));
        assert_eq!(outcome.proposals.len(), 1);
        let recorded = engine.ledger.repository().read(1, None).await?;
        let proposed = recorded
            .iter()
            .find(|e| e.event_type == types::AUTOTUNE_PROPOSED)
            .map(|e| e.payload["generator"].clone());
        assert_eq!(proposed, Some(json!("fixed")));

        let mut baseline = enabled();
        baseline.config.llm_enabled = false;
        let engine = engine_with(baseline, Arc::new(HeuristicGenerator), &skips(6))
            .await?
            .with_llm_generator(Some(llm));
        let outcome = engine.scan("manual", now()).await?;
        assert_eq!(outcome.generator.as_deref(), Some("heuristic"));
        Ok(())
    }

    #[tokio::test]
    async fn llm_switch_without_llm_generator_uses_default() -> Result<()> {
        let mut baseline = enabled();
        baseline.config.llm_enabled = true;
        let engine = engine_with(baseline, Arc::new(HeuristicGenerator), &skips(6)).await?;
        let outcome = engine.scan("manual", now()).await?;
        assert_eq!(outcome.generator.as_deref(), Some("heuristic"));
        Ok(())
    }

    #[tokio::test]
    async fn low_confidence_emits_nothing() -> Result<()> {
        let mut baseline = enabled();
        baseline.config.guardrails.min_confidence = 0.6;
        let engine =
            engine_with(baseline, Arc::new(FixedCandidateGenerator::new(1.0, 0.4)), &skips(6))
                .await?;
        let outcome = engine.scan("manual", now()).await?;
        assert!(outcome.proposals.is_empty());
        assert_eq!(outcome.skipped[0].reason, SkipReason::LowConfidence);
        Ok(())
    }

    #[tokio::test]
    async fn float_delta_never_exceeds_max_float_step() -> Result<()> {
        let overrides: Vec<_> = (0..6).map(|_| (types::SIGNAL_L2_OVERRIDE, json!({}))).collect();
        let engine =
            engine_with(enabled(), Arc::new(FixedCandidateGenerator::new(-0.4, 0.9)), &overrides)
                .await?;
        let outcome = engine.scan("manual", now()).await?;
        let proposal = &outcome.proposals[0];
        assert_eq!(proposal.target_param, L2_PROTECTION_HIGH);
        assert_eq!(proposal.new_value, ThresholdValue::Float(0.7));
        assert!(proposal.new_value.distance(proposal.old_value) <= 0.05 + 1e-9);
        Ok(())
    }

    #[tokio::test]
    async fn zero_step_guardrail_blocks_proposal() -> Result<()> {
        let mut baseline = enabled();
        baseline.config.guardrails.max_int_step = 0;
        let engine = engine_with(baseline, Arc::new(HeuristicGenerator), &skips(6)).await?;
        let outcome = engine.scan("manual", now()).await?;
        assert_eq!(outcome.skipped[0].reason, SkipReason::Guardrail);
        Ok(())
    }

    #[tokio::test]
    async fn second_scan_inside_cooldown_emits_nothing() -> Result<()> {
        let engine = engine_with(enabled(), Arc::new(HeuristicGenerator), &skips(6)).await?;
        let first = engine.scan("cycle", now()).await?;
        let second = engine.scan("cycle", now() + Duration::hours(1)).await?;
        assert_eq!(first.proposals.len(), 1);
        assert!(second.proposals.is_empty());
        assert_eq!(second.skipped[0].reason, SkipReason::OpenProposal);
        Ok(())
    }
}
