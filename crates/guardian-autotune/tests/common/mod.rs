//! Shared fixtures for governance integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use guardian_autotune::candidate::FixedCandidateGenerator;
use guardian_autotune::events::{AutotuneEvent, ProposedPayload};
use guardian_autotune::prelude::*;
use guardian_autotune::trust::TrustIndexSource;
use guardian_autotune::{Baseline, FixedTrustIndex};
use guardian_core::event::types;
use guardian_core::{EventRepository, NewEvent};
use serde_json::json;

/// Fixed reference instant for deterministic scenarios.
pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-02-12T09:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn hours(n: i64) -> DateTime<Utc> {
    t0() + Duration::hours(n)
}

/// Enabled, assist-mode baseline with default thresholds.
pub fn assist_baseline() -> Baseline {
    let mut baseline = Baseline::default();
    baseline.config.enabled = true;
    baseline.config.mode = AutotuneMode::Assist;
    baseline
}

pub fn options_with(baseline: Baseline, trust: Arc<dyn TrustIndexSource>) -> GovernanceOptions {
    GovernanceOptions {
        baseline,
        snapshot_interval: 0,
        generator: Arc::new(FixedCandidateGenerator::silent()),
        llm_generator: None,
        trust,
    }
}

/// In-memory assist-mode governance with a constant trust index.
pub fn assist_governance(trust: Option<f64>) -> Governance {
    Governance::in_memory(options_with(assist_baseline(), Arc::new(FixedTrustIndex(trust)))).unwrap()
}

/// Records a proposal directly, bypassing the engine.
pub async fn seed_proposal(
    governance: &Governance,
    target: &str,
    old_value: ThresholdValue,
    new_value: ThresholdValue,
    at: DateTime<Utc>,
) -> Proposal {
    let proposal_id = guardian_core::id::proposal_id();
    let mode = governance.config().await.unwrap().mode;
    let event = AutotuneEvent::Proposed(ProposedPayload {
        proposal_id: proposal_id.clone(),
        target_param: target.to_string(),
        old_value,
        new_value,
        confidence: 0.8,
        mode,
        signal_count: 6,
        signal_magnitude: 6.0,
        rationale: "seeded".into(),
        generator: "fixture".into(),
    })
    .to_new_event("guardian-autotune", at)
    .unwrap();
    governance.ledger().record(event).await.unwrap();
    current(governance, &proposal_id).await
}

/// Latest projected view of a proposal.
pub async fn current(governance: &Governance, proposal_id: &str) -> Proposal {
    governance.ledger().snapshot().await.unwrap().state.proposals[proposal_id].clone()
}

/// Request carrying the proposal's current fingerprint.
pub async fn request(governance: &Governance, proposal_id: &str) -> ActionRequest {
    let proposal = current(governance, proposal_id).await;
    ActionRequest::new(proposal_id, proposal.fingerprint, "ops@example.com")
}

pub async fn threshold(governance: &Governance, target: &str) -> Option<ThresholdValue> {
    governance.ledger().snapshot().await.unwrap().state.thresholds.get(target)
}

/// Appends `n` skip signals directly to a repository.
pub async fn append_skips(repo: &Arc<dyn EventRepository>, n: usize, at: DateTime<Utc>) {
    for _ in 0..n {
        repo.append(NewEvent::new(types::SIGNAL_SKIP, "user", json!({}), at), None)
            .await
            .unwrap();
    }
}
