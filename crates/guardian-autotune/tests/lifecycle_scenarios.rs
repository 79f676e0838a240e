//! End-to-end lifecycle scenarios against in-memory and file-backed logs.

mod common;

use std::sync::Arc;

use guardian_autotune::candidate::FixedCandidateGenerator;
use guardian_autotune::engine::{ScanStatus, SkipReason};
use guardian_autotune::prelude::*;
use guardian_autotune::thresholds::{L2_PROTECTION_HIGH, REPEATED_SKIP};
use guardian_autotune::{Baseline, FixedTrustIndex, StateProjector};
use guardian_core::event::types;
use guardian_core::{EventRepository, FileRepository, MemoryRepository, NewEvent, ReplayCursor};
use serde_json::json;

use common::{assist_baseline, assist_governance, hours, request, seed_proposal, t0, threshold};

/// Three skips replay to a tally of three, identically on a second replay.
#[tokio::test]
async fn test_three_skips_replay_deterministically() {
    let repo: Arc<dyn EventRepository> = Arc::new(MemoryRepository::new());
    for _ in 0..3 {
        repo.append(
            NewEvent::new(
                types::SIGNAL_SKIP,
                "user",
                json!({ "target_param": REPEATED_SKIP }),
                t0(),
            ),
            None,
        )
        .await
        .unwrap();
    }

    let events = ReplayCursor::new(Arc::clone(&repo), 1).collect_all().await.unwrap();
    let first = StateProjector::default().project(&events).unwrap();
    let second = StateProjector::default().project(&events).unwrap();

    assert_eq!(first.state.signals[REPEATED_SKIP].count, 3);
    assert_eq!(first.version, 3);
    assert_eq!(first.checksum, second.checksum);
}

/// A candidate below `min_confidence` never becomes a proposal.
#[tokio::test]
async fn test_low_confidence_candidate_is_not_emitted() {
    let mut baseline = assist_baseline();
    baseline.config.guardrails.min_confidence = 0.6;
    let repo: Arc<dyn EventRepository> = Arc::new(MemoryRepository::new());
    common::append_skips(&repo, 6, hours(-1)).await;

    let options = GovernanceOptions {
        generator: Arc::new(FixedCandidateGenerator::new(1.0, 0.4)),
        ..common::options_with(baseline, Arc::new(FixedTrustIndex(None)))
    };
    let governance = Governance::open(repo, options).await.unwrap();
    let scan = governance.engine().scan("manual", t0()).await.unwrap();

    assert!(scan.proposals.is_empty());
    assert!(governance.ledger().snapshot().await.unwrap().state.proposals.is_empty());
}

/// Shadow mode refuses every governance action.
#[tokio::test]
async fn test_apply_in_shadow_mode_is_refused() {
    let mut baseline = assist_baseline();
    baseline.config.mode = AutotuneMode::Shadow;
    let governance = Governance::in_memory(common::options_with(
        baseline,
        Arc::new(FixedTrustIndex(Some(0.7))),
    ))
    .unwrap();
    let proposal = seed_proposal(
        &governance,
        REPEATED_SKIP,
        ThresholdValue::Int(2),
        ThresholdValue::Int(3),
        t0(),
    )
    .await;

    for action in LifecycleAction::ALL {
        let req = request(&governance, &proposal.proposal_id).await;
        let err = governance.lifecycle().execute(action, &req, t0()).await.unwrap_err();
        assert_eq!(err.code(), "MODE_NOT_ASSIST", "{action} should be refused");
    }
    assert_eq!(threshold(&governance, REPEATED_SKIP).await, Some(ThresholdValue::Int(2)));
}

/// Apply, early evaluate (pending), forced evaluate, then exact rollback.
#[tokio::test]
async fn test_apply_evaluate_rollback_walkthrough() {
    let governance = assist_governance(Some(0.72));
    let proposal = seed_proposal(
        &governance,
        REPEATED_SKIP,
        ThresholdValue::Int(2),
        ThresholdValue::Int(3),
        t0(),
    )
    .await;
    let id = proposal.proposal_id.as_str();

    let applied = governance
        .lifecycle()
        .apply(&request(&governance, id).await, hours(1))
        .await
        .unwrap();
    assert_eq!(applied.status, ActionStatus::Applied);
    assert_eq!(applied.proposal.trust_index_before, Some(0.72));
    assert_eq!(threshold(&governance, REPEATED_SKIP).await, Some(ThresholdValue::Int(3)));

    let pending = governance
        .lifecycle()
        .evaluate(&request(&governance, id).await, hours(2))
        .await
        .unwrap();
    assert_eq!(pending.status, ActionStatus::Pending);
    assert_eq!(pending.proposal.status, ProposalStatus::Applied);

    let evaluated = governance
        .lifecycle()
        .evaluate(&request(&governance, id).await.forced(true), hours(2))
        .await
        .unwrap();
    assert_eq!(evaluated.status, ActionStatus::Evaluated);
    assert_eq!(evaluated.proposal.trust_index_after_48h, Some(0.72));
    assert_eq!(evaluated.proposal.verdict, Some(Verdict::Neutral));

    let rolled_back = governance
        .lifecycle()
        .rollback(&request(&governance, id).await, hours(3))
        .await
        .unwrap();
    assert_eq!(rolled_back.status, ActionStatus::RolledBack);
    assert!(rolled_back.proposal.rolled_back_after_evaluation);
    assert_eq!(rolled_back.proposal.verdict, Some(Verdict::Neutral));
    assert_eq!(threshold(&governance, REPEATED_SKIP).await, Some(ThresholdValue::Int(2)));
}

/// A fingerprint captured before a transition is stale afterwards.
#[tokio::test]
async fn test_second_apply_with_stale_fingerprint_conflicts() {
    let governance = assist_governance(Some(0.6));
    let proposal = seed_proposal(
        &governance,
        REPEATED_SKIP,
        ThresholdValue::Int(2),
        ThresholdValue::Int(3),
        t0(),
    )
    .await;
    let stale = request(&governance, &proposal.proposal_id).await;

    governance.lifecycle().apply(&stale, hours(1)).await.unwrap();
    let err = governance.lifecycle().apply(&stale, hours(1)).await.unwrap_err();

    assert!(matches!(err, Error::ConcurrencyConflict { .. }));
    assert_eq!(threshold(&governance, REPEATED_SKIP).await, Some(ThresholdValue::Int(3)));
}

/// Every (status, action) pair outside the graph is an invalid transition.
#[tokio::test]
async fn test_transition_graph_is_enforced_exhaustively() {
    for status in ProposalStatus::ALL {
        for action in LifecycleAction::ALL {
            let governance = assist_governance(Some(0.6));
            let proposal = seed_proposal(
                &governance,
                REPEATED_SKIP,
                ThresholdValue::Int(2),
                ThresholdValue::Int(3),
                t0(),
            )
            .await;
            let id = proposal.proposal_id.as_str();
            drive_to(&governance, id, status).await;

            let req = request(&governance, id).await.forced(true);
            let result = governance.lifecycle().execute(action, &req, hours(5)).await;
            if status.can_transition_to(action.target_status()) {
                let outcome = result.unwrap_or_else(|e| panic!("{status} + {action}: {e}"));
                assert_eq!(outcome.proposal.status, action.target_status());
            } else {
                let err = result.expect_err("illegal transition accepted");
                assert!(
                    matches!(err, Error::InvalidTransition { from, .. } if from == status),
                    "{status} + {action} gave {err}"
                );
            }
        }
    }
}

async fn drive_to(governance: &Governance, id: &str, status: ProposalStatus) {
    let path: &[LifecycleAction] = match status {
        ProposalStatus::Proposed => &[],
        ProposalStatus::Reviewed => &[LifecycleAction::Review],
        ProposalStatus::Applied => &[LifecycleAction::Apply],
        ProposalStatus::Rejected => &[LifecycleAction::Reject],
        ProposalStatus::Evaluated => &[LifecycleAction::Apply, LifecycleAction::Evaluate],
        ProposalStatus::RolledBack => &[LifecycleAction::Apply, LifecycleAction::Rollback],
    };
    for action in path {
        let req = request(governance, id).await.forced(true);
        governance.lifecycle().execute(*action, &req, hours(1)).await.unwrap();
    }
    assert_eq!(common::current(governance, id).await.status, status);
}

/// A rejected proposal still starts the cooldown for its target.
#[tokio::test]
async fn test_cooldown_blocks_second_proposal_after_reject() {
    let repo: Arc<dyn EventRepository> = Arc::new(MemoryRepository::new());
    common::append_skips(&repo, 6, hours(-1)).await;
    let options = GovernanceOptions {
        generator: Arc::new(FixedCandidateGenerator::new(1.0, 0.9)),
        ..common::options_with(assist_baseline(), Arc::new(FixedTrustIndex(None)))
    };
    let governance = Governance::open(repo, options).await.unwrap();

    let first = governance.engine().scan("manual", t0()).await.unwrap();
    assert_eq!(first.status, ScanStatus::Proposed);
    let id = first.proposals[0].proposal_id.clone();
    governance
        .lifecycle()
        .reject(&request(&governance, &id).await.with_reason("not now"), hours(1))
        .await
        .unwrap();

    let second = governance.engine().scan("manual", hours(2)).await.unwrap();
    assert!(second.proposals.is_empty());
    assert!(
        second
            .skipped
            .iter()
            .any(|s| s.target_param == REPEATED_SKIP && s.reason == SkipReason::CooldownActive)
    );

    let later = governance.engine().scan("manual", hours(25)).await;
    // Lookback is seven days, so the original skips still count.
    assert_eq!(later.unwrap().status, ScanStatus::Proposed);
}

/// Rollback restores the float value bit-for-bit, and so does a cold replay.
#[tokio::test]
async fn test_rollback_is_exact_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let options =
        || common::options_with(assist_baseline(), Arc::new(FixedTrustIndex(Some(0.8))));
    let before = {
        let repo: Arc<dyn EventRepository> =
            Arc::new(FileRepository::open(dir.path()).await.unwrap());
        let governance = Governance::open(repo, options()).await.unwrap();
        let before = threshold(&governance, L2_PROTECTION_HIGH).await.unwrap();
        let proposal = seed_proposal(
            &governance,
            L2_PROTECTION_HIGH,
            before,
            before.shifted(-0.05),
            t0(),
        )
        .await;
        let id = proposal.proposal_id.as_str();

        governance
            .lifecycle()
            .apply(&request(&governance, id).await, hours(1))
            .await
            .unwrap();
        assert_ne!(threshold(&governance, L2_PROTECTION_HIGH).await, Some(before));
        governance
            .lifecycle()
            .rollback(&request(&governance, id).await.with_reason("operator"), hours(2))
            .await
            .unwrap();
        before
    };

    let repo: Arc<dyn EventRepository> = Arc::new(FileRepository::open(dir.path()).await.unwrap());
    let events = ReplayCursor::new(Arc::clone(&repo), 1).collect_all().await.unwrap();
    let replayed = StateProjector::new(assist_baseline()).project(&events).unwrap();
    let restored = replayed.state.thresholds.get(L2_PROTECTION_HIGH).unwrap();

    assert_eq!(restored.as_f64().to_bits(), before.as_f64().to_bits());
    assert_eq!(events.last().unwrap().event_type, types::AUTOTUNE_ROLLED_BACK);

    let reopened = Governance::open(repo, options()).await.unwrap();
    assert_eq!(threshold(&reopened, L2_PROTECTION_HIGH).await, Some(before));
}

/// Out-of-bounds proposals are refused at apply even if they were recorded.
#[tokio::test]
async fn test_apply_rechecks_float_guardrail() {
    let governance = assist_governance(Some(0.6));
    let proposal = seed_proposal(
        &governance,
        L2_PROTECTION_HIGH,
        ThresholdValue::Float(0.75),
        ThresholdValue::Float(0.55),
        t0(),
    )
    .await;

    let err = governance
        .lifecycle()
        .apply(&request(&governance, &proposal.proposal_id).await, hours(1))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "GUARDRAIL_VIOLATION");
    assert_eq!(
        threshold(&governance, L2_PROTECTION_HIGH).await,
        Some(ThresholdValue::Float(0.75))
    );
}

/// Restarting under a different baseline replays the log instead of
/// resuming a snapshot folded from the old one.
#[tokio::test]
async fn test_restart_with_new_baseline_ignores_stale_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    {
        let repo: Arc<dyn EventRepository> =
            Arc::new(FileRepository::open(dir.path()).await.unwrap());
        let options = GovernanceOptions {
            snapshot_interval: 1,
            ..common::options_with(Baseline::default(), Arc::new(FixedTrustIndex(None)))
        };
        let governance = Governance::open(Arc::clone(&repo), options).await.unwrap();
        governance
            .ingest(NewEvent::new(types::SIGNAL_SKIP, "user", json!({}), t0()))
            .await
            .unwrap();
        assert!(repo.load_snapshot().await.unwrap().is_some());
    }

    let repo: Arc<dyn EventRepository> = Arc::new(FileRepository::open(dir.path()).await.unwrap());
    let options = common::options_with(assist_baseline(), Arc::new(FixedTrustIndex(None)));
    let reopened = Governance::open(repo, options).await.unwrap();

    assert_eq!(reopened.config().await.unwrap().mode, AutotuneMode::Assist);
    assert!(reopened.validator().validate().await.unwrap().is_ok());
}
