//! Races between governance writers sharing one event log.

mod common;

use std::sync::Arc;

use guardian_autotune::prelude::*;
use guardian_autotune::thresholds::REPEATED_SKIP;
use guardian_autotune::{ActionOutcome, FixedTrustIndex};
use guardian_core::{EventRepository, MemoryRepository};

use common::{assist_baseline, hours, options_with, seed_proposal, t0};

async fn race_apply(
    left: Arc<Governance>,
    right: Arc<Governance>,
    req: ActionRequest,
) -> Vec<Result<ActionOutcome>> {
    let handles: Vec<_> = [left, right]
        .into_iter()
        .map(|governance| {
            let req = req.clone();
            tokio::spawn(async move { governance.lifecycle().apply(&req, hours(1)).await })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

fn assert_exactly_one_winner(results: &[Result<ActionOutcome>]) {
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(Error::ConcurrencyConflict { .. })))
        .count();
    assert_eq!(wins, 1, "exactly one apply should succeed: {results:?}");
    assert_eq!(conflicts, 1, "the loser should see a conflict: {results:?}");
}

/// Two tasks on one process race to apply with the same fingerprint.
#[tokio::test]
async fn test_same_process_apply_race_has_one_winner() {
    let governance = Arc::new(common::assist_governance(Some(0.6)));
    let proposal = seed_proposal(
        &governance,
        REPEATED_SKIP,
        ThresholdValue::Int(2),
        ThresholdValue::Int(3),
        t0(),
    )
    .await;
    let req = common::request(&governance, &proposal.proposal_id).await;

    let results = race_apply(Arc::clone(&governance), Arc::clone(&governance), req).await;

    assert_exactly_one_winner(&results);
    let applied = governance.ledger().snapshot().await.unwrap();
    let applies = applied
        .state
        .lifecycle
        .iter()
        .filter(|e| e.to_status == ProposalStatus::Applied)
        .count();
    assert_eq!(applies, 1);
}

/// Two independent ledgers over one repository race through the
/// optimistic tail check; the loser re-validates and sees the conflict.
#[tokio::test]
async fn test_independent_ledgers_apply_race_has_one_winner() {
    let repo: Arc<dyn EventRepository> = Arc::new(MemoryRepository::new());
    let open = || {
        Governance::open(
            Arc::clone(&repo),
            options_with(assist_baseline(), Arc::new(FixedTrustIndex(Some(0.6)))),
        )
    };
    let left = Arc::new(open().await.unwrap());
    let right = Arc::new(open().await.unwrap());

    let proposal = seed_proposal(
        &left,
        REPEATED_SKIP,
        ThresholdValue::Int(2),
        ThresholdValue::Int(3),
        t0(),
    )
    .await;
    let req = common::request(&right, &proposal.proposal_id).await;

    let results = race_apply(Arc::clone(&left), Arc::clone(&right), req).await;

    assert_exactly_one_winner(&results);
    assert_eq!(repo.tail().await.unwrap(), 2);
    assert_eq!(
        common::threshold(&right, REPEATED_SKIP).await,
        Some(ThresholdValue::Int(3))
    );
}

/// Reject and apply racing on the same fingerprint never both land.
#[tokio::test]
async fn test_reject_and_apply_race_is_exclusive() {
    let governance = Arc::new(common::assist_governance(Some(0.6)));
    let proposal = seed_proposal(
        &governance,
        REPEATED_SKIP,
        ThresholdValue::Int(2),
        ThresholdValue::Int(3),
        t0(),
    )
    .await;
    let req = common::request(&governance, &proposal.proposal_id).await;

    let reject = {
        let governance = Arc::clone(&governance);
        let req = req.clone();
        tokio::spawn(async move { governance.lifecycle().reject(&req, hours(1)).await })
    };
    let apply = {
        let governance = Arc::clone(&governance);
        tokio::spawn(async move { governance.lifecycle().apply(&req, hours(1)).await })
    };
    let results = vec![reject.await.unwrap(), apply.await.unwrap()];

    assert_exactly_one_winner(&results);
    let status = common::current(&governance, &proposal.proposal_id).await.status;
    let value = common::threshold(&governance, REPEATED_SKIP).await;
    match status {
        ProposalStatus::Applied => assert_eq!(value, Some(ThresholdValue::Int(3))),
        ProposalStatus::Rejected => assert_eq!(value, Some(ThresholdValue::Int(2))),
        other => panic!("unexpected status {other}"),
    }
}
