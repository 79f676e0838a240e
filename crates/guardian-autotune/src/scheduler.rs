//! Periodic settlement of applied proposals.
//!
//! One tick evaluates applied proposals whose horizon has elapsed, oldest
//! first, capped at `auto_evaluate.max_targets_per_cycle`. Each target is
//! evaluated on its own: a failure lands in the run's `errors` and the
//! batch continues. Ticks that did work are appended as
//! `autotune.evaluation_run`; idle, disabled and skipped ticks are only
//! returned.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::AutotuneMode;
use crate::error::Result;
use crate::events::AutotuneEvent;
use crate::ledger::Ledger;
use crate::lifecycle::{ActionRequest, ActionStatus, LifecycleManager};
use crate::metrics::{GuardianMetrics, time_scheduler_tick};
use crate::proposal::{
    EvaluationError, EvaluationRun, EvaluationTarget, Proposal, ProposalStatus, RunStatus,
};
use crate::projector::DerivedState;

/// Actor recorded on scheduler evaluations.
pub const SCHEDULER_ACTOR: &str = "guardian-scheduler";

/// Source label on scheduler evaluations.
pub const SCHEDULER_SOURCE: &str = "scheduler";

/// Evaluates due proposals in bounded batches.
#[derive(Debug)]
pub struct EvaluationScheduler {
    ledger: Arc<Ledger>,
    lifecycle: Arc<LifecycleManager>,
    metrics: GuardianMetrics,
}

impl EvaluationScheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(ledger: Arc<Ledger>, lifecycle: Arc<LifecycleManager>) -> Self {
        Self {
            ledger,
            lifecycle,
            metrics: GuardianMetrics::new(),
        }
    }

    /// Runs one tick.
    ///
    /// # Errors
    ///
    /// Returns an error only if the log cannot be read or the run summary
    /// cannot be appended; per-target failures are recorded in the run.
    #[tracing::instrument(skip(self, now))]
    pub async fn tick(&self, trigger: &str, now: DateTime<Utc>) -> Result<EvaluationRun> {
        let _timer = time_scheduler_tick();
        let snapshot = self.ledger.snapshot().await?;
        let config = &snapshot.state.config;
        let mut run = EvaluationRun {
            run_id: guardian_core::id::evaluation_run_id(),
            status: RunStatus::Idle,
            trigger: trigger.to_string(),
            started_at: now,
            evaluated_count: 0,
            target_count: 0,
            error_count: 0,
            targets: Vec::new(),
            errors: Vec::new(),
            reason: None,
        };

        if !config.enabled || !config.auto_evaluate.enabled {
            run.status = RunStatus::Disabled;
            run.reason = Some(if config.enabled {
                "auto_evaluate_disabled".into()
            } else {
                "autotune_disabled".into()
            });
            return Ok(self.finish(run));
        }
        if config.mode != AutotuneMode::Assist {
            run.status = RunStatus::Skipped;
            run.reason = Some("mode_not_assist".into());
            return Ok(self.finish(run));
        }

        let due = due_targets(&snapshot.state, now);
        if due.is_empty() {
            return Ok(self.finish(run));
        }

        for proposal_id in due {
            run.target_count += 1;
            // Another writer may have moved the proposal since the batch was chosen.
            let fingerprint = self
                .ledger
                .snapshot()
                .await?
                .state
                .proposals
                .get(&proposal_id)
                .map(|p| p.fingerprint.clone())
                .unwrap_or_default();
            let request = ActionRequest::new(&proposal_id, fingerprint, SCHEDULER_ACTOR)
                .with_source(SCHEDULER_SOURCE);

            match self.lifecycle.evaluate(&request, now).await {
                Ok(outcome) if outcome.status == ActionStatus::Evaluated => {
                    run.evaluated_count += 1;
                    run.targets.push(EvaluationTarget {
                        proposal_id,
                        target_param: outcome.proposal.target_param,
                        verdict: outcome
                            .proposal
                            .verdict
                            .unwrap_or(crate::proposal::Verdict::Neutral),
                        trust_delta: outcome.proposal.trust_delta_48h,
                        status: outcome.proposal.status,
                    });
                }
                Ok(outcome) => {
                    run.error_count += 1;
                    run.errors.push(EvaluationError {
                        proposal_id,
                        code: "EVALUATION_PENDING".into(),
                        message: format!(
                            "evaluation not yet due (proposal is {})",
                            outcome.proposal.status
                        ),
                    });
                }
                Err(e) => {
                    tracing::warn!(proposal_id = %proposal_id, code = e.code(), error = %e, "evaluation failed");
                    run.error_count += 1;
                    run.errors.push(EvaluationError {
                        proposal_id,
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        run.status = match (run.evaluated_count, run.error_count) {
            (_, 0) => RunStatus::Completed,
            (0, _) => RunStatus::Failed,
            _ => RunStatus::Partial,
        };
        let event = AutotuneEvent::EvaluationRun(run.clone()).to_new_event(SCHEDULER_ACTOR, now)?;
        self.ledger.record(event).await?;
        Ok(self.finish(run))
    }

    fn finish(&self, run: EvaluationRun) -> EvaluationRun {
        self.metrics.record_evaluation_run(run.status.as_label());
        tracing::info!(
            run_id = %run.run_id,
            status = run.status.as_label(),
            evaluated = run.evaluated_count,
            errors = run.error_count,
            "evaluation tick finished"
        );
        run
    }
}

/// Applied proposals due for evaluation, oldest first, capped per cycle.
#[must_use]
pub fn due_targets(state: &DerivedState, now: DateTime<Utc>) -> Vec<String> {
    let settings = &state.config.auto_evaluate;
    let horizon = Duration::hours(i64::from(settings.horizon_hours));
    let oldest = now - Duration::days(i64::from(settings.lookback_days));

    let mut due: Vec<&Proposal> = state
        .proposals
        .values()
        .filter(|p| p.status == ProposalStatus::Applied)
        .filter(|p| {
            p.applied_at
                .is_some_and(|at| at >= oldest && at + horizon <= now)
        })
        .collect();
    due.sort_by(|a, b| {
        a.applied_at
            .cmp(&b.applied_at)
            .then_with(|| a.proposal_id.cmp(&b.proposal_id))
    });
    due.into_iter()
        .take(usize::try_from(settings.max_targets_per_cycle).unwrap_or(usize::MAX))
        .map(|p| p.proposal_id.clone())
        .collect()
}
