//! Wiring of the governance components over one event repository.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use guardian_core::{Event, EventRepository, MemoryRepository, NewEvent};

use crate::candidate::{CandidateGenerator, HeuristicGenerator};
use crate::config::{AutotuneConfig, AutotuneConfigPatch};
use crate::engine::{ProposalEngine, ScanOutcome};
use crate::error::{Error, Result};
use crate::events::{AutotuneEvent, ConfigUpdatedPayload};
use crate::history::AuditHistory;
use crate::ledger::{DEFAULT_SNAPSHOT_INTERVAL, Ledger, Plan};
use crate::lifecycle::LifecycleManager;
use crate::projector::{Baseline, StateProjector};
use crate::proposal::EvaluationRun;
use crate::scheduler::EvaluationScheduler;
use crate::trust::{ProjectedTrustIndex, TrustIndexSource};
use crate::validator::ConsistencyValidator;

/// Trigger label for cycle-driven work.
pub const CYCLE_TRIGGER: &str = "cycle";

/// Construction options.
#[derive(Clone)]
pub struct GovernanceOptions {
    /// Settings and thresholds in force before any event.
    pub baseline: Baseline,
    /// Events between persisted snapshots; 0 disables.
    pub snapshot_interval: u64,
    /// Candidate source for the proposal engine.
    pub generator: Arc<dyn CandidateGenerator>,
    /// LLM-backed candidate source, used instead of `generator` while the
    /// live configuration has `llm_enabled` set.
    pub llm_generator: Option<Arc<dyn CandidateGenerator>>,
    /// Trust index source for apply, evaluate and audit.
    pub trust: Arc<dyn TrustIndexSource>,
}

impl Default for GovernanceOptions {
    fn default() -> Self {
        Self {
            baseline: Baseline::default(),
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            generator: Arc::new(HeuristicGenerator),
            llm_generator: None,
            trust: Arc::new(ProjectedTrustIndex),
        }
    }
}

impl std::fmt::Debug for GovernanceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceOptions")
            .field("baseline", &self.baseline)
            .field("snapshot_interval", &self.snapshot_interval)
            .field("generator", &self.generator.name())
            .field("llm_generator", &self.llm_generator.as_ref().map(|g| g.name().to_string()))
            .finish_non_exhaustive()
    }
}

/// One system cycle: a proposal scan followed by a scheduler tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    /// Proposal scan result.
    pub scan: ScanOutcome,
    /// Scheduler tick result.
    pub evaluation: EvaluationRun,
}

/// All governance components sharing one ledger.
#[derive(Debug)]
pub struct Governance {
    ledger: Arc<Ledger>,
    engine: ProposalEngine,
    lifecycle: Arc<LifecycleManager>,
    scheduler: EvaluationScheduler,
    history: AuditHistory,
    validator: ConsistencyValidator,
}

impl Governance {
    /// Opens governance over `repo`, resuming from its snapshot if valid.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be replayed.
    pub async fn open(repo: Arc<dyn EventRepository>, options: GovernanceOptions) -> Result<Self> {
        let ledger = Ledger::open(
            repo,
            StateProjector::new(options.baseline.clone()),
            options.snapshot_interval,
        )
        .await?;
        Ok(Self::assemble(Arc::new(ledger), &options))
    }

    /// Governance over a fresh in-memory log.
    ///
    /// # Errors
    ///
    /// Returns an error if the baseline cannot be hashed.
    pub fn in_memory(options: GovernanceOptions) -> Result<Self> {
        let repo: Arc<dyn EventRepository> = Arc::new(MemoryRepository::new());
        let ledger = Ledger::new(
            repo,
            StateProjector::new(options.baseline.clone()),
            options.snapshot_interval,
        )?;
        Ok(Self::assemble(Arc::new(ledger), &options))
    }

    fn assemble(ledger: Arc<Ledger>, options: &GovernanceOptions) -> Self {
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&ledger),
            Arc::clone(&options.trust),
        ));
        Self {
            engine: ProposalEngine::new(Arc::clone(&ledger), Arc::clone(&options.generator))
                .with_llm_generator(options.llm_generator.clone()),
            scheduler: EvaluationScheduler::new(Arc::clone(&ledger), Arc::clone(&lifecycle)),
            history: AuditHistory::new(Arc::clone(&ledger), Arc::clone(&options.trust)),
            validator: ConsistencyValidator::new(Arc::clone(&ledger)),
            lifecycle,
            ledger,
        }
    }

    /// Shared ledger.
    #[must_use]
    pub const fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Proposal engine.
    #[must_use]
    pub const fn engine(&self) -> &ProposalEngine {
        &self.engine
    }

    /// Lifecycle manager.
    #[must_use]
    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Evaluation scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &EvaluationScheduler {
        &self.scheduler
    }

    /// Audit queries.
    #[must_use]
    pub const fn history(&self) -> &AuditHistory {
        &self.history
    }

    /// Consistency validator.
    #[must_use]
    pub const fn validator(&self) -> &ConsistencyValidator {
        &self.validator
    }

    /// Settings currently in force.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub async fn config(&self) -> Result<AutotuneConfig> {
        Ok(self.ledger.snapshot().await?.state.config)
    }

    /// Merges `patch` into the live settings and records the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the merged settings are out of
    /// bounds; nothing is appended in that case.
    #[tracing::instrument(skip(self, patch, now))]
    pub async fn update_config(
        &self,
        patch: &AutotuneConfigPatch,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<AutotuneConfig> {
        let written = self
            .ledger
            .append_with(|snapshot| {
                let next = snapshot.state.config.merged(patch);
                next.validate()?;
                let event = AutotuneEvent::ConfigUpdated(ConfigUpdatedPayload {
                    config: next.clone(),
                })
                .to_new_event(actor, now)?;
                Ok(Plan::Append(event, next))
            })
            .await?;
        tracing::info!(
            enabled = written.value.enabled,
            mode = written.value.mode.as_label(),
            "autotune config updated"
        );
        Ok(written.value)
    }

    /// Appends an observation event (signals, trust samples).
    ///
    /// Governance event types are refused; those are only written by the
    /// lifecycle components.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for `autotune.*` types, or the
    /// repository error if the append fails.
    pub async fn ingest(&self, event: NewEvent) -> Result<Event> {
        if event.event_type.starts_with("autotune.") {
            return Err(Error::Core(guardian_core::Error::InvalidInput(format!(
                "event type {} is reserved for governance",
                event.event_type
            ))));
        }
        self.ledger.record(event).await
    }

    /// Runs a proposal scan and then a scheduler tick.
    ///
    /// # Errors
    ///
    /// Returns an error if either step cannot read or append to the log.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let scan = self.engine.scan(CYCLE_TRIGGER, now).await?;
        let evaluation = self.scheduler.tick(CYCLE_TRIGGER, now).await?;
        Ok(CycleReport { scan, evaluation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutotuneMode;
    use guardian_core::event::types;

    #[tokio::test]
    async fn config_patch_is_validated_then_recorded() -> Result<()> {
        let governance = Governance::in_memory(GovernanceOptions::default())?;
        let now = Utc::now();

        let bad = AutotuneConfigPatch {
            auto_evaluate: Some(crate::config::AutoEvaluatePatch {
                horizon_hours: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = governance.update_config(&bad, "ops", now).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
        assert_eq!(governance.ledger().snapshot().await?.version, 0);

        let patch = AutotuneConfigPatch {
            enabled: Some(true),
            mode: Some(AutotuneMode::Assist),
            ..Default::default()
        };
        let config = governance.update_config(&patch, "ops", now).await?;
        assert!(config.enabled);
        assert_eq!(governance.config().await?.mode, AutotuneMode::Assist);
        assert_eq!(governance.ledger().snapshot().await?.version, 1);
        Ok(())
    }

    #[tokio::test]
    async fn config_patch_toggles_llm_generator() -> Result<()> {
        let mut baseline = Baseline::default();
        baseline.config.enabled = true;
        let options = GovernanceOptions {
            baseline,
            snapshot_interval: 0,
            llm_generator: Some(Arc::new(crate::candidate::FixedCandidateGenerator::new(1.0, 0.9))),
            ..GovernanceOptions::default()
        };
        let governance = Governance::in_memory(options)?;
        let now = Utc::now();
        for _ in 0..6 {
            governance
                .ingest(NewEvent::new(types::SIGNAL_SKIP, "user", serde_json::json!({}), now))
                .await?;
        }

        let scan = governance.engine().scan("manual", now).await?;
        assert_eq!(scan.generator.as_deref(), Some("fixed"));

        let off = AutotuneConfigPatch {
            llm_enabled: Some(false),
            ..Default::default()
        };
        governance.update_config(&off, "ops", now).await?;
        let scan = governance.engine().scan("manual", now).await?;
        assert_eq!(scan.generator.as_deref(), Some("heuristic"));
        Ok(())
    }

    #[tokio::test]
    async fn governance_events_cannot_be_ingested() -> Result<()> {
        let governance = Governance::in_memory(GovernanceOptions::default())?;
        let forged = NewEvent::new(
            types::AUTOTUNE_APPLIED,
            "intruder",
            serde_json::json!({}),
            Utc::now(),
        );
        assert!(governance.ingest(forged).await.is_err());
        Ok(())
    }
}
