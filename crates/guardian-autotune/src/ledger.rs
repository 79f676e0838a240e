//! Live projection cache over an event repository.
//!
//! The ledger owns the only mutable copy of derived state in the process,
//! and it is strictly a cache: every read catches up with the log first,
//! and every write goes to the log before the cache is folded forward.
//!
//! Writes are optimistic. A caller supplies a closure that inspects the
//! freshly caught-up snapshot and decides what to append; the append is
//! pinned to the snapshot's version as the expected tail. If another
//! writer sharing the repository got there first, the ledger catches up
//! and runs the closure again, so validation always sees the latest state.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use guardian_core::{Event, EventRepository, NewEvent, ReplayCursor};

use crate::error::Result;
use crate::metrics::GuardianMetrics;
use crate::projector::{Snapshot, StateProjector};

/// Attempts per write before an append conflict is surfaced.
pub const MAX_APPEND_ATTEMPTS: u32 = 3;

/// Default number of events between persisted snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL: u64 = 50;

/// What a write closure decided.
#[derive(Debug)]
pub enum Plan<T> {
    /// Append the event, then return the value.
    Append(NewEvent, T),
    /// Append nothing.
    Skip(T),
}

/// Result of [`Ledger::append_with`].
#[derive(Debug)]
pub struct AppendOutcome<T> {
    /// The committed event, if the plan appended one.
    pub event: Option<Event>,
    /// State after the write.
    pub snapshot: Snapshot,
    /// Value returned by the plan.
    pub value: T,
}

/// Event repository plus live projection.
pub struct Ledger {
    repo: Arc<dyn EventRepository>,
    projector: StateProjector,
    baseline_digest: String,
    live: RwLock<Snapshot>,
    snapshot_interval: u64,
    metrics: GuardianMetrics,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("repo", &"<EventRepository>")
            .field("snapshot_interval", &self.snapshot_interval)
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Creates a ledger starting from the empty projection.
    ///
    /// Events already in the repository are folded on first access.
    ///
    /// # Errors
    ///
    /// Returns an error if the baseline cannot be hashed.
    pub fn new(
        repo: Arc<dyn EventRepository>,
        projector: StateProjector,
        snapshot_interval: u64,
    ) -> Result<Self> {
        let initial = projector.initial_snapshot()?;
        let baseline_digest = projector.baseline_digest()?;
        Ok(Self {
            repo,
            projector,
            baseline_digest,
            live: RwLock::new(initial),
            snapshot_interval,
            metrics: GuardianMetrics::new(),
        })
    }

    /// Opens a ledger, resuming from the persisted snapshot when it verifies.
    ///
    /// A snapshot that fails its checksum, claims a version past the log
    /// tail, or was folded from a different baseline is discarded and the
    /// log is replayed from the start.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or folded.
    #[tracing::instrument(skip_all)]
    pub async fn open(
        repo: Arc<dyn EventRepository>,
        projector: StateProjector,
        snapshot_interval: u64,
    ) -> Result<Self> {
        let ledger = Self::new(repo, projector, snapshot_interval)?;
        let tail = ledger.repo.tail().await?;

        match ledger.repo.load_snapshot().await {
            Ok(Some(stored)) if stored.version > tail => {
                tracing::warn!(
                    snapshot_version = stored.version,
                    tail,
                    "snapshot is ahead of the log; replaying"
                );
            }
            Ok(Some(stored))
                if stored.baseline.as_deref() != Some(ledger.baseline_digest.as_str()) =>
            {
                tracing::warn!(
                    snapshot_version = stored.version,
                    "snapshot was folded from a different baseline; replaying"
                );
            }
            Ok(Some(stored)) => match Snapshot::from_stored(&stored) {
                Ok(snapshot) => {
                    tracing::info!(version = snapshot.version, "resuming from snapshot");
                    *ledger.live.write().await = snapshot;
                }
                Err(e) => tracing::warn!(error = %e, "discarding unverifiable snapshot"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "snapshot unreadable; replaying"),
        }

        ledger.refresh().await?;
        Ok(ledger)
    }

    /// Underlying repository.
    #[must_use]
    pub fn repository(&self) -> &Arc<dyn EventRepository> {
        &self.repo
    }

    /// Projector used for folding.
    #[must_use]
    pub const fn projector(&self) -> &StateProjector {
        &self.projector
    }

    /// Catches up with the log and returns the current state.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or folded.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        self.refresh().await
    }

    /// Returns the cached state without reading the log.
    pub async fn live_snapshot(&self) -> Snapshot {
        self.live.read().await.clone()
    }

    /// Folds any events appended since the last access.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or folded.
    pub async fn refresh(&self) -> Result<Snapshot> {
        let mut live = self.live.write().await;
        self.catch_up(&mut *live).await?;
        Ok(live.clone())
    }

    /// Appends an event without inspecting state.
    ///
    /// # Errors
    ///
    /// Returns an error if the append fails after retries.
    pub async fn record(&self, event: NewEvent) -> Result<Event> {
        let outcome = self
            .append_with(|_| Ok(Plan::Append(event.clone(), ())))
            .await?;
        outcome.event.ok_or_else(|| {
            guardian_core::Error::Internal {
                message: "append plan produced no event".into(),
            }
            .into()
        })
    }

    /// Runs `plan` against fresh state and appends what it returns.
    ///
    /// On an append conflict the ledger catches up and calls `plan` again,
    /// up to [`MAX_APPEND_ATTEMPTS`] times.
    ///
    /// # Errors
    ///
    /// Propagates errors from `plan`, and `AppendConflict` once retries are
    /// exhausted.
    pub async fn append_with<T, F>(&self, mut plan: F) -> Result<AppendOutcome<T>>
    where
        F: FnMut(&Snapshot) -> Result<Plan<T>>,
    {
        let mut live = self.live.write().await;
        let mut attempt = 1;
        loop {
            self.catch_up(&mut *live).await?;
            let (event, value) = match plan(&*live)? {
                Plan::Skip(value) => {
                    return Ok(AppendOutcome {
                        event: None,
                        snapshot: live.clone(),
                        value,
                    });
                }
                Plan::Append(event, value) => (event, value),
            };

            match self.repo.append(event, Some(live.version)).await {
                Ok(committed) => {
                    let previous = live.version;
                    *live = self
                        .projector
                        .incremental_update(&*live, std::slice::from_ref(&committed))?;
                    self.metrics.record_append(&committed.event_type);
                    self.persist_if_due(&*live, previous).await;
                    return Ok(AppendOutcome {
                        event: Some(committed),
                        snapshot: live.clone(),
                        value,
                    });
                }
                Err(e @ guardian_core::Error::AppendConflict { .. }) => {
                    self.metrics.record_append_conflict();
                    if attempt >= MAX_APPEND_ATTEMPTS {
                        return Err(e.into());
                    }
                    tracing::debug!(attempt, error = %e, "append lost race; retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn catch_up(&self, live: &mut Snapshot) -> Result<()> {
        let events = ReplayCursor::new(Arc::clone(&self.repo), live.version + 1)
            .collect_all()
            .await?;
        if events.is_empty() {
            return Ok(());
        }
        let previous = live.version;
        *live = self.projector.incremental_update(live, &events)?;
        self.persist_if_due(live, previous).await;
        Ok(())
    }

    /// Writes a snapshot when the version crossed an interval boundary.
    ///
    /// Failures are logged; the snapshot is only a cache.
    async fn persist_if_due(&self, live: &Snapshot, previous: u64) {
        if self.snapshot_interval == 0
            || live.version / self.snapshot_interval == previous / self.snapshot_interval
        {
            return;
        }
        let stored = match live.to_stored(&self.baseline_digest, Utc::now()) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "snapshot encoding failed");
                return;
            }
        };
        if let Err(e) = self.repo.save_snapshot(&stored).await {
            tracing::warn!(version = live.version, error = %e, "snapshot write failed");
        } else {
            tracing::debug!(version = live.version, "snapshot persisted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutotuneMode;
    use crate::projector::Baseline;
    use guardian_core::MemoryRepository;
    use guardian_core::event::types;
    use serde_json::json;

    fn skip() -> NewEvent {
        NewEvent::new(types::SIGNAL_SKIP, "user", json!({}), Utc::now())
    }

    #[tokio::test]
    async fn reads_catch_up_with_external_appends() -> Result<()> {
        let repo: Arc<dyn EventRepository> = Arc::new(MemoryRepository::new());
        let ledger = Ledger::new(Arc::clone(&repo), StateProjector::default(), 0)?;
        repo.append(skip(), None).await?;
        repo.append(skip(), None).await?;

        assert_eq!(ledger.live_snapshot().await.version, 0);
        let snapshot = ledger.snapshot().await?;
        assert_eq!(snapshot.version, 2);
        Ok(())
    }

    #[tokio::test]
    async fn plan_sees_state_after_competing_writer() -> Result<()> {
        let repo: Arc<dyn EventRepository> = Arc::new(MemoryRepository::new());
        let ledger = Ledger::new(Arc::clone(&repo), StateProjector::default(), 0)?;
        repo.append(skip(), None).await?;

        let outcome = ledger
            .append_with(|snapshot| Ok(Plan::Append(skip(), snapshot.version)))
            .await?;
        assert_eq!(outcome.value, 1);
        assert_eq!(outcome.event.map(|e| e.event_id), Some(2));
        assert_eq!(outcome.snapshot.version, 2);
        Ok(())
    }

    #[tokio::test]
    async fn skip_plan_appends_nothing() -> Result<()> {
        let repo: Arc<dyn EventRepository> = Arc::new(MemoryRepository::new());
        let ledger = Ledger::new(Arc::clone(&repo), StateProjector::default(), 0)?;
        let outcome = ledger.append_with(|_| Ok(Plan::Skip("nothing"))).await?;
        assert!(outcome.event.is_none());
        assert_eq!(repo.tail().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn snapshots_persist_on_interval_and_resume() -> Result<()> {
        let repo: Arc<dyn EventRepository> = Arc::new(MemoryRepository::new());
        let ledger = Ledger::new(Arc::clone(&repo), StateProjector::default(), 2)?;
        for _ in 0..5 {
            ledger.record(skip()).await?;
        }
        let stored = repo.load_snapshot().await?;
        assert_eq!(stored.as_ref().map(|s| s.version), Some(4));

        let reopened = Ledger::open(Arc::clone(&repo), StateProjector::default(), 2).await?;
        let live = reopened.live_snapshot().await;
        assert_eq!(live.version, 5);
        assert_eq!(live, ledger.snapshot().await?);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_discarded() -> Result<()> {
        let repo: Arc<dyn EventRepository> = Arc::new(MemoryRepository::new());
        let ledger = Ledger::new(Arc::clone(&repo), StateProjector::default(), 1)?;
        ledger.record(skip()).await?;

        let mut stored = repo.load_snapshot().await?.ok_or_else(|| {
            guardian_core::Error::Internal {
                message: "snapshot missing".into(),
            }
        })?;
        stored.checksum = "0".repeat(64);
        repo.save_snapshot(&stored).await?;

        let reopened = Ledger::open(Arc::clone(&repo), StateProjector::default(), 0).await?;
        assert_eq!(reopened.live_snapshot().await, ledger.snapshot().await?);
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_from_another_baseline_is_replayed() -> Result<()> {
        let repo: Arc<dyn EventRepository> = Arc::new(MemoryRepository::new());
        let shadow = Ledger::new(Arc::clone(&repo), StateProjector::default(), 1)?;
        shadow.record(skip()).await?;
        assert!(repo.load_snapshot().await?.is_some());

        let mut baseline = Baseline::default();
        baseline.config.enabled = true;
        baseline.config.mode = AutotuneMode::Assist;
        let projector = StateProjector::new(baseline);
        let expected = projector.project(&repo.read(1, None).await?)?;

        let reopened = Ledger::open(Arc::clone(&repo), projector, 0).await?;
        let live = reopened.live_snapshot().await;
        assert_eq!(live.state.config.mode, AutotuneMode::Assist);
        assert!(live.state.config.enabled);
        assert_eq!(live, expected);
        Ok(())
    }
}
