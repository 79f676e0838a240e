//! Repository abstraction over the event log.
//!
//! The log is the single source of truth. A repository offers three
//! capabilities: append a fact, read a range of facts, and persist a
//! snapshot cache. State machines above this layer never see files or
//! locks, so the same core logic runs over memory or a flat file.
//!
//! ## Append contract
//!
//! - Ids are assigned as `tail + 1`; the first event is id 1.
//! - `expected_tail` is an optimistic lock on the last-seen id. A stale value
//!   fails with [`Error::AppendConflict`](crate::Error::AppendConflict).
//! - An append is durable before the call returns.

mod file;
mod memory;

pub use file::{EVENT_LOG_FILE, FileRepository, SNAPSHOT_FILE};
pub use memory::MemoryRepository;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::event::{Event, NewEvent};

/// Persisted projection cache.
///
/// Always reproducible by replaying the log from the start; never
/// authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    /// Id of the last event folded into `state`.
    pub version: u64,
    /// Hex SHA-256 of the canonical encoding of `state`.
    pub checksum: String,
    /// Digest of the seed configuration `state` was folded from. A snapshot
    /// written under another seed does not describe this process's replay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<String>,
    /// Projected state.
    pub state: Value,
    /// When the snapshot was written.
    pub written_at: DateTime<Utc>,
}

/// Append-only event storage.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Appends an event and returns it as committed.
    ///
    /// # Errors
    ///
    /// Returns `AppendConflict` when `expected_tail` is stale,
    /// `SchemaVersionMismatch` for outdated schemas, `DuplicateEventId` or
    /// `EventIdGap` for bad explicit ids, and `Storage` on I/O failure.
    async fn append(&self, event: NewEvent, expected_tail: Option<u64>) -> Result<Event>;

    /// Reads events with `from_id <= event_id <= to_id` in id order.
    ///
    /// `to_id = None` reads to the current tail.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn read(&self, from_id: u64, to_id: Option<u64>) -> Result<Vec<Event>>;

    /// Returns the id of the last committed event (0 when empty).
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn tail(&self) -> Result<u64>;

    /// Replaces the persisted snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    async fn save_snapshot(&self, snapshot: &StoredSnapshot) -> Result<()>;

    /// Loads the persisted snapshot, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if a snapshot exists but cannot be decoded.
    async fn load_snapshot(&self) -> Result<Option<StoredSnapshot>>;
}

/// Rejects an append whose caller saw an older tail.
pub(crate) fn check_expected_tail(expected_tail: Option<u64>, actual: u64) -> Result<()> {
    match expected_tail {
        Some(expected) if expected != actual => Err(Error::AppendConflict { expected, actual }),
        _ => Ok(()),
    }
}

/// Default number of events fetched per cursor page.
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Restartable, paged reader over the log.
///
/// The cursor never mutates the log. Its [`position`](Self::position) can be
/// stored and a new cursor resumed from it later.
pub struct ReplayCursor {
    repo: Arc<dyn EventRepository>,
    next_id: u64,
    upper: Option<u64>,
    page_size: usize,
}

impl std::fmt::Debug for ReplayCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayCursor")
            .field("repo", &"<EventRepository>")
            .field("next_id", &self.next_id)
            .field("upper", &self.upper)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl ReplayCursor {
    /// Creates a cursor starting at `from_id` (inclusive).
    #[must_use]
    pub fn new(repo: Arc<dyn EventRepository>, from_id: u64) -> Self {
        Self {
            repo,
            next_id: from_id.max(1),
            upper: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Stops the cursor after `to_id` (inclusive).
    #[must_use]
    pub const fn with_upper_bound(mut self, to_id: u64) -> Self {
        self.upper = Some(to_id);
        self
    }

    /// Sets the page size (minimum 1).
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Id of the next event this cursor will return.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.next_id
    }

    /// Fetches the next page, or `None` once the range is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates repository read errors; the cursor position is unchanged
    /// on error so the call can be retried.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Event>>> {
        let span = u64::try_from(self.page_size).unwrap_or(u64::MAX);
        let mut to_id = self.next_id.saturating_add(span - 1);
        if let Some(upper) = self.upper {
            if self.next_id > upper {
                return Ok(None);
            }
            to_id = to_id.min(upper);
        }

        let page = self.repo.read(self.next_id, Some(to_id)).await?;
        let Some(last) = page.last() else {
            return Ok(None);
        };
        self.next_id = last.event_id + 1;
        Ok(Some(page))
    }

    /// Drains the remaining range into memory.
    ///
    /// # Errors
    ///
    /// Propagates repository read errors.
    pub async fn collect_all(mut self) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        while let Some(page) = self.next_page().await? {
            events.extend(page);
        }
        Ok(events)
    }
}
