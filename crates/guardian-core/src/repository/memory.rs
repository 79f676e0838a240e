//! In-memory repository for tests and development.
//!
//! ## Limitations
//!
//! - **No durability**: all events are lost when the process exits
//! - **Single-process only**: state is not shared across process boundaries

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{EventRepository, StoredSnapshot, check_expected_tail};
use crate::error::{Error, Result};
use crate::event::{Event, NewEvent};

/// In-memory event repository.
///
/// Appends are serialized by a single write lock, which makes the tail check
/// and the push one atomic step.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    events: RwLock<Vec<Event>>,
    snapshot: RwLock<Option<StoredSnapshot>>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl MemoryRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed events.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.events.read().map_err(poison_err)?.len())
    }

    /// Returns true when no event has been committed.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl EventRepository for MemoryRepository {
    async fn append(&self, event: NewEvent, expected_tail: Option<u64>) -> Result<Event> {
        let mut events = self.events.write().map_err(poison_err)?;
        let tail = events.last().map_or(0, |e| e.event_id);
        check_expected_tail(expected_tail, tail)?;
        let event_id = event.admit(tail)?;

        let committed = event.into_event(event_id);
        events.push(committed.clone());
        drop(events);
        Ok(committed)
    }

    async fn read(&self, from_id: u64, to_id: Option<u64>) -> Result<Vec<Event>> {
        let events = self.events.read().map_err(poison_err)?;
        // Ids are contiguous from 1, so positions can be computed directly.
        let start = usize::try_from(from_id.max(1) - 1).unwrap_or(usize::MAX);
        let end = to_id.map_or(events.len(), |to| {
            usize::try_from(to).unwrap_or(usize::MAX).min(events.len())
        });
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(events.get(start..end).map(<[Event]>::to_vec).unwrap_or_default())
    }

    async fn tail(&self) -> Result<u64> {
        let events = self.events.read().map_err(poison_err)?;
        Ok(events.last().map_or(0, |e| e.event_id))
    }

    async fn save_snapshot(&self, snapshot: &StoredSnapshot) -> Result<()> {
        *self.snapshot.write().map_err(poison_err)? = Some(snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<StoredSnapshot>> {
        Ok(self.snapshot.read().map_err(poison_err)?.clone())
    }
}
