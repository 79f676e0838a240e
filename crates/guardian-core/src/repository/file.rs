//! JSONL file repository.
//!
//! Layout under the data directory:
//!
//! ```text
//! events.jsonl    one event per line, append-only
//! snapshot.json   projection cache, replaced atomically (temp + rename)
//! ```
//!
//! Every append is flushed with `sync_all` before returning. A failed write
//! or sync truncates the file back to its last committed length, so a line
//! that was never acknowledged cannot resurface on reopen. If that truncation
//! also fails the repository refuses further appends until it is reopened.
//! The committed log is mirrored in memory so reads never reparse the file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{EventRepository, StoredSnapshot, check_expected_tail};
use crate::error::{Error, Result};
use crate::event::{Event, NewEvent};

/// File name of the event log inside the data directory.
pub const EVENT_LOG_FILE: &str = "events.jsonl";
/// File name of the snapshot cache inside the data directory.
pub const SNAPSHOT_FILE: &str = "snapshot.json";

/// Durable JSONL-backed repository.
#[derive(Debug)]
pub struct FileRepository {
    dir: PathBuf,
    writer: Mutex<File>,
    events: RwLock<Vec<Event>>,
    /// Set when a failed append could not be rolled back.
    wedged: AtomicBool,
    #[cfg(test)]
    fail_next_sync: AtomicBool,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl FileRepository {
    /// Opens (or creates) the log in `dir`.
    ///
    /// # Errors
    ///
    /// Returns `SchemaVersionMismatch` if the log holds records that need
    /// migration, `Storage` if the ids are not contiguous, and I/O errors
    /// as `Storage`.
    #[tracing::instrument(skip(dir), fields(dir = %dir.as_ref().display()))]
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::storage_with_source(format!("create {}", dir.display()), e))?;

        let log_path = dir.join(EVENT_LOG_FILE);
        let events = match tokio::fs::read_to_string(&log_path).await {
            Ok(contents) => parse_log(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(Error::storage_with_source(
                    format!("read {}", log_path.display()),
                    e,
                ));
            }
        };

        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
            .map_err(|e| Error::storage_with_source(format!("open {}", log_path.display()), e))?;

        tracing::info!(events = events.len(), "opened event log");
        Ok(Self {
            dir,
            writer: Mutex::new(writer),
            events: RwLock::new(events),
            wedged: AtomicBool::new(false),
            #[cfg(test)]
            fail_next_sync: AtomicBool::new(false),
        })
    }

    /// Path of the event log file.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(EVENT_LOG_FILE)
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    fn current_tail(&self) -> Result<u64> {
        let events = self.events.read().map_err(poison_err)?;
        Ok(events.last().map_or(0, |e| e.event_id))
    }

    async fn write_line(&self, writer: &mut File, bytes: &[u8]) -> Result<()> {
        writer
            .write_all(bytes)
            .await
            .map_err(|e| Error::storage_with_source("append to event log", e))?;
        #[cfg(test)]
        if self.fail_next_sync.swap(false, Ordering::SeqCst) {
            writer
                .flush()
                .await
                .map_err(|e| Error::storage_with_source("flush event log", e))?;
            return Err(Error::storage("sync event log: injected failure"));
        }
        writer
            .sync_all()
            .await
            .map_err(|e| Error::storage_with_source("sync event log", e))
    }

    /// Cuts the log back to `len` bytes after a failed append.
    async fn roll_back(&self, writer: &File, len: u64) {
        if let Err(e) = writer.set_len(len).await {
            self.wedged.store(true, Ordering::SeqCst);
            tracing::error!(error = %e, committed_len = len, "failed to truncate event log after a failed append");
        }
    }
}

fn parse_log(contents: &str) -> Result<Vec<Event>> {
    let mut events: Vec<Event> = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event = Event::from_json_line(line).map_err(|e| match e {
            Error::Serialization { message } => Error::Serialization {
                message: format!("line {}: {message}", idx + 1),
            },
            other => other,
        })?;
        let expected = events.last().map_or(1, |e| e.event_id + 1);
        if event.event_id != expected {
            return Err(Error::storage(format!(
                "line {}: event id {} is out of sequence (expected {expected})",
                idx + 1,
                event.event_id
            )));
        }
        events.push(event);
    }
    Ok(events)
}

#[async_trait]
impl EventRepository for FileRepository {
    #[tracing::instrument(
        skip(self, event),
        fields(event_type = %event.event_type, event_id = tracing::field::Empty)
    )]
    async fn append(&self, event: NewEvent, expected_tail: Option<u64>) -> Result<Event> {
        // The writer lock serializes appends end to end, including the fsync.
        let mut writer = self.writer.lock().await;
        if self.wedged.load(Ordering::SeqCst) {
            return Err(Error::storage(
                "event log holds an unacknowledged write; reopen to recover",
            ));
        }

        let tail = self.current_tail()?;
        check_expected_tail(expected_tail, tail)?;
        let event_id = event.admit(tail)?;
        let committed = event.into_event(event_id);

        let mut line = committed.to_json_line()?;
        line.push('\n');
        let committed_len = writer
            .metadata()
            .await
            .map_err(|e| Error::storage_with_source("stat event log", e))?
            .len();
        if let Err(e) = self.write_line(&mut writer, line.as_bytes()).await {
            self.roll_back(&writer, committed_len).await;
            return Err(e);
        }

        self.events
            .write()
            .map_err(poison_err)?
            .push(committed.clone());
        drop(writer);

        tracing::Span::current().record("event_id", event_id);
        Ok(committed)
    }

    async fn read(&self, from_id: u64, to_id: Option<u64>) -> Result<Vec<Event>> {
        let events = self.events.read().map_err(poison_err)?;
        Ok(events
            .iter()
            .filter(|e| e.event_id >= from_id && to_id.map_or(true, |to| e.event_id <= to))
            .cloned()
            .collect())
    }

    async fn tail(&self) -> Result<u64> {
        self.current_tail()
    }

    async fn save_snapshot(&self, snapshot: &StoredSnapshot) -> Result<()> {
        let path = self.snapshot_path();
        let tmp = self.dir.join(format!("{SNAPSHOT_FILE}.tmp"));
        let bytes = serde_json::to_vec_pretty(snapshot).map_err(Error::serialization)?;

        let mut file = File::create(&tmp)
            .await
            .map_err(|e| Error::storage_with_source(format!("create {}", tmp.display()), e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| Error::storage_with_source("write snapshot", e))?;
        file.sync_all()
            .await
            .map_err(|e| Error::storage_with_source("sync snapshot", e))?;
        drop(file);

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::storage_with_source(format!("rename to {}", path.display()), e))?;
        tracing::debug!(version = snapshot.version, "snapshot written");
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<StoredSnapshot>> {
        let path = self.snapshot_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(Error::serialization),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage_with_source(
                format!("read {}", path.display()),
                e,
            )),
        }
    }
}
