//! Event envelope for the append-only log.
//!
//! Every record in the log is an [`Event`]: an immutable fact with a
//! strictly increasing `event_id` and a declared `schema_version`. Writers
//! build a [`NewEvent`]; the repository assigns the id on append.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Oldest schema version the store accepts without migration.
pub const MIN_SUPPORTED_SCHEMA_VERSION: u32 = 2;

/// A committed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic, unique position in the log (first event is 1).
    pub event_id: u64,
    /// Schema version of this record.
    pub schema_version: u32,
    /// Dotted event type (e.g. `autotune.applied`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// When the fact occurred.
    pub timestamp: DateTime<Utc>,
    /// Who produced the fact.
    pub actor: String,
    /// Type-specific body.
    #[serde(default)]
    pub payload: Value,
    /// Correlation ID for request tracing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Event {
    /// Decodes one line of the persisted log.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaVersionMismatch`] for records older than
    /// [`MIN_SUPPORTED_SCHEMA_VERSION`] and [`Error::Serialization`] for
    /// malformed records.
    pub fn from_json_line(line: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(line).map_err(Error::serialization)?;
        let found = declared_schema_version(&raw);
        if found < MIN_SUPPORTED_SCHEMA_VERSION {
            return Err(Error::SchemaVersionMismatch {
                found,
                minimum: MIN_SUPPORTED_SCHEMA_VERSION,
            });
        }
        serde_json::from_value(raw).map_err(Error::serialization)
    }

    /// Encodes the event as a single log line (no trailing newline).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the payload cannot be encoded.
    pub fn to_json_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::serialization)
    }

    /// Returns a string field from the payload.
    #[must_use]
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Deserializes the payload into a typed body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] when the payload does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| Error::Serialization {
            message: format!(
                "event {} ({}) payload: {e}",
                self.event_id, self.event_type
            ),
        })
    }
}

/// Reads the declared schema version from a raw record.
///
/// Legacy records carried string versions such as `"1.0"`; records with no
/// version at all report 0.
#[must_use]
pub fn declared_schema_version(raw: &Value) -> u32 {
    match raw.get("schema_version") {
        Some(Value::Number(n)) => n.as_u64().and_then(|v| u32::try_from(v).ok()).unwrap_or(0),
        Some(Value::String(s)) => s
            .split('.')
            .next()
            .and_then(|major| major.trim().parse::<u32>().ok())
            .unwrap_or(0),
        _ => 0,
    }
}

/// An event that has not been appended yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// Explicit id; when set it must be exactly the next id.
    pub event_id: Option<u64>,
    /// Declared schema version.
    pub schema_version: u32,
    /// Dotted event type.
    pub event_type: String,
    /// When the fact occurred.
    pub timestamp: DateTime<Utc>,
    /// Who produced the fact.
    pub actor: String,
    /// Type-specific body.
    pub payload: Value,
    /// Correlation ID for request tracing.
    pub correlation_id: Option<String>,
}

impl NewEvent {
    /// Creates a new event at the current schema version.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        actor: impl Into<String>,
        payload: Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: None,
            schema_version: CURRENT_SCHEMA_VERSION,
            event_type: event_type.into(),
            timestamp,
            actor: actor.into(),
            payload,
            correlation_id: None,
        }
    }

    /// Pins the id this event must receive.
    #[must_use]
    pub const fn with_event_id(mut self, event_id: u64) -> Self {
        self.event_id = Some(event_id);
        self
    }

    /// Overrides the declared schema version.
    #[must_use]
    pub const fn with_schema_version(mut self, schema_version: u32) -> Self {
        self.schema_version = schema_version;
        self
    }

    /// Sets the correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Checks the declared schema and explicit id against the current tail.
    ///
    /// Returns the id the event will be committed under.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaVersionMismatch`], [`Error::DuplicateEventId`],
    /// or [`Error::EventIdGap`].
    pub fn admit(&self, tail: u64) -> Result<u64> {
        if self.schema_version < MIN_SUPPORTED_SCHEMA_VERSION {
            return Err(Error::SchemaVersionMismatch {
                found: self.schema_version,
                minimum: MIN_SUPPORTED_SCHEMA_VERSION,
            });
        }
        let next = tail + 1;
        match self.event_id {
            Some(id) if id <= tail => Err(Error::DuplicateEventId { event_id: id, tail }),
            Some(id) if id > next => Err(Error::EventIdGap {
                event_id: id,
                expected: next,
            }),
            _ => Ok(next),
        }
    }

    /// Commits the event under the given id.
    #[must_use]
    pub fn into_event(self, event_id: u64) -> Event {
        Event {
            event_id,
            schema_version: self.schema_version,
            event_type: self.event_type,
            timestamp: self.timestamp,
            actor: self.actor,
            payload: self.payload,
            correlation_id: self.correlation_id,
        }
    }
}

/// Well-known event types.
pub mod types {
    /// A task was skipped by the user.
    pub const SIGNAL_SKIP: &str = "signal.skip";
    /// A protected (L2) block was interrupted.
    pub const SIGNAL_INTERRUPTION: &str = "signal.interruption";
    /// A goal made no progress for a number of days.
    pub const SIGNAL_STAGNATION: &str = "signal.stagnation";
    /// The user overrode L2 protection.
    pub const SIGNAL_L2_OVERRIDE: &str = "signal.l2_override";
    /// Legacy task update; counts as a skip when `updates.status == "skipped"`.
    pub const LEGACY_TASK_UPDATED: &str = "task_updated";
    /// A trust index sample.
    pub const TRUST_SAMPLED: &str = "trust.sampled";

    /// A proposal was emitted.
    pub const AUTOTUNE_PROPOSED: &str = "autotune.proposed";
    /// A proposal was annotated by a reviewer.
    pub const AUTOTUNE_REVIEWED: &str = "autotune.reviewed";
    /// A proposal changed configuration.
    pub const AUTOTUNE_APPLIED: &str = "autotune.applied";
    /// A proposal was declined.
    pub const AUTOTUNE_REJECTED: &str = "autotune.rejected";
    /// An applied proposal's outcome was settled.
    pub const AUTOTUNE_EVALUATED: &str = "autotune.evaluated";
    /// An applied proposal was reverted.
    pub const AUTOTUNE_ROLLED_BACK: &str = "autotune.rolled_back";
    /// Autotune settings changed.
    pub const AUTOTUNE_CONFIG_UPDATED: &str = "autotune.config_updated";
    /// An evaluation scheduler tick finished.
    pub const AUTOTUNE_EVALUATION_RUN: &str = "autotune.evaluation_run";
}
