//! Error types and result aliases for the event log.
//!
//! Errors are structured so callers can tell optimistic-lock failures
//! (retry after refetching the tail) apart from hard storage faults.

/// The result type used throughout `guardian-core`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or writing the event log.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A record predates the minimum supported schema version.
    ///
    /// Recoverable only through an explicit migration pass.
    #[error("schema version {found} is older than minimum supported version {minimum}")]
    SchemaVersionMismatch {
        /// Version declared by the record (0 when missing).
        found: u32,
        /// Minimum version this store accepts.
        minimum: u32,
    },

    /// Another writer advanced the log past the caller's expected tail.
    #[error("append conflict: expected tail {expected}, actual tail {actual}")]
    AppendConflict {
        /// Tail the caller last observed.
        expected: u64,
        /// Tail at the time of the append.
        actual: u64,
    },

    /// An explicit event id was already used.
    #[error("duplicate event id {event_id} (log tail is {tail})")]
    DuplicateEventId {
        /// Rejected event id.
        event_id: u64,
        /// Current log tail.
        tail: u64,
    },

    /// An explicit event id would leave a hole in the log.
    #[error("event id {event_id} leaves a gap (next id is {expected})")]
    EventIdGap {
        /// Rejected event id.
        event_id: u64,
        /// The only id that may be appended next.
        expected: u64,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a serialization error from any displayable cause.
    #[must_use]
    pub fn serialization(message: impl std::fmt::Display) -> Self {
        Self::Serialization {
            message: message.to_string(),
        }
    }

    /// Returns true for optimistic-lock failures that a caller may retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::AppendConflict { .. })
    }
}
