//! # guardian-core
//!
//! Event log primitives for Guardian Autotune.
//!
//! The log is the single source of truth: every configuration change,
//! proposal transition, and evaluation outcome is an immutable [`Event`]
//! appended here first. Everything else is a projection.
//!
//! ## Contents
//!
//! - **Events**: schema-versioned envelope ([`event`])
//! - **Repositories**: the [`EventRepository`] trait with in-memory and
//!   JSONL-file backends plus a restartable [`ReplayCursor`]
//! - **Hashing**: canonical JSON and content ids ([`canonical`], [`id`])
//! - **Migration**: offline upgrade of legacy records ([`migration`])
//! - **Observability**: logging init and span helpers ([`observability`])

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod canonical;
pub mod error;
pub mod event;
pub mod id;
pub mod migration;
pub mod observability;
pub mod repository;

pub use error::{Error, Result};
pub use event::{CURRENT_SCHEMA_VERSION, Event, MIN_SUPPORTED_SCHEMA_VERSION, NewEvent};
pub use repository::{
    EventRepository, FileRepository, MemoryRepository, ReplayCursor, StoredSnapshot,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::event::{Event, NewEvent, types};
    pub use crate::repository::{EventRepository, MemoryRepository, ReplayCursor};
}
