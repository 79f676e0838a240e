//! # guardian-autotune
//!
//! Event-sourced governance for Guardian threshold tuning.
//!
//! Deviation signals (skips, interruptions, stagnation, protection
//! overrides) accumulate in the event log. The [`ProposalEngine`] turns
//! sustained pressure on a threshold into a bounded change proposal, and
//! the [`LifecycleManager`] walks it through review, apply, evaluation and
//! rollback. Every step is an event; live configuration is a projection.
//!
//! ## Lifecycle
//!
//! ```text
//! proposed ──► reviewed ──► applied ──► evaluated
//!    │            │            │            │
//!    │            ▼            ▼            ▼
//!    └────────► rejected    rolled_back ◄───┘
//!    └──────────────────────► applied
//! ```
//!
//! Actions require `mode = assist` and the proposal's current
//! fingerprint. Any transition, and any threshold change, rotates the
//! fingerprint, so a caller acting on stale state gets a
//! `CONCURRENCY_CONFLICT` instead of overwriting someone else's decision.
//!
//! ## Example
//!
//! ```rust,ignore
//! use guardian_autotune::prelude::*;
//!
//! let governance = Governance::in_memory(GovernanceOptions::default())?;
//! let report = governance.run_cycle(Utc::now()).await?;
//! for proposal in &report.scan.proposals {
//!     println!("{} -> {}", proposal.target_param, proposal.new_value);
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod candidate;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod governance;
pub mod history;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod projector;
pub mod proposal;
pub mod scheduler;
pub mod signals;
pub mod thresholds;
pub mod trust;
pub mod validator;

pub use candidate::{Candidate, CandidateGenerator, HeuristicGenerator, SignalSummary};
pub use config::{AutotuneConfig, AutotuneConfigPatch, AutotuneMode};
pub use engine::{ProposalEngine, ScanOutcome, ScanStatus};
pub use error::{Error, Result};
pub use governance::{CycleReport, Governance, GovernanceOptions};
pub use history::{AuditHistory, HistoryView, LatestView, LifecycleMetrics, MetricStatus};
pub use ledger::Ledger;
pub use lifecycle::{ActionOutcome, ActionRequest, ActionStatus, LifecycleManager};
pub use projector::{Baseline, DerivedState, Snapshot, StateProjector};
pub use proposal::{
    EvaluationRun, LifecycleAction, LifecycleEvent, Proposal, ProposalStatus, RunStatus, Verdict,
};
pub use scheduler::EvaluationScheduler;
pub use thresholds::{ThresholdValue, Thresholds};
pub use trust::{FixedTrustIndex, ProjectedTrustIndex, TrustIndexSource};
pub use validator::{ConsistencyReport, ConsistencyValidator};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{AutotuneConfig, AutotuneConfigPatch, AutotuneMode};
    pub use crate::error::{Error, Result};
    pub use crate::governance::{Governance, GovernanceOptions};
    pub use crate::lifecycle::{ActionRequest, ActionStatus};
    pub use crate::proposal::{LifecycleAction, Proposal, ProposalStatus, Verdict};
    pub use crate::thresholds::ThresholdValue;
    pub use chrono::Utc;
}
