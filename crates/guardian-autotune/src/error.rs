//! Error types for governance operations.

use crate::proposal::{LifecycleAction, ProposalStatus};

/// The result type used throughout `guardian-autotune`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during proposal governance.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested action is not legal from the proposal's status.
    #[error("invalid transition for {proposal_id}: cannot {action} from {from}")]
    InvalidTransition {
        /// Proposal identifier.
        proposal_id: String,
        /// Current status.
        from: ProposalStatus,
        /// Attempted action.
        action: LifecycleAction,
    },

    /// The caller's fingerprint is stale, or the world changed underneath.
    #[error("concurrency conflict on {proposal_id}: {reason}")]
    ConcurrencyConflict {
        /// Proposal identifier.
        proposal_id: String,
        /// What changed.
        reason: String,
    },

    /// The change exceeds configured guardrails.
    #[error("guardrail violation on {proposal_id}: {reason}")]
    GuardrailViolation {
        /// Proposal identifier.
        proposal_id: String,
        /// Which bound was exceeded.
        reason: String,
    },

    /// Governance calls require assist mode.
    #[error("autotune mode is {mode}; governance actions require assist mode")]
    ModeNotAssist {
        /// Current mode label.
        mode: String,
    },

    /// No proposal with this id exists.
    #[error("proposal not found: {proposal_id}")]
    ProposalNotFound {
        /// Proposal identifier.
        proposal_id: String,
    },

    /// A configuration update failed validation.
    #[error("invalid autotune config: {message}")]
    InvalidConfig {
        /// Description of the invalid setting.
        message: String,
    },

    /// An error from the event log.
    #[error("event log error: {0}")]
    Core(#[from] guardian_core::Error),
}

impl Error {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            Self::GuardrailViolation { .. } => "GUARDRAIL_VIOLATION",
            Self::ModeNotAssist { .. } => "MODE_NOT_ASSIST",
            Self::ProposalNotFound { .. } => "PROPOSAL_NOT_FOUND",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::Core(guardian_core::Error::AppendConflict { .. }) => "APPEND_CONFLICT",
            Self::Core(guardian_core::Error::SchemaVersionMismatch { .. }) => {
                "SCHEMA_VERSION_MISMATCH"
            }
            Self::Core(_) => "STORAGE",
        }
    }

    /// Creates a concurrency conflict.
    #[must_use]
    pub fn conflict(proposal_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConcurrencyConflict {
            proposal_id: proposal_id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a guardrail violation.
    #[must_use]
    pub fn guardrail(proposal_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::GuardrailViolation {
            proposal_id: proposal_id.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid config error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_display() {
        let err = Error::InvalidTransition {
            proposal_id: "atp_1".into(),
            from: ProposalStatus::Rejected,
            action: LifecycleAction::Apply,
        };
        assert_eq!(
            err.to_string(),
            "invalid transition for atp_1: cannot apply from rejected"
        );
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[test]
    fn core_errors_keep_specific_codes() {
        let err = Error::from(guardian_core::Error::AppendConflict {
            expected: 1,
            actual: 2,
        });
        assert_eq!(err.code(), "APPEND_CONFLICT");

        let err = Error::from(guardian_core::Error::storage("disk"));
        assert_eq!(err.code(), "STORAGE");
    }

    #[test]
    fn mode_not_assist_display() {
        let err = Error::ModeNotAssist {
            mode: "shadow".into(),
        };
        assert!(err.to_string().contains("require assist mode"));
        assert_eq!(err.code(), "MODE_NOT_ASSIST");
    }
}
