//! Typed payloads for `autotune.*` events.
//!
//! These are the only events the governance layer writes. Decoding is
//! strict: a governance event whose payload does not match its type is a
//! serialization error, not a silently skipped record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use guardian_core::event::types;
use guardian_core::{Event, NewEvent};

use crate::config::{AutotuneConfig, AutotuneMode};
use crate::error::Result;
use crate::proposal::{EvaluationRun, Verdict};
use crate::thresholds::ThresholdValue;

/// Body of `autotune.proposed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedPayload {
    /// New proposal id.
    pub proposal_id: String,
    /// Threshold key.
    pub target_param: String,
    /// Value observed at emission.
    pub old_value: ThresholdValue,
    /// Proposed value.
    pub new_value: ThresholdValue,
    /// Generator confidence.
    pub confidence: f64,
    /// Mode at emission.
    pub mode: AutotuneMode,
    /// Signal events behind the proposal.
    pub signal_count: u64,
    /// Aggregated signal magnitude.
    pub signal_magnitude: f64,
    /// Generator explanation.
    #[serde(default)]
    pub rationale: String,
    /// Generator name.
    #[serde(default)]
    pub generator: String,
}

/// Body of `autotune.reviewed` and `autotune.rejected`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionPayload {
    /// Proposal id.
    pub proposal_id: String,
    /// Fingerprint the caller presented.
    #[serde(default)]
    pub fingerprint: String,
    /// Calling surface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Operator reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Operator note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Body of `autotune.applied`, the configuration-change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedPayload {
    /// Common transition fields.
    #[serde(flatten)]
    pub transition: TransitionPayload,
    /// Threshold key.
    pub target_param: String,
    /// Value replaced by this change; restored verbatim on rollback.
    pub old_value: ThresholdValue,
    /// Value written.
    pub new_value: ThresholdValue,
    /// Trust index at apply time.
    pub trust_index_before: Option<f64>,
}

/// Body of `autotune.evaluated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatedPayload {
    /// Common transition fields.
    #[serde(flatten)]
    pub transition: TransitionPayload,
    /// Whether the horizon was bypassed.
    pub forced: bool,
    /// Trust index at apply time.
    pub trust_index_before: Option<f64>,
    /// Trust index now.
    pub trust_index_after_48h: Option<f64>,
    /// Difference, when both sides exist.
    pub trust_delta_48h: Option<f64>,
    /// Settled outcome.
    pub verdict: Verdict,
    /// Whether the change held within the horizon.
    pub success_within_48h: bool,
    /// Hours between apply and evaluation.
    pub hours_since_apply: f64,
}

/// Body of `autotune.rolled_back`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolledBackPayload {
    /// Common transition fields.
    #[serde(flatten)]
    pub transition: TransitionPayload,
    /// Threshold key.
    pub target_param: String,
    /// Value written back (the apply's `old_value`).
    pub restored_value: ThresholdValue,
    /// Value removed (the apply's `new_value`).
    pub reverted_value: ThresholdValue,
}

/// Body of `autotune.config_updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigUpdatedPayload {
    /// Complete settings after the update.
    pub config: AutotuneConfig,
}

/// A decoded governance event.
#[derive(Debug, Clone, PartialEq)]
pub enum AutotuneEvent {
    /// `autotune.proposed`.
    Proposed(ProposedPayload),
    /// `autotune.reviewed`.
    Reviewed(TransitionPayload),
    /// `autotune.applied`.
    Applied(AppliedPayload),
    /// `autotune.rejected`.
    Rejected(TransitionPayload),
    /// `autotune.evaluated`.
    Evaluated(EvaluatedPayload),
    /// `autotune.rolled_back`.
    RolledBack(RolledBackPayload),
    /// `autotune.config_updated`.
    ConfigUpdated(ConfigUpdatedPayload),
    /// `autotune.evaluation_run`.
    EvaluationRun(EvaluationRun),
}

impl AutotuneEvent {
    /// Event type string.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Proposed(_) => types::AUTOTUNE_PROPOSED,
            Self::Reviewed(_) => types::AUTOTUNE_REVIEWED,
            Self::Applied(_) => types::AUTOTUNE_APPLIED,
            Self::Rejected(_) => types::AUTOTUNE_REJECTED,
            Self::Evaluated(_) => types::AUTOTUNE_EVALUATED,
            Self::RolledBack(_) => types::AUTOTUNE_ROLLED_BACK,
            Self::ConfigUpdated(_) => types::AUTOTUNE_CONFIG_UPDATED,
            Self::EvaluationRun(_) => types::AUTOTUNE_EVALUATION_RUN,
        }
    }

    /// Proposal the event concerns, if any.
    #[must_use]
    pub fn proposal_id(&self) -> Option<&str> {
        match self {
            Self::Proposed(p) => Some(&p.proposal_id),
            Self::Reviewed(t) | Self::Rejected(t) => Some(&t.proposal_id),
            Self::Applied(p) => Some(&p.transition.proposal_id),
            Self::Evaluated(p) => Some(&p.transition.proposal_id),
            Self::RolledBack(p) => Some(&p.transition.proposal_id),
            Self::ConfigUpdated(_) | Self::EvaluationRun(_) => None,
        }
    }

    /// Builds the unappended event.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the payload cannot be encoded.
    pub fn to_new_event(&self, actor: &str, timestamp: DateTime<Utc>) -> Result<NewEvent> {
        let payload = match self {
            Self::Proposed(p) => to_value(p)?,
            Self::Reviewed(t) | Self::Rejected(t) => to_value(t)?,
            Self::Applied(p) => to_value(p)?,
            Self::Evaluated(p) => to_value(p)?,
            Self::RolledBack(p) => to_value(p)?,
            Self::ConfigUpdated(p) => to_value(p)?,
            Self::EvaluationRun(r) => to_value(r)?,
        };
        Ok(NewEvent::new(self.event_type(), actor, payload, timestamp))
    }

    /// Decodes a committed event. Non-governance events yield `None`.
    ///
    /// # Errors
    ///
    /// Returns a serialization error when an `autotune.*` payload is malformed.
    pub fn from_event(event: &Event) -> Result<Option<Self>> {
        let decoded = match event.event_type.as_str() {
            types::AUTOTUNE_PROPOSED => Self::Proposed(event.payload_as()?),
            types::AUTOTUNE_REVIEWED => Self::Reviewed(event.payload_as()?),
            types::AUTOTUNE_APPLIED => Self::Applied(event.payload_as()?),
            types::AUTOTUNE_REJECTED => Self::Rejected(event.payload_as()?),
            types::AUTOTUNE_EVALUATED => Self::Evaluated(event.payload_as()?),
            types::AUTOTUNE_ROLLED_BACK => Self::RolledBack(event.payload_as()?),
            types::AUTOTUNE_CONFIG_UPDATED => Self::ConfigUpdated(event.payload_as()?),
            types::AUTOTUNE_EVALUATION_RUN => Self::EvaluationRun(event.payload_as()?),
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }
}

fn to_value<T: Serialize>(payload: &T) -> Result<Value> {
    serde_json::to_value(payload)
        .map_err(|e| guardian_core::Error::serialization(e).into())
}
