//! Observation ingest route.
//!
//! Signals and trust samples enter the log here. Governance event types
//! are refused; only the lifecycle components write those.
//!
//! ## Routes
//!
//! - `POST /guardian/events` - Append one observation event

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use guardian_core::NewEvent;

use crate::error::{ApiError, ApiErrorBody};
use crate::server::AppState;

/// An observation to append.
#[derive(Debug, Deserialize, ToSchema)]
pub struct IngestEventRequest {
    /// Dotted event type, e.g. `signal.skip` or `trust.sampled`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Who produced the observation.
    pub actor: String,
    /// Type-specific body.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    /// When it happened (defaults to now).
    pub timestamp: Option<DateTime<Utc>>,
    /// Correlation ID for request tracing.
    pub correlation_id: Option<String>,
}

/// The committed event position.
#[derive(Debug, Serialize, ToSchema)]
pub struct IngestEventResponse {
    /// Assigned log position.
    pub event_id: u64,
    /// Event type as stored.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Recorded timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Creates ingest routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/guardian/events", post(ingest_event))
}

/// Append one observation event.
///
/// POST /guardian/events
#[utoipa::path(
    post,
    path = "/guardian/events",
    tag = "events",
    request_body = IngestEventRequest,
    responses(
        (status = 201, description = "Event appended", body = IngestEventResponse),
        (status = 400, description = "Reserved or malformed event", body = ApiErrorBody),
        (status = 409, description = "Concurrent append", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.event_type.trim().is_empty() {
        return Err(ApiError::bad_request("type is required"));
    }
    if req.actor.trim().is_empty() {
        return Err(ApiError::bad_request("actor is required"));
    }

    let timestamp = req.timestamp.unwrap_or_else(Utc::now);
    let mut event = NewEvent::new(req.event_type, req.actor, req.payload, timestamp);
    if let Some(correlation_id) = req.correlation_id {
        event = event.with_correlation_id(correlation_id);
    }

    let committed = state.governance.ingest(event).await?;
    tracing::debug!(
        event_id = committed.event_id,
        event_type = %committed.event_type,
        "Observation ingested"
    );

    Ok((
        StatusCode::CREATED,
        Json(IngestEventResponse {
            event_id: committed.event_id,
            event_type: committed.event_type,
            timestamp: committed.timestamp,
        }),
    ))
}
