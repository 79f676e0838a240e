//! System cycle route.
//!
//! ## Routes
//!
//! - `POST /sys/cycle` - Run a proposal scan, then a scheduler tick

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use guardian_autotune::{EvaluationRun, ScanOutcome};

use crate::error::{ApiError, ApiErrorBody};
use crate::server::AppState;

/// Result of one system cycle.
#[derive(Debug, Serialize, ToSchema)]
pub struct CycleResponse {
    /// Proposal scan outcome.
    #[schema(value_type = Object)]
    pub scan: ScanOutcome,
    /// Scheduler tick summary.
    #[schema(value_type = Object)]
    pub evaluation: EvaluationRun,
}

/// Creates system routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/sys/cycle", post(run_cycle))
}

/// Run one system cycle.
///
/// POST /sys/cycle
#[utoipa::path(
    post,
    path = "/sys/cycle",
    tag = "system",
    responses(
        (status = 200, description = "Cycle finished", body = CycleResponse),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn run_cycle(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.governance.run_cycle(Utc::now()).await?;
    tracing::info!(
        proposed = report.scan.proposals.len(),
        run_status = report.evaluation.status.as_label(),
        evaluated = report.evaluation.evaluated_count,
        "System cycle finished"
    );
    Ok(Json(CycleResponse {
        scan: report.scan,
        evaluation: report.evaluation,
    }))
}
