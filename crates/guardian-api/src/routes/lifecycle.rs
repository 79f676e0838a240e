//! Proposal lifecycle and audit routes.
//!
//! ## Routes
//!
//! - `GET  /guardian/autotune/lifecycle/latest` - Newest proposal, its trail and legal actions
//! - `GET  /guardian/autotune/lifecycle/history` - Lifecycle chain and metrics
//! - `GET  /guardian/autotune/evaluation/logs` - Scheduler run summaries
//! - `POST /guardian/autotune/lifecycle/{action}` - review, apply, reject, evaluate, rollback

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use guardian_autotune::history::{LifecycleMetrics, RollbackRecommendation};
use guardian_autotune::lifecycle::PendingEvaluation;
use guardian_autotune::{
    ActionOutcome, ActionRequest, ActionStatus, AutotuneMode, EvaluationRun, HistoryView,
    LatestView, LifecycleAction, LifecycleEvent, Proposal,
};

use crate::error::{ApiError, ApiErrorBody};
use crate::server::AppState;

/// Default window for audit queries.
const DEFAULT_DAYS: u32 = 30;
/// Default page size for audit queries.
const DEFAULT_LIMIT: usize = 50;
const MAX_DAYS: u32 = 365;
const MAX_LIMIT: usize = 500;

/// Source recorded on actions that arrive over HTTP without one.
const HTTP_SOURCE: &str = "api";

/// Window and page size for audit queries.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WindowQuery {
    /// Days back from now (1-365, default 30).
    pub days: Option<u32>,
    /// Maximum entries returned (1-500, default 50).
    pub limit: Option<usize>,
}

impl WindowQuery {
    fn resolve(&self) -> Result<(u32, usize), ApiError> {
        let days = self.days.unwrap_or(DEFAULT_DAYS);
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if !(1..=MAX_DAYS).contains(&days) {
            return Err(ApiError::bad_request(format!(
                "days must be between 1 and {MAX_DAYS}"
            )));
        }
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(ApiError::bad_request(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }
        Ok((days, limit))
    }
}

/// Body of a lifecycle action.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ActionRequestBody {
    /// Proposal to act on.
    pub proposal_id: String,
    /// Fingerprint the caller last saw.
    pub fingerprint: String,
    /// Who is acting.
    pub actor: String,
    /// Calling surface (defaults to `api`).
    pub source: Option<String>,
    /// Operator reason.
    pub reason: Option<String>,
    /// Operator note.
    pub note: Option<String>,
    /// Evaluate before the horizon elapses.
    #[serde(default)]
    pub force: bool,
}

impl ActionRequestBody {
    fn into_request(self) -> Result<ActionRequest, ApiError> {
        if self.proposal_id.trim().is_empty() {
            return Err(ApiError::bad_request("proposal_id is required"));
        }
        if self.actor.trim().is_empty() {
            return Err(ApiError::bad_request("actor is required"));
        }
        Ok(ActionRequest {
            proposal_id: self.proposal_id,
            fingerprint: self.fingerprint,
            actor: self.actor,
            source: Some(self.source.unwrap_or_else(|| HTTP_SOURCE.to_string())),
            reason: self.reason,
            note: self.note,
            force: self.force,
        })
    }
}

/// Result of a lifecycle action.
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    /// `reviewed`, `applied`, `rejected`, `evaluated`, `rolled_back`, or `pending`.
    #[schema(value_type = String)]
    pub status: ActionStatus,
    /// Mode at call time.
    #[schema(value_type = String)]
    pub mode: AutotuneMode,
    /// Proposal after the call, with its new fingerprint.
    #[schema(value_type = Object)]
    pub proposal: Proposal,
    /// Appended event, absent when nothing changed.
    pub event_id: Option<u64>,
    /// When a pending evaluation becomes due.
    #[schema(value_type = Option<Object>)]
    pub pending: Option<PendingEvaluation>,
}

impl From<ActionOutcome> for ActionResponse {
    fn from(outcome: ActionOutcome) -> Self {
        Self {
            status: outcome.status,
            mode: outcome.mode,
            proposal: outcome.proposal,
            event_id: outcome.event_id,
            pending: outcome.pending,
        }
    }
}

/// Newest proposal and what can be done with it.
#[derive(Debug, Serialize, ToSchema)]
pub struct LatestResponse {
    /// Whether autotune is enabled.
    pub enabled: bool,
    /// `shadow` or `assist`.
    #[schema(value_type = String)]
    pub mode: AutotuneMode,
    /// Most recent proposal.
    #[schema(value_type = Option<Object>)]
    pub proposal: Option<Proposal>,
    /// Trail of that proposal, oldest first.
    #[schema(value_type = Vec<Object>)]
    pub chain: Vec<LifecycleEvent>,
    /// Actions legal from the proposal's status.
    #[schema(value_type = Vec<String>)]
    pub available_actions: Vec<LifecycleAction>,
    /// Current trust index.
    pub trust_index: Option<f64>,
    /// Present when the active change should be undone.
    #[schema(value_type = Option<Object>)]
    pub rollback_recommendation: Option<RollbackRecommendation>,
}

impl From<LatestView> for LatestResponse {
    fn from(view: LatestView) -> Self {
        Self {
            enabled: view.enabled,
            mode: view.mode,
            proposal: view.proposal,
            chain: view.chain,
            available_actions: view.available_actions,
            trust_index: view.trust_index,
            rollback_recommendation: view.rollback_recommendation,
        }
    }
}

/// Lifecycle chain and aggregate metrics.
#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryResponse {
    /// Window in days.
    pub days: u32,
    /// Page size.
    pub limit: usize,
    /// Lifecycle events in the window, newest first.
    #[schema(value_type = Vec<Object>)]
    pub chain: Vec<LifecycleEvent>,
    /// Review turnaround, apply success, rollback rate, trust delta.
    #[schema(value_type = Object)]
    pub metrics: LifecycleMetrics,
}

impl From<HistoryView> for HistoryResponse {
    fn from(view: HistoryView) -> Self {
        Self {
            days: view.days,
            limit: view.limit,
            chain: view.chain,
            metrics: view.metrics,
        }
    }
}

/// Persisted scheduler runs.
#[derive(Debug, Serialize, ToSchema)]
pub struct EvaluationLogsResponse {
    /// Window in days.
    pub days: u32,
    /// Page size.
    pub limit: usize,
    /// Runs in the window, newest first.
    #[schema(value_type = Vec<Object>)]
    pub runs: Vec<EvaluationRun>,
}

/// Creates lifecycle routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/guardian/autotune/lifecycle/latest", get(get_latest))
        .route("/guardian/autotune/lifecycle/history", get(get_history))
        .route("/guardian/autotune/evaluation/logs", get(get_evaluation_logs))
        .route("/guardian/autotune/lifecycle/:action", post(run_action))
}

/// Newest proposal.
///
/// GET /guardian/autotune/lifecycle/latest
#[utoipa::path(
    get,
    path = "/guardian/autotune/lifecycle/latest",
    tag = "lifecycle",
    responses(
        (status = 200, description = "Newest proposal", body = LatestResponse),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn get_latest(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.governance.history().latest(Utc::now()).await?;
    Ok(Json(LatestResponse::from(view)))
}

/// Lifecycle chain and metrics over a window.
///
/// GET /guardian/autotune/lifecycle/history
#[utoipa::path(
    get,
    path = "/guardian/autotune/lifecycle/history",
    tag = "lifecycle",
    params(WindowQuery),
    responses(
        (status = 200, description = "Lifecycle history", body = HistoryResponse),
        (status = 400, description = "Bad window", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WindowQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (days, limit) = query.resolve()?;
    let view = state
        .governance
        .history()
        .history(days, limit, Utc::now())
        .await?;
    Ok(Json(HistoryResponse::from(view)))
}

/// Scheduler run summaries over a window.
///
/// GET /guardian/autotune/evaluation/logs
#[utoipa::path(
    get,
    path = "/guardian/autotune/evaluation/logs",
    tag = "lifecycle",
    params(WindowQuery),
    responses(
        (status = 200, description = "Evaluation runs", body = EvaluationLogsResponse),
        (status = 400, description = "Bad window", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn get_evaluation_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WindowQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (days, limit) = query.resolve()?;
    let runs = state
        .governance
        .history()
        .evaluation_logs(days, limit, Utc::now())
        .await?;
    Ok(Json(EvaluationLogsResponse { days, limit, runs }))
}

/// Run a lifecycle action.
///
/// POST /guardian/autotune/lifecycle/{action}
#[utoipa::path(
    post,
    path = "/guardian/autotune/lifecycle/{action}",
    tag = "lifecycle",
    params(
        ("action" = String, Path, description = "review, apply, reject, evaluate, or rollback")
    ),
    request_body = ActionRequestBody,
    responses(
        (status = 200, description = "Action applied or evaluation pending", body = ActionResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 404, description = "Proposal not found", body = ApiErrorBody),
        (status = 409, description = "Shadow mode, stale fingerprint, or illegal transition", body = ApiErrorBody),
        (status = 422, description = "Guardrail violation", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn run_action(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
    Json(body): Json<ActionRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let action = parse_action(&action)?;
    let request = body.into_request()?;
    tracing::info!(
        action = %action,
        proposal_id = %request.proposal_id,
        actor = %request.actor,
        "Lifecycle action requested"
    );

    let outcome = state
        .governance
        .lifecycle()
        .execute(action, &request, Utc::now())
        .await?;
    Ok(Json(ActionResponse::from(outcome)))
}

fn parse_action(value: &str) -> Result<LifecycleAction, ApiError> {
    LifecycleAction::ALL
        .into_iter()
        .find(|action| action.as_label() == value)
        .ok_or_else(|| {
            ApiError::bad_request(format!(
                "unknown action {value}; expected review, apply, reject, evaluate, or rollback"
            ))
        })
}
