//! Autotune settings and manual maintenance routes.
//!
//! ## Routes
//!
//! - `GET  /guardian/autotune/config` - Live settings and thresholds
//! - `PUT  /guardian/autotune/config` - Patch settings
//! - `POST /guardian/autotune/run` - Run a proposal scan now
//! - `GET  /guardian/autotune/consistency` - Compare live state with a full replay

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use guardian_autotune::config::{AutoEvaluatePatch, GuardrailsPatch, TriggerPatch};
use guardian_autotune::{
    AutotuneConfig, AutotuneConfigPatch, AutotuneMode, ConsistencyReport, ScanOutcome, Thresholds,
};

use crate::error::{ApiError, ApiErrorBody};
use crate::server::AppState;

/// Actor recorded when a request does not name one.
pub(crate) const DEFAULT_ACTOR: &str = "api";

/// Trigger label for scans started over HTTP.
const MANUAL_TRIGGER: &str = "manual";

/// Live settings.
#[derive(Debug, Serialize, ToSchema)]
pub struct ConfigResponse {
    /// Autotune settings in force.
    #[schema(value_type = Object)]
    pub config: AutotuneConfig,
    /// Current value of every tunable threshold.
    #[schema(value_type = Object)]
    pub thresholds: Thresholds,
    /// Log position the settings were read at.
    pub version: u64,
}

/// Partial settings update. Omitted fields keep their current value.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateConfigRequest {
    /// Master switch.
    pub enabled: Option<bool>,
    /// `shadow` or `assist`.
    pub mode: Option<String>,
    /// LLM candidate generation switch.
    pub llm_enabled: Option<bool>,
    /// `lookback_days`, `min_event_count`, `cooldown_hours`.
    #[schema(value_type = Option<Object>)]
    pub trigger: Option<TriggerPatch>,
    /// `max_int_step`, `max_float_step`, `min_confidence`.
    #[schema(value_type = Option<Object>)]
    pub guardrails: Option<GuardrailsPatch>,
    /// `enabled`, `horizon_hours`, `lookback_days`, `max_targets_per_cycle`.
    #[schema(value_type = Option<Object>)]
    pub auto_evaluate: Option<AutoEvaluatePatch>,
    /// Who is changing the settings.
    pub actor: Option<String>,
}

impl UpdateConfigRequest {
    fn into_patch(self) -> Result<(AutotuneConfigPatch, String), ApiError> {
        let mode = self
            .mode
            .as_deref()
            .map(AutotuneMode::parse)
            .transpose()?;
        let patch = AutotuneConfigPatch {
            enabled: self.enabled,
            mode,
            llm_enabled: self.llm_enabled,
            trigger: self.trigger,
            guardrails: self.guardrails,
            auto_evaluate: self.auto_evaluate,
        };
        let actor = self.actor.unwrap_or_else(|| DEFAULT_ACTOR.to_string());
        Ok((patch, actor))
    }
}

/// Result of a manual proposal scan.
#[derive(Debug, Serialize, ToSchema)]
pub struct RunResponse {
    /// Scan outcome, including emitted proposals and skipped targets.
    #[schema(value_type = Object)]
    pub scan: ScanOutcome,
}

/// Result of a consistency check.
#[derive(Debug, Serialize, ToSchema)]
pub struct ConsistencyResponse {
    /// True when live state equals a full replay.
    pub consistent: bool,
    /// `ok` with the shared checksum, or `divergence` with field diffs.
    #[schema(value_type = Object)]
    pub report: ConsistencyReport,
}

/// Creates autotune routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/guardian/autotune/config",
            get(get_config).put(update_config),
        )
        .route("/guardian/autotune/run", post(run_scan))
        .route("/guardian/autotune/consistency", get(check_consistency))
}

/// Read live settings.
///
/// GET /guardian/autotune/config
#[utoipa::path(
    get,
    path = "/guardian/autotune/config",
    tag = "autotune",
    responses(
        (status = 200, description = "Live settings", body = ConfigResponse),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn get_config(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.governance.ledger().snapshot().await?;
    Ok(Json(ConfigResponse {
        config: snapshot.state.config,
        thresholds: snapshot.state.thresholds,
        version: snapshot.version,
    }))
}

/// Patch live settings.
///
/// PUT /guardian/autotune/config
#[utoipa::path(
    put,
    path = "/guardian/autotune/config",
    tag = "autotune",
    request_body = UpdateConfigRequest,
    responses(
        (status = 200, description = "Settings updated", body = ConfigResponse),
        (status = 409, description = "Concurrent append", body = ApiErrorBody),
        (status = 422, description = "Invalid settings", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateConfigRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (patch, actor) = req.into_patch()?;
    tracing::info!(actor = %actor, "Updating autotune config");

    state
        .governance
        .update_config(&patch, &actor, Utc::now())
        .await?;

    let snapshot = state.governance.ledger().snapshot().await?;
    Ok(Json(ConfigResponse {
        config: snapshot.state.config,
        thresholds: snapshot.state.thresholds,
        version: snapshot.version,
    }))
}

/// Run a proposal scan now.
///
/// POST /guardian/autotune/run
#[utoipa::path(
    post,
    path = "/guardian/autotune/run",
    tag = "autotune",
    responses(
        (status = 200, description = "Scan finished", body = RunResponse),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn run_scan(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let scan = state
        .governance
        .engine()
        .scan(MANUAL_TRIGGER, Utc::now())
        .await?;
    tracing::info!(
        proposed = scan.proposals.len(),
        skipped = scan.skipped.len(),
        "Manual scan finished"
    );
    Ok(Json(RunResponse { scan }))
}

/// Compare live state with a full replay.
///
/// GET /guardian/autotune/consistency
#[utoipa::path(
    get,
    path = "/guardian/autotune/consistency",
    tag = "autotune",
    responses(
        (status = 200, description = "Check finished", body = ConsistencyResponse),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn check_consistency(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.governance.validator().validate().await?;
    Ok(Json(ConsistencyResponse {
        consistent: report.is_ok(),
        report,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_request_maps_to_patch() {
        let req: UpdateConfigRequest = serde_json::from_value(serde_json::json!({
            "mode": "assist",
            "guardrails": { "max_int_step": 2 },
        }))
        .unwrap();
        let (patch, actor) = req.into_patch().unwrap();

        assert_eq!(patch.mode, Some(AutotuneMode::Assist));
        assert_eq!(patch.guardrails.unwrap().max_int_step, Some(2));
        assert!(patch.enabled.is_none());
        assert_eq!(actor, DEFAULT_ACTOR);
    }

    #[test]
    fn unknown_mode_is_unprocessable() {
        let req = UpdateConfigRequest {
            mode: Some("autopilot".into()),
            ..UpdateConfigRequest::default()
        };
        let err = req.into_patch().unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }
}
