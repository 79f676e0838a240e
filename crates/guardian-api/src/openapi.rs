//! `OpenAPI` specification generation for `guardian-api`.

use utoipa::OpenApi;

/// `OpenAPI` documentation for the Guardian governance API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Guardian Autotune API",
        description = "Event-sourced governance of threshold proposals"
    ),
    paths(
        crate::routes::autotune::get_config,
        crate::routes::autotune::update_config,
        crate::routes::autotune::run_scan,
        crate::routes::autotune::check_consistency,
        crate::routes::lifecycle::get_latest,
        crate::routes::lifecycle::get_history,
        crate::routes::lifecycle::get_evaluation_logs,
        crate::routes::lifecycle::run_action,
        crate::routes::events::ingest_event,
        crate::routes::system::run_cycle,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::routes::autotune::ConfigResponse,
            crate::routes::autotune::UpdateConfigRequest,
            crate::routes::autotune::RunResponse,
            crate::routes::autotune::ConsistencyResponse,
            crate::routes::lifecycle::ActionRequestBody,
            crate::routes::lifecycle::ActionResponse,
            crate::routes::lifecycle::LatestResponse,
            crate::routes::lifecycle::HistoryResponse,
            crate::routes::lifecycle::EvaluationLogsResponse,
            crate::routes::events::IngestEventRequest,
            crate::routes::events::IngestEventResponse,
            crate::routes::system::CycleResponse,
        )
    ),
    tags(
        (name = "autotune", description = "Settings, scans and consistency checks"),
        (name = "lifecycle", description = "Proposal governance and audit"),
        (name = "events", description = "Observation ingest"),
        (name = "system", description = "System cycle"),
    ),
)]
pub struct ApiDoc;

/// Returns the generated `OpenAPI` spec.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Returns the generated `OpenAPI` spec serialized as pretty JSON.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn openapi_json() -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&openapi())
}
