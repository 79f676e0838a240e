//! API error types and HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use guardian_autotune::Error as GovernanceError;
use guardian_core::Error as CoreError;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Standard JSON error response body.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message (safe for clients).
    pub message: String,
    /// Optional error category (e.g., `unprocessable_entity`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Optional request ID for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// HTTP API error with stable machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    error: Option<&'static str>,
}

impl ApiError {
    /// Returns an error response for invalid input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Returns an error response for missing resources.
    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    /// Returns an error response for a state conflict the caller must resolve.
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    /// Returns an internal error response.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    /// Returns an unprocessable entity error response.
    pub fn unprocessable_entity(code: &'static str, message: impl Into<String>) -> Self {
        Self::new_with_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            code,
            message,
            Some("unprocessable_entity"),
        )
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the human-readable error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the stable machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self::new_with_error(status, code, message, None)
    }

    fn new_with_error(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        error: Option<&'static str>,
    ) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            error,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, message = %self.message, "request failed");
        }

        // The middleware echoes the id as a header; the body repeats it.
        (
            self.status,
            Json(ApiErrorBody {
                code: self.code.to_string(),
                message: self.message,
                error: self.error.map(str::to_string),
                request_id: crate::request_id::current(),
            }),
        )
            .into_response()
    }
}

impl From<GovernanceError> for ApiError {
    fn from(value: GovernanceError) -> Self {
        let code = value.code();
        let message = value.to_string();
        match value {
            GovernanceError::ProposalNotFound { .. } => Self::not_found(code, message),
            GovernanceError::ModeNotAssist { .. }
            | GovernanceError::ConcurrencyConflict { .. }
            | GovernanceError::InvalidTransition { .. } => Self::conflict(code, message),
            GovernanceError::GuardrailViolation { .. } | GovernanceError::InvalidConfig { .. } => {
                Self::unprocessable_entity(code, message)
            }
            GovernanceError::Core(core) => Self::from(core),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(value: CoreError) -> Self {
        let message = value.to_string();
        match value {
            CoreError::InvalidInput(message) => Self::bad_request(message),
            CoreError::AppendConflict { .. } => Self::conflict("APPEND_CONFLICT", message),
            CoreError::DuplicateEventId { .. } => Self::conflict("DUPLICATE_EVENT_ID", message),
            CoreError::EventIdGap { .. } => Self::conflict("EVENT_ID_GAP", message),
            CoreError::SchemaVersionMismatch { .. } => {
                Self::unprocessable_entity("SCHEMA_VERSION_MISMATCH", message)
            }
            CoreError::Storage { .. } => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE",
                message,
            ),
            _ => Self::internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardian_autotune::{LifecycleAction, ProposalStatus};

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn governance_errors_map_to_status_codes() {
        let cases: Vec<(GovernanceError, StatusCode, &str)> = vec![
            (
                GovernanceError::ProposalNotFound {
                    proposal_id: "atp_x".into(),
                },
                StatusCode::NOT_FOUND,
                "PROPOSAL_NOT_FOUND",
            ),
            (
                GovernanceError::ModeNotAssist {
                    mode: "shadow".into(),
                },
                StatusCode::CONFLICT,
                "MODE_NOT_ASSIST",
            ),
            (
                GovernanceError::conflict("atp_x", "stale fingerprint"),
                StatusCode::CONFLICT,
                "CONCURRENCY_CONFLICT",
            ),
            (
                GovernanceError::InvalidTransition {
                    proposal_id: "atp_x".into(),
                    from: ProposalStatus::Rejected,
                    action: LifecycleAction::Apply,
                },
                StatusCode::CONFLICT,
                "INVALID_TRANSITION",
            ),
            (
                GovernanceError::guardrail("atp_x", "step 2 exceeds 1"),
                StatusCode::UNPROCESSABLE_ENTITY,
                "GUARDRAIL_VIOLATION",
            ),
            (
                GovernanceError::invalid_config("horizon_hours must be >= 1"),
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_CONFIG",
            ),
            (
                GovernanceError::Core(CoreError::AppendConflict {
                    expected: 3,
                    actual: 4,
                }),
                StatusCode::CONFLICT,
                "APPEND_CONFLICT",
            ),
            (
                GovernanceError::Core(CoreError::SchemaVersionMismatch {
                    found: 1,
                    minimum: 2,
                }),
                StatusCode::UNPROCESSABLE_ENTITY,
                "SCHEMA_VERSION_MISMATCH",
            ),
            (
                GovernanceError::Core(CoreError::storage("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE",
            ),
            (
                GovernanceError::Core(CoreError::InvalidInput("bad".into())),
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
            ),
        ];

        for (err, status, code) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status(), status, "{code}");
            assert_eq!(api.code(), code);
        }
    }

    #[tokio::test]
    async fn body_uses_camel_case() {
        let err = ApiError::unprocessable_entity("GUARDRAIL_VIOLATION", "too far");
        let (status, body) = body_json(err).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "GUARDRAIL_VIOLATION");
        assert_eq!(body["message"], "too far");
        assert_eq!(body["error"], "unprocessable_entity");
    }

    #[tokio::test]
    async fn optional_fields_are_omitted() {
        let (_, body) = body_json(ApiError::bad_request("days must be >= 1")).await;
        assert!(body.get("error").is_none());
        assert!(body.get("requestId").is_none());
    }
}
