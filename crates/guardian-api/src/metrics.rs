//! HTTP metrics for the Guardian API.
//!
//! Requests are labelled by the governance action they perform rather than
//! by raw path, so `/guardian/autotune/lifecycle/apply` and `.../reject`
//! land in separate series while unknown action segments collapse into one.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `guardian_api_requests_total` | Counter | `action`, `method`, `status_class` |
//! | `guardian_api_request_duration_seconds` | Histogram | `action`, `method`, `status_class` |
//!
//! Governance metrics from `guardian-autotune` render on the same `/metrics`.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Request};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use guardian_autotune::LifecycleAction;

/// Request counter.
pub const API_REQUESTS_TOTAL: &str = "guardian_api_requests_total";

/// Request duration histogram.
pub const API_REQUEST_DURATION_SECONDS: &str = "guardian_api_request_duration_seconds";

const LIFECYCLE_ACTION_ROUTE: &str = "/guardian/autotune/lifecycle/:action";
const SLOW_REQUEST: Duration = Duration::from_secs(1);

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder once and returns its handle.
///
/// # Panics
///
/// Panics if the recorder cannot be installed. The server does not start
/// without metrics.
#[allow(clippy::panic)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .unwrap_or_else(|e| panic!("failed to install prometheus recorder: {e}"));

            describe_counter!(API_REQUESTS_TOTAL, "API requests by governance action");
            describe_histogram!(
                API_REQUEST_DURATION_SECONDS,
                "API request duration in seconds by governance action"
            );
            guardian_autotune::metrics::register_metrics();

            tracing::info!("Prometheus metrics recorder initialized");
            handle
        })
        .clone()
}

/// Governance action a request performs, derived from its matched route.
///
/// Lifecycle actions resolve to their own label. An action segment that is
/// not a lifecycle action is labelled `unknown_action` so arbitrary paths
/// cannot mint new series.
#[must_use]
pub fn governance_action(route: Option<&str>, method: &Method, path: &str) -> &'static str {
    let Some(route) = route else {
        return "unmatched";
    };
    match route {
        "/guardian/autotune/config" if *method == Method::PUT => "config_update",
        "/guardian/autotune/config" => "config_read",
        "/guardian/autotune/run" => "scan",
        "/guardian/autotune/consistency" => "consistency_check",
        "/guardian/autotune/lifecycle/latest"
        | "/guardian/autotune/lifecycle/history"
        | "/guardian/autotune/evaluation/logs" => "audit",
        LIFECYCLE_ACTION_ROUTE => {
            let segment = path.rsplit('/').next().unwrap_or_default();
            LifecycleAction::ALL
                .into_iter()
                .map(LifecycleAction::as_label)
                .find(|label| *label == segment)
                .unwrap_or("unknown_action")
        }
        "/guardian/events" => "ingest",
        "/sys/cycle" => "cycle",
        "/health" | "/ready" | "/metrics" => "system",
        _ => "other",
    }
}

/// Middleware that records request count and latency per governance action.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let action = governance_action(
        request.extensions().get::<MatchedPath>().map(MatchedPath::as_str),
        &method,
        request.uri().path(),
    );

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let labels = [
        ("action", action.to_string()),
        ("method", method.to_string()),
        ("status_class", status_class(response.status()).to_string()),
    ];
    counter!(API_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(API_REQUEST_DURATION_SECONDS, &labels).record(elapsed.as_secs_f64());

    if elapsed > SLOW_REQUEST {
        tracing::warn!(
            action,
            %method,
            status = response.status().as_u16(),
            duration_secs = elapsed.as_secs_f64(),
            "slow governance request"
        );
    }
    response
}

fn status_class(status: StatusCode) -> &'static str {
    if status.is_success() {
        "2xx"
    } else if status.is_client_error() {
        "4xx"
    } else if status.is_server_error() {
        "5xx"
    } else if status.is_redirection() {
        "3xx"
    } else {
        "1xx"
    }
}

/// `GET /metrics`: Prometheus text, or 503 before the recorder exists.
pub async fn serve_metrics() -> impl IntoResponse {
    let content_type = [("content-type", "text/plain; charset=utf-8")];
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (StatusCode::OK, content_type, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            content_type,
            "Metrics not initialized".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::routing::post;
    use tower::ServiceExt;

    #[test]
    fn test_status_class() {
        assert_eq!(status_class(StatusCode::OK), "2xx");
        assert_eq!(status_class(StatusCode::CREATED), "2xx");
        assert_eq!(status_class(StatusCode::CONFLICT), "4xx");
        assert_eq!(status_class(StatusCode::SERVICE_UNAVAILABLE), "5xx");
    }

    #[test]
    fn test_routes_map_to_governance_actions() {
        let cases = [
            (Some("/guardian/autotune/config"), Method::GET, "/guardian/autotune/config", "config_read"),
            (Some("/guardian/autotune/config"), Method::PUT, "/guardian/autotune/config", "config_update"),
            (Some("/guardian/autotune/run"), Method::POST, "/guardian/autotune/run", "scan"),
            (Some(LIFECYCLE_ACTION_ROUTE), Method::POST, "/guardian/autotune/lifecycle/rollback", "rollback"),
            (Some(LIFECYCLE_ACTION_ROUTE), Method::POST, "/guardian/autotune/lifecycle/approve", "unknown_action"),
            (Some("/guardian/autotune/evaluation/logs"), Method::GET, "/guardian/autotune/evaluation/logs", "audit"),
            (Some("/guardian/events"), Method::POST, "/guardian/events", "ingest"),
            (Some("/sys/cycle"), Method::POST, "/sys/cycle", "cycle"),
            (None, Method::GET, "/missing", "unmatched"),
        ];
        for (route, method, path, expected) in cases {
            assert_eq!(governance_action(route, &method, path), expected, "{path}");
        }
    }

    #[tokio::test]
    async fn test_lifecycle_requests_are_labelled_by_action() {
        let handle = init_metrics();
        let app = Router::new()
            .route(LIFECYCLE_ACTION_ROUTE, post(|| async { StatusCode::OK }))
            .route_layer(axum::middleware::from_fn(metrics_middleware));

        for action in ["apply", "reject", "nonsense"] {
            let request = Request::builder()
                .method(Method::POST)
                .uri(format!("/guardian/autotune/lifecycle/{action}"))
                .body(Body::empty())
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let rendered = handle.render();
        let lines: Vec<&str> = rendered
            .lines()
            .filter(|line| line.starts_with(API_REQUESTS_TOTAL))
            .collect();
        assert!(lines.iter().any(|line| line.contains("action=\"apply\"")));
        assert!(lines.iter().any(|line| line.contains("action=\"reject\"")));
        assert!(lines.iter().any(|line| line.contains("action=\"unknown_action\"")));
        assert!(lines.iter().all(|line| !line.contains("nonsense")));
    }
}
