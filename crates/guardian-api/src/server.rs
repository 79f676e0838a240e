//! API server implementation.
//!
//! Provides health, ready, metrics, and the governance endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use guardian_autotune::{Governance, GovernanceOptions};
use guardian_core::{EventRepository, FileRepository, Result};

use crate::config::Config;

// ============================================================================
// Health and Ready Responses
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ReadyResponse {
    /// Service readiness status.
    pub ready: bool,
    /// Log position the live state has caught up to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Optional message about readiness state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Governance components over the event log.
    pub governance: Arc<Governance>,
}

impl AppState {
    /// Creates application state.
    #[must_use]
    pub const fn new(config: Config, governance: Arc<Governance>) -> Self {
        Self { config, governance }
    }
}

/// Opens governance over the log selected by `config`.
///
/// Uses the JSONL backend under `data_dir` when set and an in-memory log
/// otherwise.
///
/// # Errors
///
/// Returns an error if the log directory cannot be opened or replayed.
pub async fn open_governance(config: &Config) -> guardian_autotune::Result<Governance> {
    let options = GovernanceOptions {
        baseline: config.baseline(),
        snapshot_interval: config.snapshot_interval,
        ..GovernanceOptions::default()
    };

    match config.data_dir.as_deref() {
        Some(dir) => {
            let repo: Arc<dyn EventRepository> = Arc::new(FileRepository::open(dir).await?);
            tracing::info!(data_dir = %dir.display(), "Using JSONL event log");
            Governance::open(repo, options).await
        }
        None => {
            tracing::warn!("GUARDIAN_DATA_DIR not set; using in-memory event log");
            Governance::in_memory(options)
        }
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Health check endpoint handler.
///
/// Shallow liveness check; does not touch the event log.
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness check endpoint handler.
///
/// Ready once the live state has caught up with the event log.
async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.governance.ledger().refresh().await {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                version: Some(snapshot.version),
                message: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                version: None,
                message: Some(format!("event log unavailable: {e}")),
            }),
        ),
    }
}

// ============================================================================
// Server
// ============================================================================

/// The Guardian API server.
#[derive(Debug)]
pub struct Server {
    config: Config,
    governance: Arc<Governance>,
}

impl Server {
    /// Creates a server over existing governance.
    #[must_use]
    pub const fn new(config: Config, governance: Arc<Governance>) -> Self {
        Self { config, governance }
    }

    /// Creates a server over the log selected by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the event log cannot be opened.
    pub async fn open(config: Config) -> guardian_autotune::Result<Self> {
        let governance = open_governance(&config).await?;
        Ok(Self::new(config, Arc::new(governance)))
    }

    /// Returns the server configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Creates the router with all routes and middleware.
    fn create_router(&self) -> Router {
        let state = Arc::new(AppState::new(
            self.config.clone(),
            Arc::clone(&self.governance),
        ));
        let metrics_layer = middleware::from_fn(crate::metrics::metrics_middleware);

        Router::new()
            .route("/health", get(health))
            .route("/ready", get(ready))
            .route("/metrics", get(crate::metrics::serve_metrics))
            .merge(crate::routes::api_routes())
            // Request id outermost so trace spans and error bodies carry it,
            // then metrics for timing, then trace.
            .layer(TraceLayer::new_for_http())
            .layer(metrics_layer)
            .layer(middleware::from_fn(crate::request_id::request_id_middleware))
            .with_state(state)
    }

    /// Starts the server and blocks until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot start or bind to the port.
    pub async fn serve(&self) -> Result<()> {
        crate::metrics::init_metrics();

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = self.create_router();

        tracing::info!(
            http_port = self.config.http_port,
            persistent = self.config.data_dir.is_some(),
            "Starting Guardian API server"
        );

        let listener =
            tokio::net::TcpListener::bind(addr)
                .await
                .map_err(|e| guardian_core::Error::Internal {
                    message: format!("failed to bind to {addr}: {e}"),
                })?;

        axum::serve(listener, router)
            .await
            .map_err(|e| guardian_core::Error::Internal {
                message: format!("server error: {e}"),
            })?;

        Ok(())
    }

    /// Creates a router without binding a port.
    ///
    /// Intended for integration tests.
    #[doc(hidden)]
    pub fn test_router(&self) -> Router {
        self.create_router()
    }
}
