//! HTTP route handlers.

pub mod autotune;
pub mod events;
pub mod lifecycle;
pub mod system;

use std::sync::Arc;

use axum::Router;

use crate::server::AppState;

/// Governance and system routes.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(autotune::routes())
        .merge(lifecycle::routes())
        .merge(events::routes())
        .merge(system::routes())
}
