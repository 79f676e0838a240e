//! Logging initialization and span helpers.
//!
//! All binaries call [`init_logging`] once at startup. Governance code opens
//! spans through the helpers below so log lines carry consistent fields.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Safe to call multiple times; subsequent calls are no-ops. `RUST_LOG`
/// controls levels (default `info`).
///
/// ```rust
/// use guardian_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // try_init: a test harness may already have installed a subscriber.
        let _ = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init(),
        };
    });
}

/// Creates a span for a lifecycle operation on one proposal.
#[must_use]
pub fn governance_span(operation: &str, proposal_id: &str) -> Span {
    tracing::info_span!("governance", op = operation, proposal_id = proposal_id)
}

/// Creates a span for a replay or projection pass.
#[must_use]
pub fn replay_span(operation: &str, from_id: u64) -> Span {
    tracing::info_span!("replay", op = operation, from_id = from_id)
}
