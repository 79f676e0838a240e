//! Observability metrics for governance.
//!
//! Metrics go through the `metrics` crate facade; the API binary installs
//! a Prometheus recorder. Without a recorder every call is a no-op.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `guardian_events_appended_total` | Counter | `event_type` | Governance events written |
//! | `guardian_append_conflicts_total` | Counter | - | Lost optimistic-append races |
//! | `guardian_lifecycle_transitions_total` | Counter | `from_status`, `to_status` | Proposal transitions |
//! | `guardian_proposals_total` | Counter | `outcome` | Scan outcomes per target |
//! | `guardian_evaluation_runs_total` | Counter | `status` | Scheduler ticks |
//! | `guardian_replay_divergence_total` | Counter | - | Failed consistency checks |
//! | `guardian_scheduler_tick_duration_seconds` | Histogram | - | Scheduler tick time |

use std::time::{Duration, Instant};

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: governance events written.
    pub const EVENTS_APPENDED_TOTAL: &str = "guardian_events_appended_total";
    /// Counter: appends that lost the expected-tail race.
    pub const APPEND_CONFLICTS_TOTAL: &str = "guardian_append_conflicts_total";
    /// Counter: proposal status transitions.
    pub const LIFECYCLE_TRANSITIONS_TOTAL: &str = "guardian_lifecycle_transitions_total";
    /// Counter: scan outcomes.
    pub const PROPOSALS_TOTAL: &str = "guardian_proposals_total";
    /// Counter: scheduler ticks by status.
    pub const EVALUATION_RUNS_TOTAL: &str = "guardian_evaluation_runs_total";
    /// Counter: consistency checks that found divergence.
    pub const REPLAY_DIVERGENCE_TOTAL: &str = "guardian_replay_divergence_total";
    /// Histogram: scheduler tick time in seconds.
    pub const SCHEDULER_TICK_DURATION_SECONDS: &str = "guardian_scheduler_tick_duration_seconds";
}

/// Label keys used across metrics.
pub mod labels {
    /// Event type.
    pub const EVENT_TYPE: &str = "event_type";
    /// Status before a transition.
    pub const FROM_STATUS: &str = "from_status";
    /// Status after a transition.
    pub const TO_STATUS: &str = "to_status";
    /// Scan outcome (`proposed` or a skip reason).
    pub const OUTCOME: &str = "outcome";
    /// Run status.
    pub const STATUS: &str = "status";
}

/// Registers metric descriptions with the installed recorder.
///
/// Call once after the recorder is installed.
pub fn register_metrics() {
    describe_counter!(names::EVENTS_APPENDED_TOTAL, "Governance events written to the log");
    describe_counter!(
        names::APPEND_CONFLICTS_TOTAL,
        "Appends that lost the expected-tail race"
    );
    describe_counter!(
        names::LIFECYCLE_TRANSITIONS_TOTAL,
        "Proposal status transitions"
    );
    describe_counter!(names::PROPOSALS_TOTAL, "Proposal scan outcomes per target");
    describe_counter!(names::EVALUATION_RUNS_TOTAL, "Scheduler ticks by status");
    describe_counter!(
        names::REPLAY_DIVERGENCE_TOTAL,
        "Consistency checks that found divergence"
    );
    describe_histogram!(
        names::SCHEDULER_TICK_DURATION_SECONDS,
        "Duration of scheduler ticks in seconds"
    );
}

/// Recorder for governance metrics. Cheap to clone.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardianMetrics;

impl GuardianMetrics {
    /// Creates a recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Counts a committed governance event.
    pub fn record_append(&self, event_type: &str) {
        counter!(
            names::EVENTS_APPENDED_TOTAL,
            labels::EVENT_TYPE => event_type.to_string(),
        )
        .increment(1);
    }

    /// Counts a lost append race.
    pub fn record_append_conflict(&self) {
        counter!(names::APPEND_CONFLICTS_TOTAL).increment(1);
    }

    /// Counts a proposal transition. `from` is `none` for emission.
    pub fn record_transition(&self, from: &str, to: &str) {
        counter!(
            names::LIFECYCLE_TRANSITIONS_TOTAL,
            labels::FROM_STATUS => from.to_string(),
            labels::TO_STATUS => to.to_string(),
        )
        .increment(1);
    }

    /// Counts a per-target scan outcome.
    pub fn record_scan_outcome(&self, outcome: &str) {
        counter!(names::PROPOSALS_TOTAL, labels::OUTCOME => outcome.to_string()).increment(1);
    }

    /// Counts a scheduler tick.
    pub fn record_evaluation_run(&self, status: &str) {
        counter!(names::EVALUATION_RUNS_TOTAL, labels::STATUS => status.to_string()).increment(1);
    }

    /// Counts a detected divergence.
    pub fn record_divergence(&self) {
        counter!(names::REPLAY_DIVERGENCE_TOTAL).increment(1);
    }
}

/// Records elapsed time when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Starts timing.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

/// Times a scheduler tick into `guardian_scheduler_tick_duration_seconds`.
#[must_use]
pub fn time_scheduler_tick() -> TimingGuard<impl FnOnce(Duration)> {
    TimingGuard::new(|duration| {
        histogram!(names::SCHEDULER_TICK_DURATION_SECONDS).record(duration.as_secs_f64());
    })
}
