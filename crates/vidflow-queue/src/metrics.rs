//! Prometheus metrics shared by workers and the orchestrator.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::envelope::PublishOutcome;
use crate::error::{QueueError, QueueResult};

/// Metric names as constants for consistency.
pub mod names {
    // Queue metrics
    pub const MESSAGES_PUBLISHED_TOTAL: &str = "vidflow_messages_published_total";
    pub const DELIVERIES_SETTLED_TOTAL: &str = "vidflow_deliveries_settled_total";

    // Stage worker metrics
    pub const STAGE_RUNS_TOTAL: &str = "vidflow_stage_runs_total";
    pub const STAGE_DURATION_SECONDS: &str = "vidflow_stage_duration_seconds";

    // Orchestrator metrics
    pub const TRANSITIONS_TOTAL: &str = "vidflow_transitions_total";
    pub const STAGE_RETRIES_SCHEDULED_TOTAL: &str = "vidflow_stage_retries_scheduled_total";
    pub const ORCHESTRATOR_EVENTS_TOTAL: &str = "vidflow_orchestrator_events_total";
}

/// Start the Prometheus exporter on `addr`.
pub fn install_exporter(addr: SocketAddr) -> QueueResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| QueueError::invalid_config(format!("metrics exporter: {}", e)))
}

/// Start the exporter when `METRICS_ADDR` is set. Returns the bound address.
pub fn install_exporter_from_env() -> QueueResult<Option<SocketAddr>> {
    let Ok(raw) = std::env::var("METRICS_ADDR") else {
        return Ok(None);
    };
    let addr: SocketAddr = raw
        .parse()
        .map_err(|_| QueueError::invalid_config(format!("METRICS_ADDR is not an address: {}", raw)))?;
    install_exporter(addr)?;
    Ok(Some(addr))
}

pub fn record_publish(queue: &str, outcome: PublishOutcome) {
    let labels = [
        ("queue", queue.to_string()),
        ("outcome", outcome.as_str().to_string()),
    ];
    counter!(names::MESSAGES_PUBLISHED_TOTAL, &labels).increment(1);
}

pub fn record_settlement(queue: &str, settlement: &str) {
    let labels = [
        ("queue", queue.to_string()),
        ("settlement", settlement.to_string()),
    ];
    counter!(names::DELIVERIES_SETTLED_TOTAL, &labels).increment(1);
}

pub fn record_stage_run(stage: &str, success: bool, duration_secs: f64) {
    let labels = [
        ("stage", stage.to_string()),
        ("result", if success { "success" } else { "failure" }.to_string()),
    ];
    counter!(names::STAGE_RUNS_TOTAL, &labels).increment(1);
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_transition(from: &str, to: &str) {
    let labels = [("from", from.to_string()), ("to", to.to_string())];
    counter!(names::TRANSITIONS_TOTAL, &labels).increment(1);
}

pub fn record_stage_retry_scheduled(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!(names::STAGE_RETRIES_SCHEDULED_TOTAL, &labels).increment(1);
}

/// Count one handled orchestrator event by outcome
/// (`advanced`, `completed`, `retry`, `failed`, `discarded`).
pub fn record_orchestrator_outcome(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::ORCHESTRATOR_EVENTS_TOTAL, &labels).increment(1);
}
