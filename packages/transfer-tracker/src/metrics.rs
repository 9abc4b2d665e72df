//! Prometheus metrics for the transfer tracker
//!
//! Exposed on the /metrics endpoint of the status server.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_int_counter, register_int_gauge, CounterVec,
    Gauge, IntCounter, IntGauge,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;
use transfer_pipeline::{
    ActionOutcome, ErrorReporter, EventBus, GatewayError, NetworkId, PipelineError,
    PipelineEvent, TracingReporter,
};

lazy_static! {
    pub static ref ACTIVE_PIPELINES: IntGauge = register_int_gauge!(
        "tracker_active_pipelines",
        "Number of running transfer pipelines"
    ).unwrap();

    pub static ref PHASE_TRANSITIONS: CounterVec = register_counter_vec!(
        "tracker_phase_transitions_total",
        "Phase status changes observed across pipelines",
        &["topology", "phase", "status"]
    ).unwrap();

    pub static ref ACTION_OUTCOMES: CounterVec = register_counter_vec!(
        "tracker_action_outcomes_total",
        "Results of prepare, broadcast, release and bounty actions",
        &["action", "outcome"]
    ).unwrap();

    pub static ref PIPELINE_ERRORS: CounterVec = register_counter_vec!(
        "tracker_pipeline_errors_total",
        "Errors reported at pipeline action boundaries",
        &["topology", "operation", "class"]
    ).unwrap();

    pub static ref GATEWAY_ERRORS: CounterVec = register_counter_vec!(
        "tracker_gateway_errors_total",
        "Failed gateway calls",
        &["network", "class"]
    ).unwrap();

    pub static ref TRACK_FAILURES: IntCounter = register_int_counter!(
        "tracker_track_failures_total",
        "Transfer paths that could not be entered"
    ).unwrap();

    pub static ref LAST_REFRESH: Gauge = register_gauge!(
        "tracker_last_refresh_timestamp",
        "Unix time of the last pipeline summary update"
    ).unwrap();

    pub static ref UP: Gauge = register_gauge!(
        "tracker_up",
        "Whether the tracker is up (1) or down (0)"
    ).unwrap();
}

/// Topology part of a `topology:identity` pipeline key
fn topology_label(pipeline: &str) -> &str {
    pipeline.split(':').next().unwrap_or(pipeline)
}

pub fn record_gateway_error(network: &NetworkId, error: &GatewayError) {
    GATEWAY_ERRORS
        .with_label_values(&[&network.to_string(), error.class().as_str()])
        .inc();
}

pub fn record_action(action: &str, outcome: &ActionOutcome) {
    ACTION_OUTCOMES
        .with_label_values(&[action, outcome.as_str()])
        .inc();
}

pub fn record_action_error(action: &str) {
    ACTION_OUTCOMES.with_label_values(&[action, "error"]).inc();
}

pub fn set_up(up: bool) {
    UP.set(if up { 1.0 } else { 0.0 });
}

/// Counts reported errors, then logs them the usual way
#[derive(Debug, Default)]
pub struct MetricsReporter {
    inner: TracingReporter,
}

impl ErrorReporter for MetricsReporter {
    fn report(&self, pipeline: &str, operation: &str, error: &PipelineError) {
        PIPELINE_ERRORS
            .with_label_values(&[topology_label(pipeline), operation, error.class().as_str()])
            .inc();
        self.inner.report(pipeline, operation, error);
    }
}

/// Feed pipeline events into the phase and refresh metrics
pub fn spawn_event_metrics(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(PipelineEvent::PhaseChanged { key, phase, status }) => {
                    PHASE_TRANSITIONS
                        .with_label_values(&[key.topology.as_str(), phase.as_str(), status.as_str()])
                        .inc();
                }
                Ok(PipelineEvent::Updated(summary)) => {
                    LAST_REFRESH.set(summary.updated_at.timestamp() as f64);
                }
                Ok(PipelineEvent::Disposed(_)) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Metrics lagged behind pipeline events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
