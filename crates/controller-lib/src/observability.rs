//! Observability infrastructure for the scaling controller
//!
//! Provides:
//! - Prometheus metrics (cycle outcomes, failure kinds, latencies, backoff)
//! - Structured JSON logging of control-loop events with tracing

use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, Histogram, HistogramVec, IntCounterVec, IntGauge,
    IntGaugeVec, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    cycles_total: IntCounterVec,
    cycle_failures_total: IntCounterVec,
    cycle_duration_seconds: HistogramVec,
    decision_latency_seconds: Histogram,
    backoff_seconds: IntGaugeVec,
    replica_target: IntGaugeVec,
    workloads_monitored: IntGauge,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            cycles_total: register_int_counter_vec!(
                "scaling_controller_cycles_total",
                "Completed control cycles by outcome",
                &["workload", "outcome"]
            )
            .expect("Failed to register cycles_total"),

            cycle_failures_total: register_int_counter_vec!(
                "scaling_controller_cycle_failures_total",
                "Failed control cycles by failure kind",
                &["workload", "kind"]
            )
            .expect("Failed to register cycle_failures_total"),

            cycle_duration_seconds: register_histogram_vec!(
                "scaling_controller_cycle_duration_seconds",
                "Wall time of one control cycle",
                &["workload"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            decision_latency_seconds: register_histogram!(
                "scaling_controller_decision_latency_seconds",
                "Round trip to the decision endpoint",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register decision_latency_seconds"),

            backoff_seconds: register_int_gauge_vec!(
                "scaling_controller_backoff_seconds",
                "Current error backoff delay",
                &["workload"]
            )
            .expect("Failed to register backoff_seconds"),

            replica_target: register_int_gauge_vec!(
                "scaling_controller_replica_target",
                "Replica count last applied by the controller",
                &["workload"]
            )
            .expect("Failed to register replica_target"),

            workloads_monitored: register_int_gauge!(
                "scaling_controller_workloads_monitored",
                "Number of workloads with a running control loop"
            )
            .expect("Failed to register workloads_monitored"),
        }
    }
}

/// Controller metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct ControllerMetrics {
    _private: (),
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new)
    }

    pub fn record_cycle(&self, workload: &str, outcome: &str, duration_secs: f64) {
        let inner = self.inner();
        inner
            .cycles_total
            .with_label_values(&[workload, outcome])
            .inc();
        inner
            .cycle_duration_seconds
            .with_label_values(&[workload])
            .observe(duration_secs);
    }

    pub fn record_failure(&self, workload: &str, kind: &str) {
        self.inner()
            .cycle_failures_total
            .with_label_values(&[workload, kind])
            .inc();
    }

    pub fn observe_decision_latency(&self, duration_secs: f64) {
        self.inner().decision_latency_seconds.observe(duration_secs);
    }

    pub fn set_backoff(&self, workload: &str, secs: u64) {
        self.inner()
            .backoff_seconds
            .with_label_values(&[workload])
            .set(secs.min(i64::MAX as u64) as i64);
    }

    pub fn set_replica_target(&self, workload: &str, replicas: u32) {
        self.inner()
            .replica_target
            .with_label_values(&[workload])
            .set(i64::from(replicas));
    }

    pub fn set_workloads_monitored(&self, count: i64) {
        self.inner().workloads_monitored.set(count);
    }

    /// Render every registered metric in the Prometheus text format
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let families = prometheus::gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Structured logger for controller events
#[derive(Clone)]
pub struct StructuredLogger {
    controller_id: String,
}

impl StructuredLogger {
    pub fn new(controller_id: impl Into<String>) -> Self {
        Self {
            controller_id: controller_id.into(),
        }
    }

    pub fn log_startup(&self, version: &str, workloads: usize) {
        info!(
            event = "controller_started",
            controller = %self.controller_id,
            controller_version = %version,
            workloads = workloads,
            "Scaling controller started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            controller = %self.controller_id,
            reason = %reason,
            "Scaling controller shutting down"
        );
    }

    pub fn log_cycle_completed(
        &self,
        workload: &str,
        cycle: u64,
        outcome: &str,
        replicas: Option<u32>,
        confidence: f32,
        duration_ms: u64,
    ) {
        info!(
            event = "cycle_completed",
            controller = %self.controller_id,
            workload = %workload,
            cycle = cycle,
            outcome = %outcome,
            replicas = ?replicas,
            confidence = confidence,
            duration_ms = duration_ms,
            "Control cycle completed"
        );
    }

    pub fn log_cycle_failed(
        &self,
        workload: &str,
        cycle: u64,
        kind: &str,
        error: &str,
        backoff_ms: u64,
    ) {
        warn!(
            event = "cycle_failed",
            controller = %self.controller_id,
            workload = %workload,
            cycle = cycle,
            kind = %kind,
            error = %error,
            backoff_ms = backoff_ms,
            "Control cycle failed, backing off"
        );
    }

    pub fn log_drift(&self, workload: &str, expected: &str, observed: &str) {
        warn!(
            event = "drift_detected",
            controller = %self.controller_id,
            workload = %workload,
            expected = %expected,
            observed = %observed,
            "Declared spec diverged from last applied target"
        );
    }

    pub fn log_action_held(&self, workload: &str, requested: u32, current: u32, reason: &str) {
        info!(
            event = "action_held",
            controller = %self.controller_id,
            workload = %workload,
            requested_replicas = requested,
            current_replicas = current,
            reason = %reason,
            "Replica change held back"
        );
    }
}
