//! Feature construction for the decision model
//!
//! Turns the fetched spec and the cycle's metrics batch into the fixed-shape
//! vector the model was trained on. Everything is normalized to `[0, 1]`;
//! values that could not be observed are set to [`SENTINEL`].

use crate::collector::aggregate;
use crate::error::{ControlError, Result};
use crate::models::{FeatureVector, MetricsBatch, WorkloadSpec};

/// Number of features in schema `v1`
pub const NUM_FEATURES: usize = 12;

/// Feature schema understood by the decision endpoint
pub const SCHEMA_VERSION: &str = "v1";

/// Wire order of the features
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "cpu_utilization",
    "memory_utilization",
    "concurrency_per_instance",
    "latency",
    "ready_instance_ratio",
    "replica_ratio",
    "cpu_request",
    "cpu_limit",
    "memory_request",
    "memory_limit",
    "container_concurrency",
    "partial_data",
];

/// Placeholder for a value that was not observed
pub const SENTINEL: f32 = -1.0;

/// Utilization above this fraction of the request saturates
const MAX_UTILIZATION: f64 = 2.0;

const MAX_CONCURRENCY: f64 = 1000.0;

const MAX_LATENCY_MS: f64 = 10_000.0;

/// Builds feature vectors from specs and metrics
pub struct FeatureBuilder {
    max_cpu_millicores: f64,
    max_memory_bytes: f64,
}

impl FeatureBuilder {
    pub fn new() -> Self {
        Self {
            max_cpu_millicores: 16_000.0,
            max_memory_bytes: 64.0 * 1024.0 * 1024.0 * 1024.0,
        }
    }

    /// Build the feature vector for one cycle
    pub fn build(&self, spec: &WorkloadSpec, batch: &MetricsBatch) -> Result<FeatureVector> {
        let replicas = spec.replicas.ok_or_else(|| {
            ControlError::InvalidSpec(format!("{} has no pinned replica count", spec.id))
        })?;
        let cpu_request = spec.resources.cpu_request_millicores.ok_or_else(|| {
            ControlError::InvalidSpec(format!("{} declares no CPU request", spec.id))
        })?;
        let memory_request = spec.resources.memory_request_bytes.ok_or_else(|| {
            ControlError::InvalidSpec(format!("{} declares no memory request", spec.id))
        })?;
        if spec.max_scale == 0 || spec.max_scale < spec.min_scale {
            return Err(ControlError::InvalidSpec(format!(
                "{} has inconsistent scale bounds [{}, {}]",
                spec.id, spec.min_scale, spec.max_scale
            )));
        }

        let usage = aggregate(&batch.samples, &spec.resources);
        let max_scale = f64::from(spec.max_scale);

        let concurrency_capacity = if spec.container_concurrency > 0 {
            f64::from(spec.container_concurrency)
        } else {
            MAX_CONCURRENCY
        };

        Ok(FeatureVector {
            cpu_utilization: observed(usage.cpu_utilization, MAX_UTILIZATION),
            memory_utilization: observed(usage.memory_utilization, MAX_UTILIZATION),
            concurrency_per_instance: observed(usage.concurrency, concurrency_capacity),
            latency: observed(usage.latency_ms, MAX_LATENCY_MS),
            ready_instance_ratio: ratio(batch.expected_instances as f64, max_scale),
            replica_ratio: ratio(f64::from(replicas), max_scale),
            cpu_request: ratio(cpu_request as f64, self.max_cpu_millicores),
            cpu_limit: observed(
                spec.resources.cpu_limit_millicores.map(|v| v as f64),
                self.max_cpu_millicores,
            ),
            memory_request: ratio(memory_request as f64, self.max_memory_bytes),
            memory_limit: observed(
                spec.resources.memory_limit_bytes.map(|v| v as f64),
                self.max_memory_bytes,
            ),
            container_concurrency: ratio(f64::from(spec.container_concurrency), MAX_CONCURRENCY),
            partial_data: batch.is_partial(),
        })
    }
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn ratio(value: f64, max: f64) -> f32 {
    (value / max).clamp(0.0, 1.0) as f32
}

fn observed(value: Option<f64>, max: f64) -> f32 {
    value.map(|v| ratio(v, max)).unwrap_or(SENTINEL)
}
