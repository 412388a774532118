//! Core data models for the scaling controller

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ControlError, Result};

/// Identity of a monitored workload (`namespace/name`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadId {
    pub namespace: String,
    pub name: String,
}

impl WorkloadId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for WorkloadId {
    type Err = ControlError;

    /// Parses `namespace/name`; a bare `name` lands in the `default` namespace.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (namespace, name) = match s.split_once('/') {
            Some((ns, name)) => (ns, name),
            None => ("default", s),
        };
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return Err(ControlError::InvalidSpec(format!(
                "malformed workload identity '{}', expected namespace/name",
                s
            )));
        }
        Ok(Self::new(namespace, name))
    }
}

/// Declared resource requests and limits of the workload's main container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub cpu_request_millicores: Option<u64>,
    pub cpu_limit_millicores: Option<u64>,
    pub memory_request_bytes: Option<u64>,
    pub memory_limit_bytes: Option<u64>,
}

/// Snapshot of a workload's declared configuration, taken once per cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub id: WorkloadId,
    pub min_scale: u32,
    pub max_scale: u32,
    /// Replica count the workload is currently pinned to
    pub replicas: Option<u32>,
    pub resources: ResourceRequirements,
    /// Maximum in-flight requests per instance, 0 means unlimited
    pub container_concurrency: u32,
    /// Platform revision marker used for optimistic concurrency
    pub resource_version: Option<String>,
}

/// Point-in-time usage of a single workload instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub workload: WorkloadId,
    pub instance: String,
    pub timestamp: i64,
    pub cpu_usage_millicores: f64,
    pub memory_usage_bytes: f64,
    pub concurrency: Option<f64>,
    pub latency_ms: Option<f64>,
}

/// Samples gathered for one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsBatch {
    pub samples: Vec<MetricSample>,
    /// Instances that were ready and expected to report
    pub expected_instances: usize,
    /// Reporting instances whose request metrics could not be read
    #[serde(default)]
    pub incomplete_instances: usize,
}

impl MetricsBatch {
    pub fn new(samples: Vec<MetricSample>, expected_instances: usize) -> Self {
        Self {
            samples,
            expected_instances,
            incomplete_instances: 0,
        }
    }

    /// True when an expected instance is missing or reported only part of its metrics
    pub fn is_partial(&self) -> bool {
        self.samples.len() < self.expected_instances || self.incomplete_instances > 0
    }
}

/// Normalized model input, schema `v1`.
///
/// Field order is the wire order; see [`FeatureVector::to_array`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub cpu_utilization: f32,
    pub memory_utilization: f32,
    pub concurrency_per_instance: f32,
    pub latency: f32,
    pub ready_instance_ratio: f32,
    pub replica_ratio: f32,
    pub cpu_request: f32,
    pub cpu_limit: f32,
    pub memory_request: f32,
    pub memory_limit: f32,
    pub container_concurrency: f32,
    pub partial_data: bool,
}

impl FeatureVector {
    pub fn to_array(&self) -> [f32; 12] {
        [
            self.cpu_utilization,
            self.memory_utilization,
            self.concurrency_per_instance,
            self.latency,
            self.ready_instance_ratio,
            self.replica_ratio,
            self.cpu_request,
            self.cpu_limit,
            self.memory_request,
            self.memory_limit,
            self.container_concurrency,
            if self.partial_data { 1.0 } else { 0.0 },
        ]
    }
}

/// Signed change to the declared resources
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDelta {
    #[serde(default)]
    pub cpu_request_millicores: i64,
    #[serde(default)]
    pub cpu_limit_millicores: i64,
    #[serde(default)]
    pub memory_request_bytes: i64,
    #[serde(default)]
    pub memory_limit_bytes: i64,
}

impl ResourceDelta {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Action produced by the decision model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingAction {
    pub replicas: Option<u32>,
    pub resources: Option<ResourceDelta>,
    pub confidence: f32,
}

impl ScalingAction {
    pub fn noop() -> Self {
        Self {
            replicas: None,
            resources: None,
            confidence: 1.0,
        }
    }

    pub fn replicas(target: u32) -> Self {
        Self {
            replicas: Some(target),
            ..Self::noop()
        }
    }

    /// An action is actionable when at least one of its fields requests a change
    pub fn is_actionable(&self) -> bool {
        self.replicas.is_some() || self.resources.map(|d| !d.is_zero()).unwrap_or(false)
    }
}

/// Minimal change submitted to the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    pub resource_version: Option<String>,
    pub replicas: Option<u32>,
    pub resources: Option<ResourceRequirements>,
}

/// Outcome of submitting a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyResult {
    Applied(Mutation),
    Rejected { reason: String },
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_id_parsing() {
        let id: WorkloadId = "prod/checkout".parse().unwrap();
        assert_eq!(id, WorkloadId::new("prod", "checkout"));
        assert_eq!(id.to_string(), "prod/checkout");

        let bare: WorkloadId = "hello".parse().unwrap();
        assert_eq!(bare.namespace, "default");

        assert!("/hello".parse::<WorkloadId>().is_err());
        assert!("a/b/c".parse::<WorkloadId>().is_err());
        assert!("".parse::<WorkloadId>().is_err());
    }

    #[test]
    fn test_batch_partial_flag() {
        let sample = MetricSample {
            workload: WorkloadId::new("default", "hello"),
            instance: "pod-1".to_string(),
            timestamp: 0,
            cpu_usage_millicores: 100.0,
            memory_usage_bytes: 1024.0,
            concurrency: None,
            latency_ms: None,
        };

        assert!(!MetricsBatch::new(vec![], 0).is_partial());
        assert!(MetricsBatch::new(vec![], 2).is_partial());
        assert!(MetricsBatch::new(vec![sample.clone()], 2).is_partial());
        assert!(!MetricsBatch::new(vec![sample.clone()], 1).is_partial());

        let mut incomplete = MetricsBatch::new(vec![sample], 1);
        incomplete.incomplete_instances = 1;
        assert!(incomplete.is_partial());
    }

    #[test]
    fn test_action_actionable() {
        assert!(!ScalingAction::noop().is_actionable());
        assert!(ScalingAction::replicas(3).is_actionable());

        let zero_delta = ScalingAction {
            resources: Some(ResourceDelta::default()),
            ..ScalingAction::noop()
        };
        assert!(!zero_delta.is_actionable());
    }
}
