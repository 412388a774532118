//! Aggregation of per-instance samples
//!
//! Utilization is the arithmetic mean of per-instance usage over the declared
//! request. With no reporting instance every field stays `None` so the feature
//! builder can sentinel-fill it; zero utilization is a real observation.

use crate::models::{MetricSample, ResourceRequirements};

/// Aggregated usage across the instances that reported
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedUsage {
    pub cpu_utilization: Option<f64>,
    pub memory_utilization: Option<f64>,
    pub concurrency: Option<f64>,
    pub latency_ms: Option<f64>,
    pub reporting_instances: usize,
}

pub fn aggregate(samples: &[MetricSample], resources: &ResourceRequirements) -> AggregatedUsage {
    let cpu_request = resources
        .cpu_request_millicores
        .filter(|&r| r > 0)
        .map(|r| r as f64);
    let memory_request = resources
        .memory_request_bytes
        .filter(|&r| r > 0)
        .map(|r| r as f64);

    AggregatedUsage {
        cpu_utilization: cpu_request
            .and_then(|req| mean(samples.iter().map(|s| s.cpu_usage_millicores / req))),
        memory_utilization: memory_request
            .and_then(|req| mean(samples.iter().map(|s| s.memory_usage_bytes / req))),
        concurrency: mean(samples.iter().filter_map(|s| s.concurrency)),
        latency_ms: mean(samples.iter().filter_map(|s| s.latency_ms)),
        reporting_instances: samples.len(),
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkloadId;

    fn sample(cpu: f64, memory: f64, concurrency: Option<f64>) -> MetricSample {
        MetricSample {
            workload: WorkloadId::new("default", "hello"),
            instance: "pod".to_string(),
            timestamp: 0,
            cpu_usage_millicores: cpu,
            memory_usage_bytes: memory,
            concurrency,
            latency_ms: None,
        }
    }

    fn resources() -> ResourceRequirements {
        ResourceRequirements {
            cpu_request_millicores: Some(200),
            cpu_limit_millicores: None,
            memory_request_bytes: Some(1000),
            memory_limit_bytes: None,
        }
    }

    #[test]
    fn test_mean_utilization() {
        let samples = vec![sample(100.0, 500.0, Some(4.0)), sample(300.0, 700.0, None)];
        let usage = aggregate(&samples, &resources());

        assert_eq!(usage.cpu_utilization, Some(1.0));
        assert_eq!(usage.memory_utilization, Some(0.6));
        assert_eq!(usage.concurrency, Some(4.0));
        assert_eq!(usage.latency_ms, None);
        assert_eq!(usage.reporting_instances, 2);
    }

    #[test]
    fn test_no_instances_yields_no_data() {
        let usage = aggregate(&[], &resources());
        assert_eq!(usage.cpu_utilization, None);
        assert_eq!(usage.memory_utilization, None);
        assert_eq!(usage.reporting_instances, 0);
    }

    #[test]
    fn test_zero_usage_is_kept() {
        let usage = aggregate(&[sample(0.0, 0.0, Some(0.0))], &resources());
        assert_eq!(usage.cpu_utilization, Some(0.0));
        assert_eq!(usage.concurrency, Some(0.0));
    }

    #[test]
    fn test_missing_request_cannot_be_normalized() {
        let usage = aggregate(&[sample(100.0, 100.0, None)], &ResourceRequirements::default());
        assert_eq!(usage.cpu_utilization, None);
        assert_eq!(usage.memory_utilization, None);
    }
}
