//! Metrics collection for workload instances
//!
//! This module provides the metrics source used by each control cycle and the
//! aggregation policy applied to its samples. The default source reads the
//! `metrics.k8s.io` API served by metrics-server, optionally enriched with
//! request metrics scraped from queue-proxy.

mod aggregate;
mod metrics_api;
mod request_metrics;

pub use aggregate::{aggregate, AggregatedUsage};
pub use metrics_api::{batch_from_listing, is_pod_ready, MetricsServerSource, SERVICE_LABEL};
pub use request_metrics::{
    sum_metric, RequestMetrics, RequestMetricsConfig, RequestMetricsScraper, CONCURRENCY_METRIC,
    LATENCY_COUNT_METRIC, LATENCY_SUM_METRIC,
};

use crate::error::Result;
use crate::models::{MetricsBatch, WorkloadId};
use std::time::Duration;

pub use async_trait::async_trait;

/// Trait for metrics backends
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Collect usage samples for a workload's ready instances.
    ///
    /// Samples older than `window` are treated as missing.
    async fn collect(&self, id: &WorkloadId, window: Duration) -> Result<MetricsBatch>;
}
