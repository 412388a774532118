//! metrics-server backed source
//!
//! Ready pods of the Knative Service are listed first; each of them is then
//! matched against its `PodMetrics` entry. Pods without a (fresh) entry are
//! left out of the batch, which marks it as partial. Request concurrency and
//! latency come from the optional queue-proxy scraper.

use super::{MetricsSource, RequestMetricsScraper};
use crate::error::{ControlError, Result};
use crate::models::{MetricSample, MetricsBatch, WorkloadId};
use crate::platform::quantity::{parse_cpu_millicores, parse_memory_bytes};
use crate::rate_limit::RateLimiter;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Label Knative puts on every pod of a Service
pub const SERVICE_LABEL: &str = "serving.knative.dev/service";

#[derive(Debug, Deserialize)]
struct PodMetricsData {
    timestamp: Option<String>,
    #[serde(default)]
    containers: Vec<ContainerUsage>,
}

#[derive(Debug, Deserialize)]
struct ContainerUsage {
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    cpu: String,
    memory: String,
}

/// Metrics source reading `metrics.k8s.io/v1beta1` PodMetrics
pub struct MetricsServerSource {
    client: Client,
    pod_metrics: ApiResource,
    limiter: RateLimiter,
    request_metrics: Option<RequestMetricsScraper>,
}

impl MetricsServerSource {
    pub fn new(client: Client, limiter: RateLimiter) -> Self {
        let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics");
        Self {
            client,
            pod_metrics: ApiResource::from_gvk_with_plural(&gvk, "pods"),
            limiter,
            request_metrics: None,
        }
    }

    /// Also scrape request concurrency and latency from each ready pod
    pub fn with_request_metrics(mut self, scraper: RequestMetricsScraper) -> Self {
        self.request_metrics = Some(scraper);
        self
    }
}

#[async_trait]
impl MetricsSource for MetricsServerSource {
    async fn collect(&self, id: &WorkloadId, window: Duration) -> Result<MetricsBatch> {
        let selector = format!("{}={}", SERVICE_LABEL, id.name);

        self.limiter.acquire().await;
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &id.namespace);
        let pods = pods
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| ControlError::MetricsUnavailable(format!("listing pods: {}", e)))?;

        let ready_pods: Vec<&Pod> = pods.items.iter().filter(|p| is_pod_ready(p)).collect();
        let ready: Vec<String> = ready_pods
            .iter()
            .filter_map(|p| p.metadata.name.clone())
            .collect();
        if ready.is_empty() {
            debug!(workload = %id, "No ready instances");
            return Ok(MetricsBatch::new(Vec::new(), 0));
        }

        self.limiter.acquire().await;
        let metrics: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &id.namespace, &self.pod_metrics);
        let listing = metrics
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| ControlError::MetricsUnavailable(format!("listing pod metrics: {}", e)))?;

        let mut batch = batch_from_listing(id, &ready, &listing.items, Utc::now(), window);

        if let Some(scraper) = &self.request_metrics {
            let pod_ips: HashMap<String, String> = ready_pods
                .iter()
                .filter_map(|p| {
                    let name = p.metadata.name.clone()?;
                    let ip = p.status.as_ref()?.pod_ip.clone()?;
                    Some((name, ip))
                })
                .collect();
            scraper.enrich(id, &mut batch, &pod_ips).await;
        }

        Ok(batch)
    }
}

/// A pod counts as an instance once it is Ready and not terminating
pub fn is_pod_ready(pod: &Pod) -> bool {
    if pod.metadata.deletion_timestamp.is_some() {
        return false;
    }
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// Match ready pods against their PodMetrics entries
pub fn batch_from_listing(
    id: &WorkloadId,
    ready_pods: &[String],
    pod_metrics: &[DynamicObject],
    now: DateTime<Utc>,
    window: Duration,
) -> MetricsBatch {
    let by_name: HashMap<&str, &DynamicObject> = pod_metrics
        .iter()
        .filter_map(|m| m.metadata.name.as_deref().map(|n| (n, m)))
        .collect();

    let samples: Vec<MetricSample> = ready_pods
        .iter()
        .filter_map(|pod| {
            let sample = by_name
                .get(pod.as_str())
                .and_then(|m| sample_from_metrics(id, pod, m, now, window));
            if sample.is_none() {
                debug!(workload = %id, pod = %pod, "Metrics not available for instance");
            }
            sample
        })
        .collect();

    MetricsBatch::new(samples, ready_pods.len())
}

fn sample_from_metrics(
    id: &WorkloadId,
    pod: &str,
    metrics: &DynamicObject,
    now: DateTime<Utc>,
    window: Duration,
) -> Option<MetricSample> {
    let data: PodMetricsData = serde_json::from_value(metrics.data.clone()).ok()?;
    if data.containers.is_empty() {
        return None;
    }

    let timestamp = data
        .timestamp
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(now);
    if !window.is_zero() {
        // Negative ages (clock skew) convert to an error and count as fresh
        if let Ok(age) = now.signed_duration_since(timestamp).to_std() {
            if age > window {
                return None;
            }
        }
    }

    // queue-proxy and user container share the pod's budget, so usage is summed
    let mut cpu = 0.0;
    let mut memory = 0.0;
    for container in &data.containers {
        cpu += parse_cpu_millicores(&container.usage.cpu)?;
        memory += parse_memory_bytes(&container.usage.memory)?;
    }

    Some(MetricSample {
        workload: id.clone(),
        instance: pod.to_string(),
        timestamp: timestamp.timestamp(),
        cpu_usage_millicores: cpu,
        memory_usage_bytes: memory,
        concurrency: None,
        latency_ms: None,
    })
}
