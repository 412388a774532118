//! Request metrics scraped from each instance's queue-proxy sidecar
//!
//! Concurrency is read from the autoscaler stats endpoint, latency from the
//! user-facing metrics endpoint. The latency histogram is cumulative, so the
//! mean is taken over the delta since the previous scrape of the same pod.

use crate::error::{ControlError, Result};
use crate::models::{MetricsBatch, WorkloadId};
use anyhow::Context;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub const CONCURRENCY_METRIC: &str = "queue_average_concurrent_requests";
pub const LATENCY_SUM_METRIC: &str = "revision_app_request_latencies_sum";
pub const LATENCY_COUNT_METRIC: &str = "revision_app_request_latencies_count";

/// Configuration for the queue-proxy scraper
#[derive(Debug, Clone)]
pub struct RequestMetricsConfig {
    /// Autoscaler stats port of queue-proxy
    pub stats_port: u16,
    /// Prometheus metrics port of queue-proxy
    pub metrics_port: u16,
    /// Deadline for one scrape request
    pub timeout: Duration,
}

impl Default for RequestMetricsConfig {
    fn default() -> Self {
        Self {
            stats_port: 9090,
            metrics_port: 9091,
            timeout: Duration::from_secs(1),
        }
    }
}

/// Request-level signals of one instance
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RequestMetrics {
    pub concurrency: Option<f64>,
    pub latency_ms: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LatencyTotals {
    sum_ms: f64,
    count: f64,
}

/// Scrapes queue-proxy endpoints of ready pods
#[derive(Clone)]
pub struct RequestMetricsScraper {
    client: reqwest::Client,
    config: RequestMetricsConfig,
    latency_totals: Arc<Mutex<HashMap<String, LatencyTotals>>>,
}

impl RequestMetricsScraper {
    pub fn new(config: RequestMetricsConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build queue-proxy HTTP client")?;

        Ok(Self {
            client,
            config,
            latency_totals: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Scrape one pod. `key` identifies the pod across scrapes.
    pub async fn scrape(&self, key: &str, ip: &str) -> Result<RequestMetrics> {
        let stats = self.fetch(ip, self.config.stats_port).await?;
        let metrics = self.fetch(ip, self.config.metrics_port).await?;

        let latency_ms = match (
            sum_metric(&metrics, LATENCY_SUM_METRIC),
            sum_metric(&metrics, LATENCY_COUNT_METRIC),
        ) {
            (Some(sum_ms), Some(count)) => self.windowed_latency(key, LatencyTotals { sum_ms, count }),
            _ => None,
        };

        Ok(RequestMetrics {
            concurrency: sum_metric(&stats, CONCURRENCY_METRIC),
            latency_ms,
        })
    }

    /// Fill request metrics into the batch's samples.
    ///
    /// Instances without an address, or whose scrape fails or lacks
    /// concurrency, count as incomplete.
    pub async fn enrich(
        &self,
        id: &WorkloadId,
        batch: &mut MetricsBatch,
        pod_ips: &HashMap<String, String>,
    ) {
        let mut incomplete = 0;
        let mut scrapes = JoinSet::new();

        for (index, sample) in batch.samples.iter().enumerate() {
            let Some(ip) = pod_ips.get(&sample.instance) else {
                debug!(workload = %id, pod = %sample.instance, "No pod address to scrape");
                incomplete += 1;
                continue;
            };
            let scraper = self.clone();
            let key = format!("{}/{}", id.namespace, sample.instance);
            let ip = ip.clone();
            scrapes.spawn(async move { (index, scraper.scrape(&key, &ip).await) });
        }

        while let Some(joined) = scrapes.join_next().await {
            match joined {
                Ok((index, Ok(metrics))) => {
                    let sample = &mut batch.samples[index];
                    sample.concurrency = metrics.concurrency;
                    sample.latency_ms = metrics.latency_ms;
                    if metrics.concurrency.is_none() {
                        incomplete += 1;
                    }
                }
                Ok((index, Err(e))) => {
                    debug!(
                        workload = %id,
                        pod = %batch.samples[index].instance,
                        error = %e,
                        "Request metrics not available for instance"
                    );
                    incomplete += 1;
                }
                Err(e) => {
                    warn!(workload = %id, error = %e, "Scrape task failed");
                    incomplete += 1;
                }
            }
        }

        batch.incomplete_instances += incomplete;
    }

    async fn fetch(&self, ip: &str, port: u16) -> Result<String> {
        let url = format!("http://{}:{}/metrics", ip, port);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ControlError::MetricsUnavailable(format!("scraping {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControlError::MetricsUnavailable(format!(
                "scraping {} returned {}",
                url, status
            )));
        }

        response
            .text()
            .await
            .map_err(|e| ControlError::MetricsUnavailable(format!("reading {}: {}", url, e)))
    }

    fn windowed_latency(&self, key: &str, current: LatencyTotals) -> Option<f64> {
        let previous = self
            .latency_totals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), current);
        mean_latency(previous, current)
    }
}

/// Mean latency between two cumulative histogram readings
fn mean_latency(previous: Option<LatencyTotals>, current: LatencyTotals) -> Option<f64> {
    let (sum_ms, count) = match previous {
        // Counters restart with the container
        Some(prev) if current.count >= prev.count => {
            (current.sum_ms - prev.sum_ms, current.count - prev.count)
        }
        _ => (current.sum_ms, current.count),
    };
    (count > 0.0 && sum_ms.is_finite()).then(|| sum_ms / count)
}

/// Sum of every series named `name` in a Prometheus text exposition
pub fn sum_metric(text: &str, name: &str) -> Option<f64> {
    let mut total = None;
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(rest) = line.strip_prefix(name) else {
            continue;
        };
        let value = if let Some(labelled) = rest.strip_prefix('{') {
            match labelled.split_once('}') {
                Some((_, value)) => value,
                None => continue,
            }
        } else if rest.starts_with(char::is_whitespace) {
            rest
        } else {
            continue;
        };

        if let Some(value) = value
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite())
        {
            *total.get_or_insert(0.0) += value;
        }
    }
    total
}
