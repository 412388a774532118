//! Controller configuration
//!
//! Loaded once at startup from an optional file (path in `CONTROLLER_CONFIG`)
//! layered under `CONTROLLER_*` environment variables. Nested keys use `__`,
//! e.g. `CONTROLLER_GUARDRAILS__MAX_REPLICAS=8`.

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use controller_lib::collector::RequestMetricsConfig;
use controller_lib::control::LoopConfig;
use controller_lib::decision::{DecisionConfig, HttpModelConfig};
use controller_lib::{Guardrails, WorkloadId};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the optional configuration file
pub const CONFIG_PATH_ENV: &str = "CONTROLLER_CONFIG";

/// Smallest accepted positive token bucket rate, in requests per second
pub const MIN_RATE_PER_SEC: f64 = 0.001;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Identity used in logs, defaults to the pod name
    pub controller_id: String,

    /// Workloads to control, as `namespace/name`
    pub workloads: Vec<String>,

    /// API server port for health/metrics
    pub api_port: u16,

    pub poll_interval_secs: u64,
    pub metrics_window_secs: u64,

    pub fetch_timeout_ms: u64,
    pub collect_timeout_ms: u64,
    pub decide_timeout_ms: u64,
    pub apply_timeout_ms: u64,

    pub backoff_base_ms: u64,
    pub backoff_cap_secs: u64,

    /// Window in which a replica change reversing the previous one is held
    pub reversal_cooldown_secs: u64,

    /// Base URL of the decision service
    pub decision_endpoint: String,
    pub min_confidence: f32,

    /// Token bucket in front of the Kubernetes API, shared by all loops
    pub platform_rate_per_sec: f64,
    pub platform_burst: u32,

    /// Token bucket in front of the decision endpoint
    pub decision_rate_per_sec: f64,
    pub decision_burst: u32,

    /// Consecutive failures before a workload reports unhealthy
    pub unhealthy_after: u32,

    /// Scrape concurrency and latency from each pod's queue-proxy
    pub request_metrics_enabled: bool,
    pub queue_proxy_stats_port: u16,
    pub queue_proxy_metrics_port: u16,
    pub request_metrics_timeout_ms: u64,

    pub kubeconfig: Option<String>,
    pub kube_context: Option<String>,

    pub guardrails: Guardrails,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            controller_id: std::env::var("POD_NAME")
                .unwrap_or_else(|_| "scaling-controller".to_string()),
            workloads: Vec::new(),
            api_port: 8080,
            poll_interval_secs: 30,
            metrics_window_secs: 60,
            fetch_timeout_ms: 5_000,
            collect_timeout_ms: 5_000,
            decide_timeout_ms: 2_000,
            apply_timeout_ms: 10_000,
            backoff_base_ms: 1_000,
            backoff_cap_secs: 300,
            reversal_cooldown_secs: 300,
            decision_endpoint: "http://localhost:8003".to_string(),
            min_confidence: 0.0,
            platform_rate_per_sec: 10.0,
            platform_burst: 20,
            decision_rate_per_sec: 5.0,
            decision_burst: 10,
            unhealthy_after: 3,
            request_metrics_enabled: true,
            queue_proxy_stats_port: 9090,
            queue_proxy_metrics_port: 9091,
            request_metrics_timeout_ms: 1_000,
            kubeconfig: None,
            kube_context: None,
            guardrails: Guardrails::default(),
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix("CONTROLLER")
        .prefix_separator("_")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("workloads")
        .try_parsing(true)
}

impl ControllerConfig {
    /// Load configuration from the environment and the optional config file
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::load_with(path.as_deref().map(Path::new), environment())
    }

    fn load_with(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config: ControllerConfig = builder
            .add_source(env)
            .build()
            .context("Failed to read controller configuration")?
            .try_deserialize()
            .context("Failed to parse controller configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent values before any loop starts
    pub fn validate(&self) -> Result<()> {
        let workloads = self.workload_ids()?;
        if workloads.is_empty() {
            bail!("No workloads configured, set CONTROLLER_WORKLOADS");
        }
        let mut seen = HashSet::new();
        for id in &workloads {
            if !seen.insert(id) {
                bail!("Workload {} configured twice", id);
            }
        }

        if let Err(reason) = self.guardrails.validate() {
            bail!("Invalid guardrails: {}", reason);
        }

        for (name, value) in [
            ("poll_interval_secs", self.poll_interval_secs),
            ("fetch_timeout_ms", self.fetch_timeout_ms),
            ("collect_timeout_ms", self.collect_timeout_ms),
            ("decide_timeout_ms", self.decide_timeout_ms),
            ("apply_timeout_ms", self.apply_timeout_ms),
            ("backoff_base_ms", self.backoff_base_ms),
            ("request_metrics_timeout_ms", self.request_metrics_timeout_ms),
        ] {
            if value == 0 {
                bail!("{} must be greater than zero", name);
            }
        }
        if Duration::from_secs(self.backoff_cap_secs) < Duration::from_millis(self.backoff_base_ms)
        {
            bail!("backoff_cap_secs is shorter than backoff_base_ms");
        }

        // Zero or negative disables a limiter
        for (name, rate) in [
            ("platform_rate_per_sec", self.platform_rate_per_sec),
            ("decision_rate_per_sec", self.decision_rate_per_sec),
        ] {
            if rate.is_nan() || (rate > 0.0 && rate < MIN_RATE_PER_SEC) {
                bail!("{} must be at least {} or zero to disable", name, MIN_RATE_PER_SEC);
            }
        }

        if !(0.0..=1.0).contains(&self.min_confidence) {
            bail!("min_confidence must be within [0, 1]");
        }
        if self.unhealthy_after == 0 {
            bail!("unhealthy_after must be at least 1");
        }

        Ok(())
    }

    pub fn workload_ids(&self) -> Result<Vec<WorkloadId>> {
        self.workloads
            .iter()
            .filter(|w| !w.trim().is_empty())
            .map(|w| {
                w.parse::<WorkloadId>()
                    .with_context(|| format!("Invalid workload '{}'", w))
            })
            .collect()
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            metrics_window: Duration::from_secs(self.metrics_window_secs),
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            collect_timeout: Duration::from_millis(self.collect_timeout_ms),
            decide_timeout: Duration::from_millis(self.decide_timeout_ms),
            apply_timeout: Duration::from_millis(self.apply_timeout_ms),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_cap: Duration::from_secs(self.backoff_cap_secs),
            reversal_cooldown: Duration::from_secs(self.reversal_cooldown_secs),
        }
    }

    pub fn decision_config(&self) -> DecisionConfig {
        DecisionConfig {
            timeout: Duration::from_millis(self.decide_timeout_ms),
            min_confidence: self.min_confidence,
            guardrails: self.guardrails.clone(),
        }
    }

    pub fn request_metrics_config(&self) -> Option<RequestMetricsConfig> {
        self.request_metrics_enabled.then(|| RequestMetricsConfig {
            stats_port: self.queue_proxy_stats_port,
            metrics_port: self.queue_proxy_metrics_port,
            timeout: Duration::from_millis(self.request_metrics_timeout_ms),
        })
    }

    pub fn http_model_config(&self) -> HttpModelConfig {
        HttpModelConfig {
            endpoint: self.decision_endpoint.clone(),
            request_timeout: Duration::from_millis(self.decide_timeout_ms),
        }
    }
}
