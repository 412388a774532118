//! Per-workload control loop
//!
//! One loop owns one workload and walks it through
//! `Idle -> Fetching -> Collecting -> Deciding -> Applying -> Idle`. Any
//! failure parks the loop in `ErrorBackoff` for a capped exponential delay.
//! The loop never exits on its own; only the shutdown signal stops it.

use super::{Backoff, Shutdown};
use crate::applier::ActionApplier;
use crate::collector::MetricsSource;
use crate::decision::{DecisionClient, FeatureBuilder};
use crate::error::{ControlError, Result};
use crate::health::{ComponentStatus, HealthRegistry};
use crate::models::{
    ApplyResult, Mutation, ResourceRequirements, ScalingAction, WorkloadId, WorkloadSpec,
};
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::platform::WorkloadPlatform;
use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Observable phase of a control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Fetching,
    Collecting,
    Deciding,
    Applying,
    ErrorBackoff,
}

/// Configuration for a control loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Wait between successful cycles
    pub poll_interval: Duration,
    /// Metric samples older than this are ignored
    pub metrics_window: Duration,
    pub fetch_timeout: Duration,
    pub collect_timeout: Duration,
    pub decide_timeout: Duration,
    pub apply_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Replica changes reversing the previous direction within this window are held
    pub reversal_cooldown: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            metrics_window: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(5),
            collect_timeout: Duration::from_secs(5),
            decide_timeout: Duration::from_secs(5),
            apply_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(300), // 5 minutes
            reversal_cooldown: Duration::from_secs(300),
        }
    }
}

/// Declared configuration the loop last wrote
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedTarget {
    pub replicas: Option<u32>,
    pub resources: ResourceRequirements,
}

impl AppliedTarget {
    fn from_mutation(spec: &WorkloadSpec, mutation: &Mutation) -> Self {
        Self {
            replicas: mutation.replicas.or(spec.replicas),
            resources: mutation
                .resources
                .clone()
                .unwrap_or_else(|| spec.resources.clone()),
        }
    }

    fn matches(&self, spec: &WorkloadSpec) -> bool {
        self.replicas == spec.replicas && self.resources == spec.resources
    }
}

#[derive(Debug, Clone, Copy)]
struct ReplicaChange {
    direction: Ordering,
    at: Instant,
}

/// Result of one successful cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub action: ScalingAction,
    pub result: ApplyResult,
    pub duration: Duration,
}

impl CycleReport {
    pub fn outcome(&self) -> &'static str {
        match self.result {
            ApplyResult::Applied(_) => "applied",
            ApplyResult::Skipped => "skipped",
            ApplyResult::Rejected { .. } => "rejected",
        }
    }
}

pub struct ControlLoop {
    id: WorkloadId,
    label: String,
    platform: Arc<dyn WorkloadPlatform>,
    metrics_source: Arc<dyn MetricsSource>,
    features: FeatureBuilder,
    decision: Arc<DecisionClient>,
    applier: ActionApplier,
    config: LoopConfig,
    state: LoopState,
    backoff: Backoff,
    cycle: u64,
    last_applied: Option<AppliedTarget>,
    last_change: Option<ReplicaChange>,
    health: Option<HealthRegistry>,
    metrics: ControllerMetrics,
    logger: StructuredLogger,
}

impl ControlLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: WorkloadId,
        platform: Arc<dyn WorkloadPlatform>,
        metrics_source: Arc<dyn MetricsSource>,
        features: FeatureBuilder,
        decision: Arc<DecisionClient>,
        config: LoopConfig,
        health: Option<HealthRegistry>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            label: id.to_string(),
            id,
            applier: ActionApplier::new(platform.clone()),
            platform,
            metrics_source,
            features,
            decision,
            backoff: Backoff::new(config.backoff_base, config.backoff_cap),
            config,
            state: LoopState::Idle,
            cycle: 0,
            last_applied: None,
            last_change: None,
            health,
            metrics: ControllerMetrics::new(),
            logger,
        }
    }

    pub fn workload(&self) -> &WorkloadId {
        &self.id
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn last_applied(&self) -> Option<&AppliedTarget> {
        self.last_applied.as_ref()
    }

    /// Run until the shutdown signal is received
    pub async fn run(mut self, shutdown: broadcast::Receiver<()>) {
        let mut shutdown = Shutdown::new(shutdown);
        if let Some(health) = &self.health {
            health.register(&self.label).await;
        }
        info!(
            workload = %self.id,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Starting control loop"
        );

        loop {
            self.state = LoopState::Idle;
            if shutdown.is_shutdown() {
                break;
            }

            let Some(delay) = self.step(&mut shutdown).await else {
                break;
            };

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.recv() => break,
            }
        }

        self.state = LoopState::Idle;
        info!(workload = %self.id, cycles = self.cycle, "Control loop stopped");
    }

    /// Run one cycle and report it.
    ///
    /// Returns how long to wait before the next cycle: the poll interval after
    /// a success, the next backoff delay after a failure, `None` once cancelled.
    pub async fn step(&mut self, shutdown: &mut Shutdown) -> Option<Duration> {
        let started = Instant::now();
        match self.run_cycle(shutdown).await {
            Ok(report) => {
                self.on_success(&report).await;
                self.state = LoopState::Idle;
                Some(self.config.poll_interval)
            }
            Err(ControlError::Cancelled) => None,
            Err(e) => {
                self.state = LoopState::ErrorBackoff;
                let delay = self.backoff.next_delay();
                self.on_failure(&e, started.elapsed(), delay).await;
                Some(delay)
            }
        }
    }

    /// Execute one full cycle
    pub async fn run_cycle(&mut self, shutdown: &mut Shutdown) -> Result<CycleReport> {
        self.cycle += 1;
        let started = Instant::now();

        self.state = LoopState::Fetching;
        let spec = self.fetch(shutdown).await?;

        self.state = LoopState::Collecting;
        let batch = guarded(
            shutdown,
            self.config.collect_timeout,
            || ControlError::MetricsUnavailable("collection timed out".to_string()),
            self.metrics_source.collect(&self.id, self.config.metrics_window),
        )
        .await?;
        if batch.is_partial() {
            debug!(
                workload = %self.id,
                reporting = batch.samples.len(),
                expected = batch.expected_instances,
                "Partial metrics for cycle"
            );
        }
        let features = self.features.build(&spec, &batch)?;

        self.state = LoopState::Deciding;
        let decide_started = Instant::now();
        let decide_timeout = self.config.decide_timeout;
        let action = guarded(
            shutdown,
            decide_timeout,
            || ControlError::DecisionTimeout(decide_timeout),
            self.decision.decide(&spec, &features),
        )
        .await?;
        self.metrics
            .observe_decision_latency(decide_started.elapsed().as_secs_f64());
        let action = self.damp(&spec, action);

        self.state = LoopState::Applying;
        let (spec, result) = self.apply_with_retry(shutdown, spec, &action).await?;

        match &result {
            ApplyResult::Rejected { reason } => {
                return Err(ControlError::ApplyRejected(reason.clone()));
            }
            ApplyResult::Applied(mutation) => self.record_applied(&spec, mutation),
            ApplyResult::Skipped => {}
        }

        Ok(CycleReport {
            cycle: self.cycle,
            action,
            result,
            duration: started.elapsed(),
        })
    }

    async fn fetch(&mut self, shutdown: &mut Shutdown) -> Result<WorkloadSpec> {
        let spec = guarded(
            shutdown,
            self.config.fetch_timeout,
            || ControlError::Unavailable("fetch timed out".to_string()),
            self.platform.fetch(&self.id),
        )
        .await?;
        self.check_drift(&spec);
        Ok(spec)
    }

    /// Writes are not cancellable; an in-flight apply runs to completion or timeout
    async fn apply_once(&self, spec: &WorkloadSpec, action: &ScalingAction) -> Result<ApplyResult> {
        match timeout(self.config.apply_timeout, self.applier.apply(spec, action)).await {
            Ok(result) => result,
            Err(_) => Err(ControlError::Unavailable("apply timed out".to_string())),
        }
    }

    async fn apply_with_retry(
        &mut self,
        shutdown: &mut Shutdown,
        spec: WorkloadSpec,
        action: &ScalingAction,
    ) -> Result<(WorkloadSpec, ApplyResult)> {
        match self.apply_once(&spec, action).await {
            Err(ControlError::ApplyConflict(reason)) => {
                debug!(
                    workload = %self.id,
                    reason = %reason,
                    "Spec changed concurrently, retrying once against a fresh spec"
                );
                let fresh = self.fetch(shutdown).await?;
                self.decision.validate(&fresh, action)?;
                match self.apply_once(&fresh, action).await {
                    Err(ControlError::ApplyConflict(reason)) => Err(ControlError::ApplyConflict(
                        format!("conflict persisted after retry: {}", reason),
                    )),
                    other => other.map(|result| (fresh, result)),
                }
            }
            other => other.map(|result| (spec, result)),
        }
    }

    /// Drop the replica part of an action that reverses the last change too soon
    fn damp(&self, spec: &WorkloadSpec, mut action: ScalingAction) -> ScalingAction {
        let (Some(target), Some(current)) = (action.replicas, spec.replicas) else {
            return action;
        };
        let direction = target.cmp(&current);
        if direction == Ordering::Equal || self.config.reversal_cooldown.is_zero() {
            return action;
        }

        if let Some(last) = self.last_change {
            if last.direction == direction.reverse()
                && last.at.elapsed() < self.config.reversal_cooldown
            {
                self.logger.log_action_held(
                    &self.label,
                    target,
                    current,
                    "reverses previous change within cooldown",
                );
                action.replicas = None;
            }
        }
        action
    }

    fn check_drift(&mut self, spec: &WorkloadSpec) {
        let Some(expected) = &self.last_applied else {
            return;
        };
        if expected.matches(spec) {
            return;
        }

        self.logger.log_drift(
            &self.label,
            &format!("{:?}", expected),
            &format!(
                "{:?}",
                AppliedTarget {
                    replicas: spec.replicas,
                    resources: spec.resources.clone(),
                }
            ),
        );
        // The declared spec is the truth from here on
        self.last_applied = None;
        self.last_change = None;
    }

    fn record_applied(&mut self, spec: &WorkloadSpec, mutation: &Mutation) {
        let target = AppliedTarget::from_mutation(spec, mutation);

        if let (Some(new), Some(old)) = (mutation.replicas, spec.replicas) {
            let direction = new.cmp(&old);
            if direction != Ordering::Equal {
                self.last_change = Some(ReplicaChange {
                    direction,
                    at: Instant::now(),
                });
            }
        }
        if let Some(replicas) = target.replicas {
            self.metrics.set_replica_target(&self.label, replicas);
        }
        self.last_applied = Some(target);
    }

    async fn on_success(&mut self, report: &CycleReport) {
        self.backoff.reset();
        self.metrics.set_backoff(&self.label, 0);
        self.metrics
            .record_cycle(&self.label, report.outcome(), report.duration.as_secs_f64());

        let replicas = match &report.result {
            ApplyResult::Applied(mutation) => mutation.replicas,
            _ => None,
        };
        self.logger.log_cycle_completed(
            &self.label,
            report.cycle,
            report.outcome(),
            replicas,
            report.action.confidence,
            report.duration.as_millis() as u64,
        );

        if let Some(health) = &self.health {
            health.record_success(&self.label).await;
        }
    }

    async fn on_failure(&mut self, error: &ControlError, elapsed: Duration, delay: Duration) {
        let kind = error.kind();
        self.metrics
            .record_cycle(&self.label, "failed", elapsed.as_secs_f64());
        self.metrics.record_failure(&self.label, kind.as_str());
        self.metrics.set_backoff(&self.label, delay.as_secs());
        self.logger.log_cycle_failed(
            &self.label,
            self.cycle,
            kind.as_str(),
            &error.to_string(),
            delay.as_millis() as u64,
        );

        if let Some(health) = &self.health {
            let status = health.record_failure(&self.label, error.to_string()).await;
            if status == ComponentStatus::Unhealthy {
                warn!(
                    workload = %self.id,
                    attempts = self.backoff.attempts(),
                    "Workload marked unhealthy after repeated failures"
                );
            }
        }
    }
}

/// Run a read-only step under a deadline, abandoning it on shutdown
async fn guarded<T>(
    shutdown: &mut Shutdown,
    limit: Duration,
    on_timeout: impl FnOnce() -> ControlError,
    step: impl Future<Output = Result<T>>,
) -> Result<T> {
    // A pending signal wins over a step that is already ready
    tokio::select! {
        biased;
        _ = shutdown.recv() => Err(ControlError::Cancelled),
        result = timeout(limit, step) => match result {
            Ok(result) => result,
            Err(_) => Err(on_timeout()),
        },
    }
}

/// Builder for a control loop
pub struct ControlLoopBuilder {
    workload: Option<WorkloadId>,
    platform: Option<Arc<dyn WorkloadPlatform>>,
    metrics_source: Option<Arc<dyn MetricsSource>>,
    decision: Option<Arc<DecisionClient>>,
    features: FeatureBuilder,
    config: LoopConfig,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl ControlLoopBuilder {
    pub fn new() -> Self {
        Self {
            workload: None,
            platform: None,
            metrics_source: None,
            decision: None,
            features: FeatureBuilder::new(),
            config: LoopConfig::default(),
            health: None,
            logger: None,
        }
    }

    pub fn workload(mut self, workload: WorkloadId) -> Self {
        self.workload = Some(workload);
        self
    }

    pub fn platform(mut self, platform: Arc<dyn WorkloadPlatform>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn metrics_source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.metrics_source = Some(source);
        self
    }

    pub fn decision(mut self, decision: Arc<DecisionClient>) -> Self {
        self.decision = Some(decision);
        self
    }

    pub fn features(mut self, features: FeatureBuilder) -> Self {
        self.features = features;
        self
    }

    pub fn config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> anyhow::Result<ControlLoop> {
        let workload = self
            .workload
            .ok_or_else(|| anyhow::anyhow!("Workload is required"))?;
        let platform = self
            .platform
            .ok_or_else(|| anyhow::anyhow!("Platform is required"))?;
        let metrics_source = self
            .metrics_source
            .ok_or_else(|| anyhow::anyhow!("Metrics source is required"))?;
        let decision = self
            .decision
            .ok_or_else(|| anyhow::anyhow!("Decision client is required"))?;
        let logger = self
            .logger
            .unwrap_or_else(|| StructuredLogger::new("scaling-controller"));

        Ok(ControlLoop::new(
            workload,
            platform,
            metrics_source,
            self.features,
            decision,
            self.config,
            self.health,
            logger,
        ))
    }
}

impl Default for ControlLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
