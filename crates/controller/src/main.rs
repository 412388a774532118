//! Scaling Controller - learned replica and resource control for Knative Services
//!
//! Runs one closed control loop per configured workload: fetch the declared
//! spec, collect usage, ask the decision model, apply the validated action.

use anyhow::{Context, Result};
use controller_lib::{
    collector::{MetricsServerSource, MetricsSource, RequestMetricsScraper},
    control::{ControlLoopBuilder, Controller},
    decision::{DecisionClient, FeatureBuilder, HttpDecisionModel},
    platform::{KnativePlatform, WorkloadPlatform},
    ControllerMetrics, HealthRegistry, RateLimiter, StructuredLogger,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting scaling-controller");

    let config = config::ControllerConfig::load()?;
    let workloads = config.workload_ids()?;
    info!(
        controller = %config.controller_id,
        workloads = workloads.len(),
        decision_endpoint = %config.decision_endpoint,
        "Controller configured"
    );

    let health_registry = HealthRegistry::new(config.unhealthy_after);
    let metrics = ControllerMetrics::new();
    let logger = StructuredLogger::new(&config.controller_id);

    let client = kube_client(&config).await?;
    let platform_limiter = RateLimiter::new(config.platform_rate_per_sec, config.platform_burst);
    let platform: Arc<dyn WorkloadPlatform> = Arc::new(KnativePlatform::new(
        client.clone(),
        &config.guardrails,
        platform_limiter.clone(),
    ));
    let mut metrics_server = MetricsServerSource::new(client, platform_limiter);
    match config.request_metrics_config() {
        Some(scrape) => {
            metrics_server = metrics_server.with_request_metrics(RequestMetricsScraper::new(scrape)?)
        }
        None => warn!("Queue-proxy scraping disabled, concurrency and latency stay unset"),
    }
    let metrics_source: Arc<dyn MetricsSource> = Arc::new(metrics_server);

    let model = HttpDecisionModel::new(
        config.http_model_config(),
        RateLimiter::new(config.decision_rate_per_sec, config.decision_burst),
    )?;
    let decision = Arc::new(DecisionClient::new(
        Arc::new(model),
        config.decision_config(),
    ));

    let loops = workloads
        .into_iter()
        .map(|workload| {
            ControlLoopBuilder::new()
                .workload(workload)
                .platform(platform.clone())
                .metrics_source(metrics_source.clone())
                .decision(decision.clone())
                .features(FeatureBuilder::new())
                .config(config.loop_config())
                .health(health_registry.clone())
                .logger(logger.clone())
                .build()
        })
        .collect::<Result<Vec<_>>>()?;

    let controller = Controller::new(loops);
    logger.log_startup(CONTROLLER_VERSION, controller.len());

    let (shutdown_tx, _) = broadcast::channel(1);
    let running = controller.spawn(&shutdown_tx);

    // Start health and metrics server
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let api_port = config.api_port;
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server failed");
        }
    });

    health_registry.set_ready(true).await;

    let reason = shutdown_signal().await;
    logger.log_shutdown(reason);
    health_registry.set_ready(false).await;

    // Loops finish any in-flight apply before stopping
    let _ = shutdown_tx.send(());
    running.wait().await;
    api_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

async fn kube_client(config: &config::ControllerConfig) -> Result<kube::Client> {
    let options = KubeConfigOptions {
        context: config.kube_context.clone(),
        ..KubeConfigOptions::default()
    };

    let kube_config = match (&config.kubeconfig, &config.kube_context) {
        (Some(path), _) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {}", path))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .context("Failed to load kubeconfig")?
        }
        (None, Some(_)) => kube::Config::from_kubeconfig(&options)
            .await
            .context("Failed to load kubeconfig context")?,
        (None, None) => kube::Config::infer()
            .await
            .context("Failed to infer Kubernetes configuration")?,
    };

    kube::Client::try_from(kube_config).context("Failed to build Kubernetes client")
}

async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => "SIGINT received",
                    _ = terminate.recv() => "SIGTERM received",
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM, waiting for SIGINT only");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT received"
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "Ctrl-C received"
    }
}
