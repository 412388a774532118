//! Controller library for learned workload scaling
//!
//! This crate provides the core functionality for:
//! - Reading and writing declared workload configuration (Knative Services)
//! - Metrics collection from metrics-server
//! - Feature construction and calls to an external decision model
//! - Per-workload closed control loops with backoff and guardrails
//! - Health checks and observability

pub mod applier;
pub mod collector;
pub mod control;
pub mod decision;
pub mod error;
pub mod guardrails;
pub mod health;
pub mod models;
pub mod observability;
pub mod platform;
pub mod rate_limit;

pub use error::{ControlError, FailureKind, Result};
pub use guardrails::Guardrails;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ControllerMetrics, StructuredLogger};
pub use rate_limit::RateLimiter;
