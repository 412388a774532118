//! Failure taxonomy of a control cycle

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Errors raised by the controller's components
#[derive(Debug, Error)]
pub enum ControlError {
    /// Target workload does not exist
    #[error("workload not found: {0}")]
    NotFound(String),

    /// Orchestration platform API unreachable
    #[error("platform unavailable: {0}")]
    Unavailable(String),

    /// Metrics backend unreachable
    #[error("metrics unavailable: {0}")]
    MetricsUnavailable(String),

    /// Declared spec is missing required fields
    #[error("invalid workload spec: {0}")]
    InvalidSpec(String),

    /// Decision endpoint did not answer within its deadline
    #[error("decision endpoint timed out after {0:?}")]
    DecisionTimeout(std::time::Duration),

    /// Decision response failed schema or range validation
    #[error("invalid decision: {0}")]
    DecisionInvalid(String),

    /// Spec changed concurrently since it was fetched
    #[error("apply conflict: {0}")]
    ApplyConflict(String),

    /// Platform-side validation refused the mutation
    #[error("apply rejected: {0}")]
    ApplyRejected(String),

    /// Controller shutdown observed while a step was in flight
    #[error("cancelled")]
    Cancelled,
}

impl ControlError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ControlError::NotFound(_) => FailureKind::NotFound,
            ControlError::Unavailable(_) => FailureKind::Unavailable,
            ControlError::MetricsUnavailable(_) => FailureKind::MetricsUnavailable,
            ControlError::InvalidSpec(_) => FailureKind::InvalidSpec,
            ControlError::DecisionTimeout(_) => FailureKind::DecisionTimeout,
            ControlError::DecisionInvalid(_) => FailureKind::DecisionInvalid,
            ControlError::ApplyConflict(_) => FailureKind::ApplyConflict,
            ControlError::ApplyRejected(_) => FailureKind::ApplyRejected,
            ControlError::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// Label-friendly failure kind, used in logs and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Unavailable,
    MetricsUnavailable,
    InvalidSpec,
    DecisionTimeout,
    DecisionInvalid,
    ApplyConflict,
    ApplyRejected,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NotFound => "not_found",
            FailureKind::Unavailable => "unavailable",
            FailureKind::MetricsUnavailable => "metrics_unavailable",
            FailureKind::InvalidSpec => "invalid_spec",
            FailureKind::DecisionTimeout => "decision_timeout",
            FailureKind::DecisionInvalid => "decision_invalid",
            FailureKind::ApplyConflict => "apply_conflict",
            FailureKind::ApplyRejected => "apply_rejected",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
