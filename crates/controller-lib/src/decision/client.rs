//! Decision client
//!
//! Wraps a [`DecisionModel`] with a deadline, turns its answer into a
//! [`ScalingAction`] and validates that action against the effective bounds.

use super::validate::{translate_action_code, validate_action, ActionCode};
use super::{DecisionModel, DecisionRequest, DecisionResponse, SCHEMA_VERSION};
use crate::error::{ControlError, Result};
use crate::guardrails::Guardrails;
use crate::models::{FeatureVector, ScalingAction, WorkloadSpec};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Deadline applied to a single decision request
pub const DEFAULT_DECISION_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for the decision client
#[derive(Debug, Clone)]
pub struct DecisionConfig {
    /// Deadline for one model call
    pub timeout: Duration,
    /// Actions scored below this confidence are downgraded to no-ops
    pub min_confidence: f32,
    pub guardrails: Guardrails,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DECISION_TIMEOUT,
            min_confidence: 0.0,
            guardrails: Guardrails::default(),
        }
    }
}

pub struct DecisionClient {
    model: Arc<dyn DecisionModel>,
    config: DecisionConfig,
}

impl DecisionClient {
    pub fn new(model: Arc<dyn DecisionModel>, config: DecisionConfig) -> Self {
        Self { model, config }
    }

    pub fn guardrails(&self) -> &Guardrails {
        &self.config.guardrails
    }

    /// Ask the model for an action and validate it
    pub async fn decide(
        &self,
        spec: &WorkloadSpec,
        features: &FeatureVector,
    ) -> Result<ScalingAction> {
        let request = DecisionRequest::new(&spec.id, features);

        let response = match timeout(self.config.timeout, self.model.score(&request)).await {
            Ok(response) => response?,
            Err(_) => return Err(ControlError::DecisionTimeout(self.config.timeout)),
        };

        let action = self.interpret(spec, response)?;
        self.validate(spec, &action)?;
        Ok(action)
    }

    /// Re-check a previously accepted action against a fresher spec
    pub fn validate(&self, spec: &WorkloadSpec, action: &ScalingAction) -> Result<()> {
        validate_action(action, spec, &self.config.guardrails)
    }

    fn interpret(&self, spec: &WorkloadSpec, response: DecisionResponse) -> Result<ScalingAction> {
        if let Some(version) = response.schema_version.as_deref() {
            if version != SCHEMA_VERSION {
                return Err(ControlError::DecisionInvalid(format!(
                    "unsupported schema version '{}'",
                    version
                )));
            }
        }

        let confidence = response.confidence.unwrap_or(1.0);
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(ControlError::DecisionInvalid(format!(
                "confidence {} outside [0, 1]",
                confidence
            )));
        }

        let action = match response.action {
            Some(_) if response.replicas.is_some() || response.resources.is_some() => {
                return Err(ControlError::DecisionInvalid(
                    "response mixes an action code with a structured action".to_string(),
                ))
            }
            Some(code) => {
                let code = ActionCode::try_from(code)?;
                translate_action_code(code, spec, &self.config.guardrails)?
            }
            None => {
                let replicas = response
                    .replicas
                    .map(|r| {
                        u32::try_from(r).map_err(|_| {
                            ControlError::DecisionInvalid(format!("replica count {} out of range", r))
                        })
                    })
                    .transpose()?;
                ScalingAction {
                    replicas,
                    resources: response.resources,
                    confidence,
                }
            }
        };
        let action = ScalingAction {
            confidence,
            ..action
        };

        if action.is_actionable() && confidence < self.config.min_confidence {
            debug!(
                workload = %spec.id,
                confidence,
                min_confidence = self.config.min_confidence,
                "Low confidence action treated as no-op"
            );
            return Ok(ScalingAction {
                confidence,
                ..ScalingAction::noop()
            });
        }

        Ok(action)
    }
}
