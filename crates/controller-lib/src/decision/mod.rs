//! Decision engine
//!
//! Feature construction, the external model seam and validation of whatever
//! the model answers before it ever reaches the applier.

mod client;
mod features;
mod http;
mod validate;

pub use client::{DecisionClient, DecisionConfig, DEFAULT_DECISION_TIMEOUT};
pub use features::{FeatureBuilder, FEATURE_NAMES, NUM_FEATURES, SCHEMA_VERSION, SENTINEL};
pub use http::{HttpDecisionModel, HttpModelConfig};
pub use validate::{resolve_resources, translate_action_code, validate_action, ActionCode};

use crate::error::Result;
use crate::models::{FeatureVector, ResourceDelta, WorkloadId};
use serde::{Deserialize, Serialize};

pub use async_trait::async_trait;

/// Body sent to the decision endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub schema_version: String,
    pub workload: String,
    pub features: Vec<f32>,
    pub feature_names: Vec<String>,
    pub partial_data: bool,
}

impl DecisionRequest {
    pub fn new(workload: &WorkloadId, features: &FeatureVector) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            workload: workload.to_string(),
            features: features.to_array().to_vec(),
            feature_names: FEATURE_NAMES.iter().map(|n| n.to_string()).collect(),
            partial_data: features.partial_data,
        }
    }
}

/// Raw answer of the decision endpoint, before validation.
///
/// Either the structured form (`replicas` / `resources`) or a discrete
/// `action` code is expected, never both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// Trait for decision model backends
#[async_trait]
pub trait DecisionModel: Send + Sync {
    /// Score one feature vector
    async fn score(&self, request: &DecisionRequest) -> Result<DecisionResponse>;
}
