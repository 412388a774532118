//! Action applier
//!
//! Turns a validated action into the smallest mutation that realizes it and
//! submits it guarded by the workload's revision marker.

use crate::decision::resolve_resources;
use crate::error::{ControlError, Result};
use crate::models::{ApplyResult, Mutation, ScalingAction, WorkloadSpec};
use crate::platform::WorkloadPlatform;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ActionApplier {
    platform: Arc<dyn WorkloadPlatform>,
}

impl ActionApplier {
    pub fn new(platform: Arc<dyn WorkloadPlatform>) -> Self {
        Self { platform }
    }

    /// Submit the mutation for `action`, or skip when nothing would change
    pub async fn apply(&self, spec: &WorkloadSpec, action: &ScalingAction) -> Result<ApplyResult> {
        let Some(mutation) = plan_mutation(spec, action)? else {
            debug!(workload = %spec.id, "Target equals current spec, skipping apply");
            return Ok(ApplyResult::Skipped);
        };

        match self.platform.submit(&spec.id, &mutation).await {
            Ok(()) => Ok(ApplyResult::Applied(mutation)),
            Err(ControlError::ApplyRejected(reason)) => {
                warn!(workload = %spec.id, reason = %reason, "Platform rejected mutation");
                Ok(ApplyResult::Rejected { reason })
            }
            Err(e) => Err(e),
        }
    }
}

/// Minimal mutation moving `spec` to the target described by `action`.
///
/// Returns `None` when the target equals the current spec.
pub fn plan_mutation(spec: &WorkloadSpec, action: &ScalingAction) -> Result<Option<Mutation>> {
    let replicas = action.replicas.filter(|&target| Some(target) != spec.replicas);

    let resources = match action.resources.filter(|d| !d.is_zero()) {
        Some(delta) => {
            let target = resolve_resources(&spec.resources, &delta).ok_or_else(|| {
                ControlError::DecisionInvalid(format!(
                    "resource delta cannot be applied to {}",
                    spec.id
                ))
            })?;
            (target != spec.resources).then_some(target)
        }
        None => None,
    };

    if replicas.is_none() && resources.is_none() {
        return Ok(None);
    }

    Ok(Some(Mutation {
        resource_version: spec.resource_version.clone(),
        replicas,
        resources,
    }))
}
