//! Orchestration platform access
//!
//! The State Fetcher and the write half used by the Action Applier share one
//! trait so that a single rate-limited client serves every control loop.
//! The Knative implementation talks to the Kubernetes API through `kube`.

mod knative;
pub mod quantity;

pub use knative::{
    apply_mutation_to_service, spec_from_service, KnativePlatform, BOUND_MAX_ANNOTATION,
    BOUND_MIN_ANNOTATION, INITIAL_SCALE_ANNOTATION, MAX_SCALE_ANNOTATION, MIN_SCALE_ANNOTATION,
};

use crate::error::{ControlError, Result};
use crate::models::{Mutation, WorkloadId, WorkloadSpec};

pub use async_trait::async_trait;

/// Read and write access to declared workload configuration
#[async_trait]
pub trait WorkloadPlatform: Send + Sync {
    /// Fetch the current declared configuration of a workload
    async fn fetch(&self, id: &WorkloadId) -> Result<WorkloadSpec>;

    /// Submit a mutation, guarded by `mutation.resource_version`
    async fn submit(&self, id: &WorkloadId, mutation: &Mutation) -> Result<()>;
}

/// Translate a Kubernetes API failure into the controller taxonomy
pub(crate) fn map_kube_error(id: &WorkloadId, err: kube::Error, writing: bool) -> ControlError {
    match err {
        kube::Error::Api(ae) => match ae.code {
            404 => ControlError::NotFound(id.to_string()),
            409 if writing => ControlError::ApplyConflict(ae.message),
            400 | 403 | 422 if writing => ControlError::ApplyRejected(ae.message),
            code => ControlError::Unavailable(format!("API error {}: {}", code, ae.message)),
        },
        other => ControlError::Unavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {}", code),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn test_map_kube_error() {
        let id = WorkloadId::new("default", "hello");

        assert!(matches!(
            map_kube_error(&id, api_error(404), false),
            ControlError::NotFound(_)
        ));
        assert!(matches!(
            map_kube_error(&id, api_error(409), true),
            ControlError::ApplyConflict(_)
        ));
        assert!(matches!(
            map_kube_error(&id, api_error(403), true),
            ControlError::ApplyRejected(_)
        ));
        assert!(matches!(
            map_kube_error(&id, api_error(403), false),
            ControlError::Unavailable(_)
        ));
        assert!(matches!(
            map_kube_error(&id, api_error(503), true),
            ControlError::Unavailable(_)
        ));
    }
}
