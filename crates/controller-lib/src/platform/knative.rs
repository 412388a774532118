//! Knative Service backend
//!
//! Services are handled as `DynamicObject`s so no CRD bindings are needed.
//! The replica target is pinned through the revision template's
//! `min-scale`/`max-scale` annotations; the bounds the controller must stay
//! within are declared on the Service's own metadata.

use super::quantity::{format_cpu, format_memory, parse_cpu_millicores, parse_memory_bytes};
use super::{map_kube_error, WorkloadPlatform};
use crate::error::{ControlError, Result};
use crate::guardrails::Guardrails;
use crate::models::{Mutation, ResourceRequirements, WorkloadId, WorkloadSpec};
use crate::rate_limit::RateLimiter;
use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, PostParams};
use kube::Client;
use serde_json::{Map, Value};
use std::str::FromStr;
use tracing::debug;

pub const MIN_SCALE_ANNOTATION: &str = "autoscaling.knative.dev/min-scale";
pub const MAX_SCALE_ANNOTATION: &str = "autoscaling.knative.dev/max-scale";
pub const INITIAL_SCALE_ANNOTATION: &str = "autoscaling.knative.dev/initial-scale";

/// Lower replica bound declared for the controller on the Service metadata
pub const BOUND_MIN_ANNOTATION: &str = "scaling.knative-controller.io/min-scale";
/// Upper replica bound declared for the controller on the Service metadata
pub const BOUND_MAX_ANNOTATION: &str = "scaling.knative-controller.io/max-scale";

/// Knative Services accessed through the Kubernetes API
pub struct KnativePlatform {
    client: Client,
    resource: ApiResource,
    default_bounds: (u32, u32),
    limiter: RateLimiter,
}

impl KnativePlatform {
    /// Create a platform client.
    ///
    /// Services that declare no bounds fall back to the guardrail range.
    pub fn new(client: Client, guardrails: &Guardrails, limiter: RateLimiter) -> Self {
        let gvk = GroupVersionKind::gvk("serving.knative.dev", "v1", "Service");
        Self {
            client,
            resource: ApiResource::from_gvk(&gvk),
            default_bounds: (guardrails.min_replicas, guardrails.max_replicas),
            limiter,
        }
    }

    fn services(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.resource)
    }
}

#[async_trait]
impl WorkloadPlatform for KnativePlatform {
    async fn fetch(&self, id: &WorkloadId) -> Result<WorkloadSpec> {
        self.limiter.acquire().await;
        let service = self
            .services(&id.namespace)
            .get(&id.name)
            .await
            .map_err(|e| map_kube_error(id, e, false))?;

        spec_from_service(id, &service, self.default_bounds)
    }

    async fn submit(&self, id: &WorkloadId, mutation: &Mutation) -> Result<()> {
        let api = self.services(&id.namespace);

        // The container list is replaced wholesale, so start from the live object;
        // the stale resourceVersion from the mutation still guards the write.
        self.limiter.acquire().await;
        let mut service = api
            .get(&id.name)
            .await
            .map_err(|e| map_kube_error(id, e, false))?;
        apply_mutation_to_service(&mut service, mutation)?;

        self.limiter.acquire().await;
        api.replace(&id.name, &PostParams::default(), &service)
            .await
            .map_err(|e| map_kube_error(id, e, true))?;

        debug!(
            workload = %id,
            replicas = ?mutation.replicas,
            resources_changed = mutation.resources.is_some(),
            "Mutation accepted by platform"
        );
        Ok(())
    }
}

/// Build a `WorkloadSpec` from a Knative Service object
pub fn spec_from_service(
    id: &WorkloadId,
    service: &DynamicObject,
    default_bounds: (u32, u32),
) -> Result<WorkloadSpec> {
    let metadata_annotation = |key: &str| -> Option<u32> {
        service
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .and_then(|v| v.trim().parse().ok())
    };

    let template = service.data.pointer("/spec/template").ok_or_else(|| {
        ControlError::InvalidSpec(format!("{} has no revision template", id))
    })?;
    let container = template
        .pointer("/spec/containers/0")
        .ok_or_else(|| ControlError::InvalidSpec(format!("{} declares no containers", id)))?;

    let min_scale = metadata_annotation(BOUND_MIN_ANNOTATION).unwrap_or(default_bounds.0);
    let max_scale = metadata_annotation(BOUND_MAX_ANNOTATION).unwrap_or(default_bounds.1);

    // An unpinned Service runs at least one instance once it serves traffic
    let replicas = template_annotation::<u32>(template, MIN_SCALE_ANNOTATION)
        .or_else(|| template_annotation::<u32>(template, INITIAL_SCALE_ANNOTATION))
        .unwrap_or_else(|| min_scale.max(1));

    let quantity = |path: &str| container.pointer(path).and_then(Value::as_str);
    let resources = ResourceRequirements {
        cpu_request_millicores: quantity("/resources/requests/cpu")
            .and_then(parse_cpu_millicores)
            .map(|v| v.round() as u64),
        cpu_limit_millicores: quantity("/resources/limits/cpu")
            .and_then(parse_cpu_millicores)
            .map(|v| v.round() as u64),
        memory_request_bytes: quantity("/resources/requests/memory")
            .and_then(parse_memory_bytes)
            .map(|v| v.round() as u64),
        memory_limit_bytes: quantity("/resources/limits/memory")
            .and_then(parse_memory_bytes)
            .map(|v| v.round() as u64),
    };

    let container_concurrency = template
        .pointer("/spec/containerConcurrency")
        .and_then(Value::as_u64)
        .map(|v| v.min(u64::from(u32::MAX)) as u32)
        .unwrap_or(0);

    Ok(WorkloadSpec {
        id: id.clone(),
        min_scale,
        max_scale,
        replicas: Some(replicas),
        resources,
        container_concurrency,
        resource_version: service.metadata.resource_version.clone(),
    })
}

/// Write a mutation into a Service object in place
pub fn apply_mutation_to_service(service: &mut DynamicObject, mutation: &Mutation) -> Result<()> {
    if let Some(version) = &mutation.resource_version {
        service.metadata.resource_version = Some(version.clone());
    }

    if let Some(replicas) = mutation.replicas {
        let annotations = object_at(
            &mut service.data,
            &["spec", "template", "metadata", "annotations"],
        )
        .ok_or_else(|| ControlError::InvalidSpec("malformed revision template".to_string()))?;
        annotations.insert(MIN_SCALE_ANNOTATION.to_string(), Value::from(replicas.to_string()));
        annotations.insert(MAX_SCALE_ANNOTATION.to_string(), Value::from(replicas.to_string()));
    }

    if let Some(resources) = &mutation.resources {
        let container = service
            .data
            .pointer_mut("/spec/template/spec/containers/0")
            .ok_or_else(|| ControlError::InvalidSpec("service declares no containers".to_string()))?;

        let mut set = |section: &str, key: &str, value: String| -> Result<()> {
            object_at(&mut *container, &["resources", section])
                .ok_or_else(|| ControlError::InvalidSpec("malformed container resources".to_string()))?
                .insert(key.to_string(), Value::from(value));
            Ok(())
        };
        if let Some(v) = resources.cpu_request_millicores {
            set("requests", "cpu", format_cpu(v))?;
        }
        if let Some(v) = resources.memory_request_bytes {
            set("requests", "memory", format_memory(v))?;
        }
        if let Some(v) = resources.cpu_limit_millicores {
            set("limits", "cpu", format_cpu(v))?;
        }
        if let Some(v) = resources.memory_limit_bytes {
            set("limits", "memory", format_memory(v))?;
        }
    }

    Ok(())
}

fn template_annotation<T: FromStr>(template: &Value, key: &str) -> Option<T> {
    template
        .pointer("/metadata/annotations")
        .and_then(|a| a.get(key))
        .and_then(Value::as_str)
        .and_then(|v| v.trim().parse().ok())
}

/// Walk (and create) nested objects along `path`
fn object_at<'a>(value: &'a mut Value, path: &[&str]) -> Option<&'a mut Map<String, Value>> {
    let map = value.as_object_mut()?;
    match path.split_first() {
        None => Some(map),
        Some((key, rest)) => {
            let child = map
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            object_at(child, rest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::plan_mutation;
    use crate::decision::FeatureBuilder;
    use crate::models::{MetricsBatch, ScalingAction};
    use serde_json::json;

    fn service_fixture() -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "serving.knative.dev/v1",
            "kind": "Service",
            "metadata": {
                "name": "hello",
                "namespace": "default",
                "resourceVersion": "4711",
                "annotations": {
                    BOUND_MIN_ANNOTATION: "1",
                    BOUND_MAX_ANNOTATION: "5"
                }
            },
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": {
                            MIN_SCALE_ANNOTATION: "2",
                            MAX_SCALE_ANNOTATION: "2"
                        }
                    },
                    "spec": {
                        "containerConcurrency": 10,
                        "containers": [{
                            "name": "user-container",
                            "image": "ghcr.io/knative/helloworld-go:latest",
                            "resources": {
                                "requests": { "cpu": "200m", "memory": "256Mi" },
                                "limits": { "cpu": "1", "memory": "512Mi" }
                            }
                        }]
                    }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_spec_from_service() {
        let id = WorkloadId::new("default", "hello");
        let spec = spec_from_service(&id, &service_fixture(), (1, 10)).unwrap();

        assert_eq!(spec.min_scale, 1);
        assert_eq!(spec.max_scale, 5);
        assert_eq!(spec.replicas, Some(2));
        assert_eq!(spec.container_concurrency, 10);
        assert_eq!(spec.resource_version.as_deref(), Some("4711"));
        assert_eq!(spec.resources.cpu_request_millicores, Some(200));
        assert_eq!(spec.resources.cpu_limit_millicores, Some(1000));
        assert_eq!(spec.resources.memory_request_bytes, Some(256 * 1024 * 1024));
        assert_eq!(spec.resources.memory_limit_bytes, Some(512 * 1024 * 1024));
    }

    #[test]
    fn test_spec_defaults_when_undeclared() {
        let id = WorkloadId::new("default", "bare");
        let service: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "serving.knative.dev/v1",
            "kind": "Service",
            "metadata": { "name": "bare" },
            "spec": { "template": { "spec": { "containers": [{ "image": "app" }] } } }
        }))
        .unwrap();

        let spec = spec_from_service(&id, &service, (1, 10)).unwrap();
        assert_eq!((spec.min_scale, spec.max_scale), (1, 10));
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(spec.resources, ResourceRequirements::default());
        assert_eq!(spec.container_concurrency, 0);
    }

    #[test]
    fn test_unpinned_service_is_controllable() {
        let id = WorkloadId::new("default", "hello");
        let mut service: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "serving.knative.dev/v1",
            "kind": "Service",
            "metadata": {
                "name": "hello",
                "resourceVersion": "9",
                "annotations": { BOUND_MIN_ANNOTATION: "2", BOUND_MAX_ANNOTATION: "6" }
            },
            "spec": { "template": { "spec": { "containers": [{
                "image": "app",
                "resources": { "requests": { "cpu": "250m", "memory": "256Mi" } }
            }] } } }
        }))
        .unwrap();

        let spec = spec_from_service(&id, &service, (1, 10)).unwrap();
        assert_eq!(spec.replicas, Some(2));

        let features = FeatureBuilder::new().build(&spec, &MetricsBatch::default());
        assert!(features.is_ok());

        // The first applied action pins the replica count on the template
        let mutation = plan_mutation(&spec, &ScalingAction::replicas(4))
            .unwrap()
            .unwrap();
        apply_mutation_to_service(&mut service, &mutation).unwrap();

        let pinned = spec_from_service(&id, &service, (1, 10)).unwrap();
        assert_eq!(pinned.replicas, Some(4));
        assert_eq!(
            service.data.pointer("/spec/template/metadata/annotations/autoscaling.knative.dev~1min-scale"),
            Some(&json!("4"))
        );
    }

    #[test]
    fn test_spec_without_containers_is_invalid() {
        let id = WorkloadId::new("default", "empty");
        let service: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "serving.knative.dev/v1",
            "kind": "Service",
            "metadata": { "name": "empty" },
            "spec": { "template": { "spec": { "containers": [] } } }
        }))
        .unwrap();

        assert!(matches!(
            spec_from_service(&id, &service, (1, 10)),
            Err(ControlError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_apply_mutation_pins_replicas_and_resources() {
        let mut service = service_fixture();
        let mutation = Mutation {
            resource_version: Some("4711".to_string()),
            replicas: Some(4),
            resources: Some(ResourceRequirements {
                cpu_request_millicores: Some(400),
                memory_limit_bytes: Some(1024 * 1024 * 1024),
                ..ResourceRequirements::default()
            }),
        };

        apply_mutation_to_service(&mut service, &mutation).unwrap();

        let id = WorkloadId::new("default", "hello");
        let spec = spec_from_service(&id, &service, (1, 10)).unwrap();
        assert_eq!(spec.replicas, Some(4));
        assert_eq!(spec.resources.cpu_request_millicores, Some(400));
        assert_eq!(spec.resources.memory_limit_bytes, Some(1024 * 1024 * 1024));
        // Untouched fields survive
        assert_eq!(spec.resources.cpu_limit_millicores, Some(1000));
        assert_eq!(
            service.data.pointer("/spec/template/metadata/annotations/autoscaling.knative.dev~1max-scale"),
            Some(&json!("4"))
        );
        assert_eq!(
            service.data.pointer("/spec/template/spec/containers/0/image"),
            Some(&json!("ghcr.io/knative/helloworld-go:latest"))
        );
    }

    #[test]
    fn test_apply_mutation_creates_missing_annotations() {
        let mut service: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "serving.knative.dev/v1",
            "kind": "Service",
            "metadata": { "name": "bare", "resourceVersion": "1" },
            "spec": { "template": { "spec": { "containers": [{ "image": "app" }] } } }
        }))
        .unwrap();

        let mutation = Mutation {
            resource_version: Some("1".to_string()),
            replicas: Some(3),
            resources: None,
        };
        apply_mutation_to_service(&mut service, &mutation).unwrap();

        let id = WorkloadId::new("default", "bare");
        let spec = spec_from_service(&id, &service, (1, 10)).unwrap();
        assert_eq!(spec.replicas, Some(3));
    }
}
