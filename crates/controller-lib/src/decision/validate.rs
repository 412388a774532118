//! Translation of discrete action codes and range validation of actions

use crate::error::{ControlError, Result};
use crate::guardrails::Guardrails;
use crate::models::{ResourceDelta, ResourceRequirements, ScalingAction, WorkloadSpec};

/// Discrete actions understood by the legacy model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionCode {
    Noop,
    ScaleUp,
    ScaleDown,
    GrowResources,
    ShrinkResources,
}

impl TryFrom<i64> for ActionCode {
    type Error = ControlError;

    fn try_from(code: i64) -> Result<Self> {
        match code {
            0 => Ok(ActionCode::Noop),
            1 => Ok(ActionCode::ScaleUp),
            2 => Ok(ActionCode::ScaleDown),
            3 => Ok(ActionCode::GrowResources),
            4 => Ok(ActionCode::ShrinkResources),
            other => Err(ControlError::DecisionInvalid(format!(
                "unknown action code {}",
                other
            ))),
        }
    }
}

/// Express an action code as a structured action relative to `spec`.
///
/// Resource changes are clamped to the guardrails; replica changes are left
/// for [`validate_action`] to judge.
pub fn translate_action_code(
    code: ActionCode,
    spec: &WorkloadSpec,
    guardrails: &Guardrails,
) -> Result<ScalingAction> {
    let current = || {
        spec.replicas.ok_or_else(|| {
            ControlError::InvalidSpec(format!("{} has no pinned replica count", spec.id))
        })
    };

    let action = match code {
        ActionCode::Noop => ScalingAction::noop(),
        ActionCode::ScaleUp => ScalingAction::replicas(current()?.saturating_add(1)),
        ActionCode::ScaleDown => ScalingAction::replicas(current()?.saturating_sub(1).max(1)),
        ActionCode::GrowResources => resource_action(spec, guardrails, |value, (_, ceiling)| {
            value.saturating_mul(2).min(ceiling).max(value)
        }),
        ActionCode::ShrinkResources => resource_action(spec, guardrails, |value, (floor, _)| {
            (value / 2).max(floor).min(value)
        }),
    };
    Ok(action)
}

fn resource_action(
    spec: &WorkloadSpec,
    guardrails: &Guardrails,
    adjust: impl Fn(u64, (u64, u64)) -> u64,
) -> ScalingAction {
    let cpu = (guardrails.cpu_floor(), guardrails.max_cpu_millicores);
    let memory = (guardrails.memory_floor(), guardrails.max_memory_bytes);
    let delta_of = |value: Option<u64>, range: (u64, u64)| -> i64 {
        value
            .map(|v| adjust(v, range) as i64 - v as i64)
            .unwrap_or(0)
    };

    let r = &spec.resources;
    let delta = ResourceDelta {
        cpu_request_millicores: delta_of(r.cpu_request_millicores, cpu),
        cpu_limit_millicores: delta_of(r.cpu_limit_millicores, cpu),
        memory_request_bytes: delta_of(r.memory_request_bytes, memory),
        memory_limit_bytes: delta_of(r.memory_limit_bytes, memory),
    };

    ScalingAction {
        resources: (!delta.is_zero()).then_some(delta),
        ..ScalingAction::noop()
    }
}

/// Apply a delta to declared resources.
///
/// Returns `None` when the delta touches an undeclared value or leaves the
/// `u64` range.
pub fn resolve_resources(
    current: &ResourceRequirements,
    delta: &ResourceDelta,
) -> Option<ResourceRequirements> {
    fn shift(value: Option<u64>, delta: i64) -> Option<Option<u64>> {
        match (value, delta) {
            (value, 0) => Some(value),
            (None, _) => None,
            (Some(v), d) => v.checked_add_signed(d).map(Some),
        }
    }

    Some(ResourceRequirements {
        cpu_request_millicores: shift(current.cpu_request_millicores, delta.cpu_request_millicores)?,
        cpu_limit_millicores: shift(current.cpu_limit_millicores, delta.cpu_limit_millicores)?,
        memory_request_bytes: shift(current.memory_request_bytes, delta.memory_request_bytes)?,
        memory_limit_bytes: shift(current.memory_limit_bytes, delta.memory_limit_bytes)?,
    })
}

/// Check an action against the effective bounds of `spec`
pub fn validate_action(
    action: &ScalingAction,
    spec: &WorkloadSpec,
    guardrails: &Guardrails,
) -> Result<()> {
    let invalid = |msg: String| Err(ControlError::DecisionInvalid(msg));

    if !action.confidence.is_finite() || !(0.0..=1.0).contains(&action.confidence) {
        return invalid(format!("confidence {} outside [0, 1]", action.confidence));
    }

    if let Some(target) = action.replicas {
        let Some((lo, hi)) = guardrails.replica_bounds(spec) else {
            return invalid(format!(
                "declared bounds [{}, {}] do not overlap the guardrails",
                spec.min_scale, spec.max_scale
            ));
        };
        if !(lo..=hi).contains(&target) {
            return invalid(format!("replicas {} outside [{}, {}]", target, lo, hi));
        }
    }

    let Some(delta) = action.resources.filter(|d| !d.is_zero()) else {
        return Ok(());
    };
    let Some(target) = resolve_resources(&spec.resources, &delta) else {
        return invalid("resource delta targets an undeclared or negative value".to_string());
    };

    for cpu in [target.cpu_request_millicores, target.cpu_limit_millicores]
        .into_iter()
        .flatten()
    {
        if !guardrails.cpu_in_range(cpu) {
            return invalid(format!("cpu {}m outside guardrails", cpu));
        }
    }
    for memory in [target.memory_request_bytes, target.memory_limit_bytes]
        .into_iter()
        .flatten()
    {
        if !guardrails.memory_in_range(memory) {
            return invalid(format!("memory {} bytes outside guardrails", memory));
        }
    }

    if let (Some(req), Some(lim)) = (target.cpu_request_millicores, target.cpu_limit_millicores) {
        if req > lim {
            return invalid(format!("cpu request {}m above limit {}m", req, lim));
        }
    }
    if let (Some(req), Some(lim)) = (target.memory_request_bytes, target.memory_limit_bytes) {
        if req > lim {
            return invalid(format!("memory request {} above limit {}", req, lim));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardrails::{MIN_CPU_MILLICORES, MIN_MEMORY_BYTES};
    use crate::models::WorkloadId;

    const MI: u64 = 1024 * 1024;

    fn spec() -> WorkloadSpec {
        WorkloadSpec {
            id: WorkloadId::new("default", "hello"),
            min_scale: 1,
            max_scale: 5,
            replicas: Some(2),
            resources: ResourceRequirements {
                cpu_request_millicores: Some(150),
                cpu_limit_millicores: Some(500),
                memory_request_bytes: Some(256 * MI),
                memory_limit_bytes: Some(512 * MI),
            },
            container_concurrency: 0,
            resource_version: Some("7".to_string()),
        }
    }

    #[test]
    fn test_unknown_code_rejected() {
        assert_eq!(ActionCode::try_from(3).unwrap(), ActionCode::GrowResources);
        assert!(matches!(
            ActionCode::try_from(5),
            Err(ControlError::DecisionInvalid(_))
        ));
        assert!(ActionCode::try_from(-1).is_err());
    }

    #[test]
    fn test_scale_codes() {
        let g = Guardrails::default();
        let up = translate_action_code(ActionCode::ScaleUp, &spec(), &g).unwrap();
        assert_eq!(up.replicas, Some(3));

        let mut single = spec();
        single.replicas = Some(1);
        let down = translate_action_code(ActionCode::ScaleDown, &single, &g).unwrap();
        assert_eq!(down.replicas, Some(1));

        let noop = translate_action_code(ActionCode::Noop, &spec(), &g).unwrap();
        assert!(!noop.is_actionable());
    }

    #[test]
    fn test_shrink_respects_floors() {
        let g = Guardrails::default();
        let action = translate_action_code(ActionCode::ShrinkResources, &spec(), &g).unwrap();
        let target = resolve_resources(&spec().resources, &action.resources.unwrap()).unwrap();

        assert_eq!(target.cpu_request_millicores, Some(MIN_CPU_MILLICORES));
        assert_eq!(target.cpu_limit_millicores, Some(250));
        assert_eq!(target.memory_request_bytes, Some(MIN_MEMORY_BYTES));
        assert_eq!(target.memory_limit_bytes, Some(256 * MI));
        assert!(validate_action(&action, &spec(), &g).is_ok());
    }

    #[test]
    fn test_grow_clamps_to_ceiling() {
        let g = Guardrails {
            max_cpu_millicores: 800,
            ..Guardrails::default()
        };
        let action = translate_action_code(ActionCode::GrowResources, &spec(), &g).unwrap();
        let target = resolve_resources(&spec().resources, &action.resources.unwrap()).unwrap();

        assert_eq!(target.cpu_request_millicores, Some(300));
        assert_eq!(target.cpu_limit_millicores, Some(800));
        assert_eq!(target.memory_limit_bytes, Some(1024 * MI));
        assert!(validate_action(&action, &spec(), &g).is_ok());
    }

    #[test]
    fn test_replicas_outside_effective_bounds() {
        let g = Guardrails {
            max_replicas: 4,
            ..Guardrails::default()
        };

        assert!(validate_action(&ScalingAction::replicas(4), &spec(), &g).is_ok());
        assert!(matches!(
            validate_action(&ScalingAction::replicas(5), &spec(), &g),
            Err(ControlError::DecisionInvalid(_))
        ));
        assert!(validate_action(&ScalingAction::replicas(0), &spec(), &g).is_err());
    }

    #[test]
    fn test_resource_violations() {
        let g = Guardrails::default();
        let with_delta = |delta: ResourceDelta| ScalingAction {
            resources: Some(delta),
            ..ScalingAction::noop()
        };

        let below_floor = with_delta(ResourceDelta {
            cpu_request_millicores: -100,
            ..ResourceDelta::default()
        });
        assert!(validate_action(&below_floor, &spec(), &g).is_err());

        let request_over_limit = with_delta(ResourceDelta {
            memory_request_bytes: (300 * MI) as i64,
            ..ResourceDelta::default()
        });
        assert!(validate_action(&request_over_limit, &spec(), &g).is_err());

        let mut undeclared = spec();
        undeclared.resources.cpu_limit_millicores = None;
        let touches_undeclared = with_delta(ResourceDelta {
            cpu_limit_millicores: 100,
            ..ResourceDelta::default()
        });
        assert!(validate_action(&touches_undeclared, &undeclared, &g).is_err());
    }

    #[test]
    fn test_confidence_must_be_finite() {
        let g = Guardrails::default();
        let action = ScalingAction {
            confidence: f32::NAN,
            ..ScalingAction::replicas(3)
        };
        assert!(validate_action(&action, &spec(), &g).is_err());
    }
}
