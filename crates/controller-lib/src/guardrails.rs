//! Hard floors and ceilings enforced regardless of what the platform declares

use crate::models::WorkloadSpec;
use serde::{Deserialize, Serialize};

/// Minimum CPU request the controller will ever set (100m)
pub const MIN_CPU_MILLICORES: u64 = 100;

/// Minimum memory request the controller will ever set (128Mi)
pub const MIN_MEMORY_BYTES: u64 = 128 * 1024 * 1024;

/// Configured replica and resource guardrails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Guardrails {
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub min_cpu_millicores: u64,
    pub max_cpu_millicores: u64,
    pub min_memory_bytes: u64,
    pub max_memory_bytes: u64,
}

impl Default for Guardrails {
    fn default() -> Self {
        Self {
            min_replicas: 1,
            max_replicas: 10,
            min_cpu_millicores: MIN_CPU_MILLICORES,
            max_cpu_millicores: 4000,
            min_memory_bytes: MIN_MEMORY_BYTES,
            max_memory_bytes: 4 * 1024 * 1024 * 1024,
        }
    }
}

impl Guardrails {
    /// Intersection of the platform-declared scale bounds and the guardrails.
    ///
    /// Returns `None` when the two ranges do not overlap.
    pub fn replica_bounds(&self, spec: &WorkloadSpec) -> Option<(u32, u32)> {
        let lo = spec.min_scale.max(self.min_replicas);
        let hi = spec.max_scale.min(self.max_replicas);
        (lo <= hi).then_some((lo, hi))
    }

    /// Lowest CPU value allowed, never under the absolute floor
    pub fn cpu_floor(&self) -> u64 {
        self.min_cpu_millicores.max(MIN_CPU_MILLICORES)
    }

    /// Lowest memory value allowed, never under the absolute floor
    pub fn memory_floor(&self) -> u64 {
        self.min_memory_bytes.max(MIN_MEMORY_BYTES)
    }

    pub fn cpu_in_range(&self, millicores: u64) -> bool {
        (self.cpu_floor()..=self.max_cpu_millicores).contains(&millicores)
    }

    pub fn memory_in_range(&self, bytes: u64) -> bool {
        (self.memory_floor()..=self.max_memory_bytes).contains(&bytes)
    }

    /// Check internal consistency of configured values
    pub fn validate(&self) -> Result<(), String> {
        if self.min_replicas > self.max_replicas {
            return Err(format!(
                "min_replicas ({}) exceeds max_replicas ({})",
                self.min_replicas, self.max_replicas
            ));
        }
        if self.min_cpu_millicores > self.max_cpu_millicores {
            return Err("min_cpu_millicores exceeds max_cpu_millicores".to_string());
        }
        if self.min_memory_bytes > self.max_memory_bytes {
            return Err("min_memory_bytes exceeds max_memory_bytes".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResourceRequirements, WorkloadId};

    fn spec(min: u32, max: u32) -> WorkloadSpec {
        WorkloadSpec {
            id: WorkloadId::new("default", "hello"),
            min_scale: min,
            max_scale: max,
            replicas: Some(min),
            resources: ResourceRequirements::default(),
            container_concurrency: 0,
            resource_version: None,
        }
    }

    #[test]
    fn test_replica_bounds_intersection() {
        let guardrails = Guardrails {
            min_replicas: 2,
            max_replicas: 8,
            ..Guardrails::default()
        };

        assert_eq!(guardrails.replica_bounds(&spec(1, 5)), Some((2, 5)));
        assert_eq!(guardrails.replica_bounds(&spec(3, 20)), Some((3, 8)));
        assert_eq!(guardrails.replica_bounds(&spec(9, 20)), None);
    }

    #[test]
    fn test_absolute_floors_hold() {
        let guardrails = Guardrails {
            min_cpu_millicores: 10,
            min_memory_bytes: 1024,
            ..Guardrails::default()
        };

        assert_eq!(guardrails.cpu_floor(), MIN_CPU_MILLICORES);
        assert!(!guardrails.cpu_in_range(50));
        assert!(guardrails.cpu_in_range(100));
        assert!(!guardrails.memory_in_range(64 * 1024 * 1024));
        assert!(!guardrails.cpu_in_range(4001));
    }

    #[test]
    fn test_validate_rejects_inverted_ranges() {
        assert!(Guardrails::default().validate().is_ok());

        let inverted = Guardrails {
            min_replicas: 5,
            max_replicas: 1,
            ..Guardrails::default()
        };
        assert!(inverted.validate().is_err());
    }
}
