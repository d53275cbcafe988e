//! Key-modulo hash selection

use crate::balancer::{not_found, try_choose_half_open, LoadBalancer};
use crate::model::{Criteria, Instance, ServiceInstances};
use crate::Result;

/// `hash_key mod size` over the stable (id-sorted) instance order. Same key,
/// same membership, same instance — across processes.
#[derive(Default)]
#[derive(Debug)]
pub struct HashBalancer;

impl HashBalancer {
    /// Create the balancer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for HashBalancer {
    fn name(&self) -> &'static str {
        "hash"
    }

    fn choose(&self, instances: &ServiceInstances, criteria: &Criteria) -> Result<Instance> {
        if let Some(probe) = try_choose_half_open(instances, criteria) {
            return Ok(probe);
        }

        let available = instances.available();
        if available.is_empty() {
            return Err(not_found(instances));
        }

        let index = (criteria.hash_key % available.len() as u64) as usize;
        Ok(available[index].clone())
    }
}
