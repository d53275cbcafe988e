//! Consistent-hash ring selection

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::balancer::{not_found, stable_hash64, try_choose_half_open, LoadBalancer};
use crate::model::{Criteria, Instance, ServiceInstances, ServiceKey};
use crate::Result;

/// Hash ring with virtual nodes per instance.
///
/// Rings are cached per service and placed over the full membership; lookup
/// walks clockwise past excluded instances, so breaker state changes never
/// force a rebuild — only membership changes do (tracked by the view's
/// revision).
#[derive(Debug)]
pub struct ConsistentHashBalancer {
    vnode_count: u32,
    rings: DashMap<ServiceKey, Arc<Ring>>,
}

#[derive(Debug)]
struct Ring {
    revision: u64,
    /// `(point, index into the stable instance order)`, sorted by point.
    points: Vec<(u64, usize)>,
}

impl Ring {
    fn build(instances: &[Instance], vnode_count: u32, revision: u64) -> Self {
        let mut points = Vec::with_capacity(instances.len() * vnode_count as usize);
        for (index, instance) in instances.iter().enumerate() {
            for vnode in 0..vnode_count {
                let point = stable_hash64(format!("{}#{vnode}", instance.id).as_bytes());
                points.push((point, index));
            }
        }
        points.sort_unstable();
        Self { revision, points }
    }

    /// First ring entry at or after `point`, wrapping at the top.
    fn position(&self, point: u64) -> usize {
        self.points.partition_point(|(p, _)| *p < point) % self.points.len()
    }
}

impl ConsistentHashBalancer {
    /// Create a ring balancer with `vnode_count` virtual nodes per instance.
    #[must_use]
    pub fn new(vnode_count: u32) -> Self {
        Self {
            vnode_count: vnode_count.max(1),
            rings: DashMap::new(),
        }
    }

    fn ring_for(&self, instances: &ServiceInstances) -> Arc<Ring> {
        if let Some(ring) = self.rings.get(instances.service()) {
            if ring.revision == instances.revision() {
                return Arc::clone(&ring);
            }
        }

        debug!(
            service = %instances.service(),
            instances = instances.len(),
            "rebuilding hash ring"
        );
        let ring = Arc::new(Ring::build(
            instances.all(),
            self.vnode_count,
            instances.revision(),
        ));
        self.rings
            .insert(instances.service().clone(), Arc::clone(&ring));
        ring
    }
}

impl LoadBalancer for ConsistentHashBalancer {
    fn name(&self) -> &'static str {
        "ringHash"
    }

    fn choose(&self, instances: &ServiceInstances, criteria: &Criteria) -> Result<Instance> {
        if let Some(probe) = try_choose_half_open(instances, criteria) {
            return Ok(probe);
        }

        let available = instances.available();
        if available.is_empty() {
            return Err(not_found(instances));
        }
        let admissible: HashSet<&str> = available.iter().map(|i| i.id.as_str()).collect();

        let ring = self.ring_for(instances);
        let all = instances.all();
        let start = ring.position(stable_hash64(&criteria.hash_key.to_le_bytes()));
        for step in 0..ring.points.len() {
            let (_, index) = ring.points[(start + step) % ring.points.len()];
            let instance = &all[index];
            if admissible.contains(instance.id.as_str()) {
                return Ok(instance.clone());
            }
        }
        // Unreachable while `available` is non-empty; kept as a hard stop.
        Err(not_found(instances))
    }
}
