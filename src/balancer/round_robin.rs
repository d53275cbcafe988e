//! Round-robin selection

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::balancer::{not_found, try_choose_half_open, LoadBalancer};
use crate::model::{Criteria, Instance, ServiceInstances};
use crate::Result;

/// Monotonic counter mod the available set size.
#[derive(Default)]
#[derive(Debug)]
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    /// Create a balancer starting at the first available instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn name(&self) -> &'static str {
        "roundRobin"
    }

    fn choose(&self, instances: &ServiceInstances, criteria: &Criteria) -> Result<Instance> {
        if let Some(probe) = try_choose_half_open(instances, criteria) {
            return Ok(probe);
        }

        let available = instances.available();
        if available.is_empty() {
            return Err(not_found(instances));
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % available.len();
        Ok(available[index].clone())
    }
}
