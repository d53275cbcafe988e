//! Random and weighted-random selection

use rand::Rng;

use crate::balancer::{not_found, try_choose_half_open, LoadBalancer};
use crate::model::{Criteria, Instance, ServiceInstances};
use crate::Result;

/// Uniform or weight-proportional random choice over the available set.
#[derive(Debug)]
pub struct RandomBalancer {
    weighted: bool,
}

impl RandomBalancer {
    /// Uniform selection.
    #[must_use]
    pub fn uniform() -> Self {
        Self { weighted: false }
    }

    /// Weight-proportional selection.
    #[must_use]
    pub fn weighted() -> Self {
        Self { weighted: true }
    }
}

impl LoadBalancer for RandomBalancer {
    fn name(&self) -> &'static str {
        if self.weighted {
            "weightedRandom"
        } else {
            "random"
        }
    }

    fn choose(&self, instances: &ServiceInstances, criteria: &Criteria) -> Result<Instance> {
        if let Some(probe) = try_choose_half_open(instances, criteria) {
            return Ok(probe);
        }

        let available = instances.available();
        if available.is_empty() {
            return Err(not_found(instances));
        }

        let mut rng = rand::thread_rng();
        if self.weighted {
            let total: u64 = available.iter().map(|i| u64::from(i.weight)).sum();
            if total > 0 {
                let mut point = rng.gen_range(0..total);
                for instance in &available {
                    let weight = u64::from(instance.weight);
                    if point < weight {
                        return Ok((*instance).clone());
                    }
                    point -= weight;
                }
            }
            // All weights zero: fall through to uniform.
        }

        let index = rng.gen_range(0..available.len());
        Ok(available[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::tests::service;
    use crate::breaker::status::CircuitState;
    use crate::model::{Instance, ServiceInstances, ServiceKey};
    use crate::Error;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn uniform_covers_all_available_instances() {
        let (view, _status) = service(&["a", "b", "c"], 4);
        let balancer = RandomBalancer::uniform();
        let mut seen = HashMap::new();
        for _ in 0..300 {
            let chosen = balancer.choose(&view, &Criteria::default()).unwrap();
            *seen.entry(chosen.id.as_str().to_string()).or_insert(0u32) += 1;
        }
        assert_eq!(seen.len(), 3, "every instance should be hit: {seen:?}");
    }

    #[test]
    fn open_instances_are_excluded() {
        let (view, status) = service(&["a", "b"], 4);
        status.translate(&"a".into(), CircuitState::Closed, CircuitState::Open);
        let balancer = RandomBalancer::uniform();
        for _ in 0..50 {
            let chosen = balancer.choose(&view, &Criteria::default()).unwrap();
            assert_eq!(chosen.id.as_str(), "b");
        }
    }

    #[test]
    fn empty_available_set_is_not_found() {
        let (view, status) = service(&["a"], 4);
        status.translate(&"a".into(), CircuitState::Closed, CircuitState::Open);
        let err = RandomBalancer::uniform()
            .choose(&view, &Criteria::default())
            .unwrap_err();
        assert!(matches!(err, Error::InstanceNotFound(_)));
    }

    #[test]
    fn weighted_selection_skews_toward_heavy_instances() {
        let status = Arc::new(crate::breaker::status::StatusTable::new(4, true));
        let instances = vec![
            Instance::with_weight("heavy", "10.0.0.1", 1, 900),
            Instance::with_weight("light", "10.0.0.2", 2, 100),
        ];
        let view = ServiceInstances::new(ServiceKey::new("test", "svc"), instances, status);

        let balancer = RandomBalancer::weighted();
        let mut heavy = 0u32;
        for _ in 0..1_000 {
            if balancer
                .choose(&view, &Criteria::default())
                .unwrap()
                .id
                .as_str()
                == "heavy"
            {
                heavy += 1;
            }
        }
        assert!(heavy > 700, "expected ~900 heavy picks, got {heavy}");
    }

    #[test]
    fn zero_weights_fall_back_to_uniform() {
        let status = Arc::new(crate::breaker::status::StatusTable::new(4, true));
        let instances = vec![
            Instance::with_weight("a", "10.0.0.1", 1, 0),
            Instance::with_weight("b", "10.0.0.2", 2, 0),
        ];
        let view = ServiceInstances::new(ServiceKey::new("test", "svc"), instances, status);

        let balancer = RandomBalancer::weighted();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            seen.insert(
                balancer
                    .choose(&view, &Criteria::default())
                    .unwrap()
                    .id
                    .as_str()
                    .to_string(),
            );
        }
        assert_eq!(seen.len(), 2);
    }
}
