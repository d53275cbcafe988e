//! Maglev lookup-table selection

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::balancer::{not_found, stable_hash64, try_choose_half_open, LoadBalancer};
use crate::model::{Criteria, Instance, ServiceInstances, ServiceKey};
use crate::Result;

/// Maglev hashing: each instance fills a prime-sized lookup table through its
/// own permutation of the slots, giving near-equal shares and minimal
/// disruption on membership change. Tables are cached per service; lookup is
/// one hash and one index, and slots owned by an excluded instance are probed
/// forward at selection time so breaker flips never force a rebuild.
#[derive(Debug)]
pub struct MaglevBalancer {
    table_size: u32,
    tables: DashMap<ServiceKey, Arc<Table>>,
}

#[derive(Debug)]
struct Table {
    revision: u64,
    /// Instance index (into the stable order) per slot.
    lookup: Vec<u32>,
}

impl Table {
    fn build(instances: &[Instance], table_size: u32, revision: u64) -> Self {
        let m = table_size as usize;
        let n = instances.len();

        // Per-instance permutation parameters: offset picks the first slot,
        // skip (coprime with a prime m) strides the rest.
        let mut offsets = Vec::with_capacity(n);
        let mut skips = Vec::with_capacity(n);
        for instance in instances {
            let h1 = stable_hash64(instance.id.as_str().as_bytes());
            let h2 = stable_hash64(format!("{}#skip", instance.id).as_bytes());
            offsets.push((h1 % m as u64) as usize);
            skips.push((h2 % (m as u64 - 1) + 1) as usize);
        }

        let mut next = vec![0usize; n];
        let mut lookup = vec![u32::MAX; m];
        let mut filled = 0usize;
        'fill: loop {
            for i in 0..n {
                let slot = loop {
                    let candidate = (offsets[i] + next[i] * skips[i]) % m;
                    next[i] += 1;
                    if lookup[candidate] == u32::MAX {
                        break candidate;
                    }
                };
                lookup[slot] = i as u32;
                filled += 1;
                if filled == m {
                    break 'fill;
                }
            }
        }

        Self { revision, lookup }
    }
}

/// Whether `n` is prime. Trial division; table sizes are small enough.
pub(crate) fn is_prime(n: u32) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut divisor = 3u64;
    while divisor * divisor <= u64::from(n) {
        if u64::from(n) % divisor == 0 {
            return false;
        }
        divisor += 2;
    }
    true
}

/// Largest prime representable in `u32`; the upward search must not wrap.
const MAX_TABLE_PRIME: u32 = 4_294_967_291;

fn next_prime(n: u32) -> u32 {
    let mut candidate = n.min(MAX_TABLE_PRIME);
    while !is_prime(candidate) {
        candidate += 1;
    }
    candidate
}

impl MaglevBalancer {
    /// Create a balancer with the given lookup table size.
    ///
    /// The size must be prime for every instance's offset/skip permutation
    /// to visit all slots; a composite size would let a skip share a factor
    /// with it and the fill loop would cycle over a subset forever. Sizes
    /// that are not prime are bumped to the next prime.
    #[must_use]
    pub fn new(table_size: u32) -> Self {
        Self {
            table_size: next_prime(table_size.max(3)),
            tables: DashMap::new(),
        }
    }

    fn table_for(&self, instances: &ServiceInstances) -> Arc<Table> {
        if let Some(table) = self.tables.get(instances.service()) {
            if table.revision == instances.revision() {
                return Arc::clone(&table);
            }
        }

        debug!(
            service = %instances.service(),
            instances = instances.len(),
            table_size = self.table_size,
            "rebuilding maglev table"
        );
        let table = Arc::new(Table::build(
            instances.all(),
            self.table_size,
            instances.revision(),
        ));
        self.tables
            .insert(instances.service().clone(), Arc::clone(&table));
        table
    }
}

impl LoadBalancer for MaglevBalancer {
    fn name(&self) -> &'static str {
        "maglev"
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

        let table = self.table_for(instances);
        let all = instances.all();
        let m = table.lookup.len();
        let start = (stable_hash64(&criteria.hash_key.to_le_bytes()) % m as u64) as usize;
        for step in 0..m {
            let index = table.lookup[(start + step) % m] as usize;
            let instance = &all[index];
            if admissible.contains(instance.id.as_str()) {
                return Ok(instance.clone());
            }
        }
        Err(not_found(instances))
    }
}
