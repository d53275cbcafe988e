//! Status-aware load balancing
//!
//! Every strategy shares the same outer contract: unless the caller opts
//! out, a HalfOpen instance may be returned first — but only through the
//! status table's admission gate, so probe traffic stays within the
//! configured budget. Selection proper then runs over the available set
//! (Closed instances only); an empty set is `InstanceNotFound`.

mod consistent;
mod hash;
mod maglev;
mod random;
mod round_robin;

pub use consistent::ConsistentHashBalancer;
pub use hash::HashBalancer;
pub use maglev::MaglevBalancer;
pub(crate) use maglev::is_prime;
pub use random::RandomBalancer;
pub use round_robin::RoundRobinBalancer;

use sha2::{Digest, Sha256};

use crate::model::{Criteria, Instance, ServiceInstances};
use crate::{Error, Result};

/// A load-balancing strategy.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Registry name of the strategy.
    fn name(&self) -> &'static str;

    /// Select one instance for the given criteria.
    fn choose(&self, instances: &ServiceInstances, criteria: &Criteria) -> Result<Instance>;
}

/// Shared pre-step: hand out one admitted HalfOpen probe slot, if any.
pub(crate) fn try_choose_half_open(
    instances: &ServiceInstances,
    criteria: &Criteria,
) -> Option<Instance> {
    if criteria.ignore_half_open {
        return None;
    }
    let status = instances.status();
    instances
        .half_open()
        .into_iter()
        .find(|candidate| status.try_admit_half_open(&candidate.id))
        .cloned()
}

pub(crate) fn not_found(instances: &ServiceInstances) -> Error {
    Error::InstanceNotFound(format!(
        "service {} has no available instance",
        instances.service()
    ))
}

/// Stable 64-bit hash used for ring and table placement. Digest-based so
/// placement is identical across processes and runs.
pub(crate) fn stable_hash64(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(word)
}
