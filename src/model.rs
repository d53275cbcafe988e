//! Core value types shared across the engine
//!
//! Everything here is a plain data carrier: instances and their identities,
//! per-call outcome reports, and the selection criteria handed to load
//! balancers. The only behavior lives in [`ServiceInstances`], which joins a
//! service's instance set with the circuit-breaker status table to expose the
//! availability view balancers select from.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::breaker::status::{CircuitState, StatusTable};

/// Stable opaque identifier of a service instance.
///
/// Cheap to clone; every per-instance table in the engine is keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Arc<str>);

impl InstanceId {
    /// Wrap an identifier string.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// View the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for InstanceId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// Namespaced service identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceKey {
    /// Namespace the service is registered under
    pub namespace: String,
    /// Service name
    pub name: String,
}

impl ServiceKey {
    /// Build a service key from namespace and name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A network endpoint `(host, port)` belonging to a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Stable instance identifier
    pub id: InstanceId,
    /// Host name or IP
    pub host: String,
    /// Port
    pub port: u16,
    /// Relative selection weight
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    100
}

impl Instance {
    /// Build an instance with the default weight.
    pub fn new(id: impl Into<InstanceId>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            weight: default_weight(),
        }
    }

    /// Same, with an explicit weight.
    pub fn with_weight(
        id: impl Into<InstanceId>,
        host: impl Into<String>,
        port: u16,
        weight: u32,
    ) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            weight,
        }
    }

    /// `host:port` form for socket addresses and log lines.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Result of one call from the embedding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallOutcome {
    /// Call completed successfully
    Ok,
    /// Call failed
    Fail,
    /// Call exceeded its deadline
    Timeout,
}

impl CallOutcome {
    /// Whether this outcome counts as an error in instance statistics.
    #[must_use]
    pub fn is_error(self) -> bool {
        !matches!(self, Self::Ok)
    }
}

/// One reported call outcome, as fed into the breaker chain.
#[derive(Debug, Clone)]
pub struct InstanceGauge {
    /// Instance the call targeted
    pub instance_id: InstanceId,
    /// How the call went
    pub outcome: CallOutcome,
    /// Observed latency in milliseconds
    pub latency_ms: u64,
}

impl InstanceGauge {
    /// Build a gauge.
    pub fn new(instance_id: impl Into<InstanceId>, outcome: CallOutcome, latency_ms: u64) -> Self {
        Self {
            instance_id: instance_id.into(),
            outcome,
            latency_ms,
        }
    }
}

/// Selection hints handed to a load balancer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Criteria {
    /// Key for hash-based balancers
    pub hash_key: u64,
    /// Skip the half-open probe admission pre-step
    pub ignore_half_open: bool,
}

/// A service's instance set joined with the breaker status table.
///
/// This is the load balancer's entire world: the full membership (for hash
/// placement), the available subset (Closed only), and the half-open
/// candidates eligible for probe admission. Instances are kept sorted by id
/// so hash-based selection sees a stable order across processes.
#[derive(Debug)]
pub struct ServiceInstances {
    service: ServiceKey,
    instances: Vec<Instance>,
    revision: u64,
    status: Arc<StatusTable>,
}

impl ServiceInstances {
    /// Build the view. Instances are sorted by id; duplicates by id keep the
    /// first occurrence.
    pub fn new(service: ServiceKey, mut instances: Vec<Instance>, status: Arc<StatusTable>) -> Self {
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        instances.dedup_by(|a, b| a.id == b.id);
        let revision = membership_revision(&instances);
        Self {
            service,
            instances,
            revision,
            status,
        }
    }

    /// Service this set belongs to.
    #[must_use]
    pub fn service(&self) -> &ServiceKey {
        &self.service
    }

    /// Full membership in stable (id-sorted) order.
    #[must_use]
    pub fn all(&self) -> &[Instance] {
        &self.instances
    }

    /// Instances whose breaker state is Closed.
    #[must_use]
    pub fn available(&self) -> Vec<&Instance> {
        self.instances
            .iter()
            .filter(|i| self.status.state(&i.id) == CircuitState::Closed)
            .collect()
    }

    /// Instances currently in HalfOpen, i.e. candidates for probe admission.
    #[must_use]
    pub fn half_open(&self) -> Vec<&Instance> {
        self.instances
            .iter()
            .filter(|i| self.status.state(&i.id) == CircuitState::HalfOpen)
            .collect()
    }

    /// Order-insensitive fingerprint of the membership. Ring and table
    /// balancers cache their structures keyed by this value.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Shared status table handle.
    #[must_use]
    pub fn status(&self) -> &Arc<StatusTable> {
        &self.status
    }

    /// Number of instances in the full set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the full set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

fn membership_revision(instances: &[Instance]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for instance in instances {
        instance.id.hash(&mut hasher);
        instance.weight.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Arc<StatusTable> {
        Arc::new(StatusTable::new(10, true))
    }

    fn set(ids: &[&str]) -> ServiceInstances {
        let instances = ids
            .iter()
            .map(|id| Instance::new(*id, "127.0.0.1", 8000))
            .collect();
        ServiceInstances::new(ServiceKey::new("test", "svc"), instances, table())
    }

    #[test]
    fn outcome_error_classification() {
        assert!(!CallOutcome::Ok.is_error());
        assert!(CallOutcome::Fail.is_error());
        assert!(CallOutcome::Timeout.is_error());
    }

    #[test]
    fn instances_sorted_and_deduped() {
        let view = set(&["c", "a", "b", "a"]);
        let ids: Vec<&str> = view.all().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn revision_ignores_input_order() {
        let a = set(&["x", "y", "z"]);
        let b = set(&["z", "x", "y"]);
        assert_eq!(a.revision(), b.revision());

        let c = set(&["x", "y"]);
        assert_ne!(a.revision(), c.revision());
    }

    #[test]
    fn availability_tracks_status_table() {
        let status = table();
        let instances = vec![
            Instance::new("a", "127.0.0.1", 1),
            Instance::new("b", "127.0.0.1", 2),
        ];
        let view = ServiceInstances::new(
            ServiceKey::new("test", "svc"),
            instances,
            Arc::clone(&status),
        );

        assert_eq!(view.available().len(), 2);

        assert!(status.translate(&"a".into(), CircuitState::Closed, CircuitState::Open));
        assert_eq!(view.available().len(), 1);
        assert_eq!(view.available()[0].id.as_str(), "b");
        assert!(view.half_open().is_empty());

        assert!(status.translate(&"a".into(), CircuitState::Open, CircuitState::HalfOpen));
        assert_eq!(view.half_open().len(), 1);
    }
}
