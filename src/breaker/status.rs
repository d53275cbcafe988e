//! Authoritative circuit-breaker state per instance
//!
//! The [`StatusTable`] owns every instance's breaker state. Strategies and
//! the health-check chain hold non-owning handles and request transitions
//! through [`StatusTable::translate`]; the table's compare-and-swap is the
//! single serialization point, so exactly one transition wins per race and
//! the losers drop out silently.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::model::InstanceId;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Permit all traffic
    Closed = 0,
    /// Block all traffic
    Open = 1,
    /// Permit a bounded probe burst
    HalfOpen = 2,
}

impl CircuitState {
    /// Lowercase label used in logs and snapshots.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

/// Per-instance state cell. Counters track the HalfOpen probe budget.
#[derive(Debug)]
struct StatusEntry {
    state: AtomicU8,
    half_open_admitted: AtomicU32,
    half_open_success: AtomicU32,
}

impl StatusEntry {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            half_open_admitted: AtomicU32::new(0),
            half_open_success: AtomicU32::new(0),
        }
    }
}

/// Shared table of per-instance breaker state.
///
/// Reads are wait-free on the entry (a single atomic load); entry lookup goes
/// through a sharded concurrent map. Absent instances read as `Closed`.
#[derive(Debug)]
pub struct StatusTable {
    entries: DashMap<InstanceId, Arc<StatusEntry>>,
    half_open_budget: u32,
    auto_half_open: bool,
}

impl StatusTable {
    /// Create a table. `half_open_budget` is the maximum number of concurrent
    /// probe admissions while an instance is HalfOpen; `auto_half_open`
    /// controls whether the periodic evaluator may move Open instances to
    /// HalfOpen on its own once the sleep window elapses (disabled when an
    /// active health-check chain drives recovery instead).
    #[must_use]
    pub fn new(half_open_budget: u32, auto_half_open: bool) -> Self {
        Self {
            entries: DashMap::new(),
            half_open_budget,
            auto_half_open,
        }
    }

    /// Whether the periodic evaluator owns Open→HalfOpen transitions.
    #[must_use]
    pub fn auto_half_open_enabled(&self) -> bool {
        self.auto_half_open
    }

    /// Current state of `instance`. Unknown instances are Closed.
    #[must_use]
    pub fn state(&self, instance: &InstanceId) -> CircuitState {
        self.entries
            .get(instance)
            .map_or(CircuitState::Closed, |entry| {
                CircuitState::from_u8(entry.state.load(Ordering::SeqCst))
            })
    }

    /// Atomically transition `instance` from `from` to `to`.
    ///
    /// Returns `true` iff this call won the swap. A `false` return is not an
    /// error: a competing strategy already moved the instance, and the caller
    /// is expected to drop its request.
    pub fn translate(&self, instance: &InstanceId, from: CircuitState, to: CircuitState) -> bool {
        if from == to {
            return false;
        }
        let entry = match self.entries.get(instance) {
            Some(entry) => Arc::clone(&entry),
            None => {
                if from != CircuitState::Closed {
                    // Absent reads as Closed; nothing to move.
                    return false;
                }
                Arc::clone(
                    self.entries
                        .entry(instance.clone())
                        .or_insert_with(|| Arc::new(StatusEntry::new()))
                        .value(),
                )
            }
        };

        let won = entry
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if !won {
            return false;
        }

        match to {
            CircuitState::Open => {
                warn!(instance = %instance, from = from.as_str(), "circuit breaker opened");
            }
            CircuitState::HalfOpen => {
                entry.half_open_admitted.store(0, Ordering::SeqCst);
                entry.half_open_success.store(0, Ordering::SeqCst);
                debug!(instance = %instance, "circuit breaker half-open");
            }
            CircuitState::Closed => {
                entry.half_open_admitted.store(0, Ordering::SeqCst);
                entry.half_open_success.store(0, Ordering::SeqCst);
                info!(instance = %instance, from = from.as_str(), "circuit breaker closed");
            }
        }
        true
    }

    /// Request a one-shot grant to send a call through a HalfOpen instance.
    ///
    /// At most `half_open_budget` grants are outstanding per HalfOpen episode;
    /// the counters reset on every transition into HalfOpen.
    pub fn try_admit_half_open(&self, instance: &InstanceId) -> bool {
        let Some(entry) = self.entries.get(instance) else {
            return false;
        };
        if CircuitState::from_u8(entry.state.load(Ordering::SeqCst)) != CircuitState::HalfOpen {
            return false;
        }
        let budget = self.half_open_budget;
        entry
            .half_open_admitted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |admitted| {
                (admitted < budget).then_some(admitted + 1)
            })
            .is_ok()
    }

    /// Note a successful call through a HalfOpen instance.
    pub fn record_half_open_success(&self, instance: &InstanceId) {
        if let Some(entry) = self.entries.get(instance) {
            if CircuitState::from_u8(entry.state.load(Ordering::SeqCst)) == CircuitState::HalfOpen {
                entry.half_open_success.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// `(admitted, successes)` for the current HalfOpen episode.
    #[must_use]
    pub fn half_open_counts(&self, instance: &InstanceId) -> (u32, u32) {
        self.entries.get(instance).map_or((0, 0), |entry| {
            (
                entry.half_open_admitted.load(Ordering::SeqCst),
                entry.half_open_success.load(Ordering::SeqCst),
            )
        })
    }

    /// Force `instance` back to Closed regardless of which non-Closed state
    /// it sits in, then drop the entry. Used by the expiration sweep: an
    /// instance nobody reports against must not stay blocked.
    pub fn force_close(&self, instance: &InstanceId) {
        self.translate(instance, CircuitState::Open, CircuitState::Closed);
        self.translate(instance, CircuitState::HalfOpen, CircuitState::Closed);
        self.entries.remove(instance);
    }

    /// Snapshot of instances currently Open.
    #[must_use]
    pub fn open_instances(&self) -> Vec<InstanceId> {
        self.in_state(CircuitState::Open)
    }

    /// Snapshot of instances currently HalfOpen.
    #[must_use]
    pub fn half_open_instances(&self) -> Vec<InstanceId> {
        self.in_state(CircuitState::HalfOpen)
    }

    fn in_state(&self, state: CircuitState) -> Vec<InstanceId> {
        self.entries
            .iter()
            .filter(|entry| CircuitState::from_u8(entry.state.load(Ordering::SeqCst)) == state)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of tracked entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table tracks no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
