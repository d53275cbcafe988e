//! Sliding-window instance statistics
//!
//! Per-instance ring of time buckets absorbing call outcomes at O(1) cost.
//! Counters are plain atomics; the only lock on the hot path is a per-entry
//! mutex taken solely to serialize a bucket's epoch rotation. The table-level
//! rwlock is shared for record/aggregate and exclusive only for entry
//! creation and the expiration sweep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::breaker::status::{CircuitState, StatusTable};
use crate::model::InstanceId;

/// One fixed-duration aggregation cell.
///
/// A bucket is current when its stored epoch equals `now_ms / bucket_width`;
/// stale buckets are lazily reset on the next write that lands in them.
#[derive(Debug)]
pub struct Bucket {
    epoch: AtomicU64,
    total: AtomicU32,
    errors: AtomicU32,
}

impl Bucket {
    fn new() -> Self {
        Self {
            epoch: AtomicU64::new(0),
            total: AtomicU32::new(0),
            errors: AtomicU32::new(0),
        }
    }
}

/// Per-instance sliding-window state.
#[derive(Debug)]
pub struct MetricEntry {
    buckets: Box<[Bucket]>,
    /// Serializes bucket epoch rotation only.
    rotate: Mutex<()>,
    /// Mirror of the authoritative state for the evaluator's fast path.
    state: AtomicU8,
    last_update_ms: AtomicU64,
    last_access_ms: AtomicU64,
}

impl MetricEntry {
    fn new(num_buckets: usize, now_ms: u64) -> Self {
        let buckets = (0..num_buckets).map(|_| Bucket::new()).collect();
        Self {
            buckets,
            rotate: Mutex::new(()),
            state: AtomicU8::new(CircuitState::Closed as u8),
            last_update_ms: AtomicU64::new(0),
            last_access_ms: AtomicU64::new(now_ms),
        }
    }

    fn record(&self, now_ms: u64, is_error: bool, bucket_width_ms: u64) {
        let epoch = now_ms / bucket_width_ms;
        let index = (epoch % self.buckets.len() as u64) as usize;
        let bucket = &self.buckets[index];

        if bucket.epoch.load(Ordering::Acquire) != epoch {
            let _guard = self.rotate.lock();
            if bucket.epoch.load(Ordering::Acquire) != epoch {
                bucket.total.store(0, Ordering::Release);
                bucket.errors.store(0, Ordering::Release);
                bucket.epoch.store(epoch, Ordering::Release);
            }
        }

        bucket.total.fetch_add(1, Ordering::AcqRel);
        if is_error {
            bucket.errors.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Sum `(total, errors)` over buckets inside the window ending at
    /// `now_ms`. Buckets whose epoch fell out of `(now/W - N, now/W]`
    /// contribute nothing.
    #[must_use]
    pub fn aggregate(&self, now_ms: u64, bucket_width_ms: u64) -> (u64, u64) {
        let window_floor = (now_ms / bucket_width_ms).saturating_sub(self.buckets.len() as u64);
        let mut total = 0u64;
        let mut errors = 0u64;
        for bucket in self.buckets.iter() {
            let epoch = bucket.epoch.load(Ordering::Acquire);
            if epoch > window_floor {
                total += u64::from(bucket.total.load(Ordering::Acquire));
                errors += u64::from(bucket.errors.load(Ordering::Acquire));
            }
        }
        (total, errors)
    }

    /// Zero every bucket. Used on state transitions into and out of HalfOpen
    /// so a probe episode starts from a clean window.
    pub fn clear(&self) {
        let _guard = self.rotate.lock();
        for bucket in self.buckets.iter() {
            bucket.total.store(0, Ordering::Release);
            bucket.errors.store(0, Ordering::Release);
            bucket.epoch.store(0, Ordering::Release);
        }
    }

    /// Mirrored breaker state. The status table stays authoritative; the
    /// mirror updates only after a winning transition.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        match self.state.load(Ordering::SeqCst) {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    pub(crate) fn set_state(&self, state: CircuitState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Time of the last state change.
    #[must_use]
    pub fn last_update_ms(&self) -> u64 {
        self.last_update_ms.load(Ordering::SeqCst)
    }

    pub(crate) fn set_last_update_ms(&self, now_ms: u64) {
        self.last_update_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Time of the last read/write touch.
    #[must_use]
    pub fn last_access_ms(&self) -> u64 {
        self.last_access_ms.load(Ordering::SeqCst)
    }

    fn touch(&self, now_ms: u64) {
        self.last_access_ms.store(now_ms, Ordering::SeqCst);
    }
}

/// Keyed store of per-instance sliding windows.
#[derive(Debug)]
pub struct MetricStore {
    entries: RwLock<HashMap<InstanceId, Arc<MetricEntry>>>,
    bucket_width_ms: u64,
    num_buckets: usize,
    expire_ms: u64,
}

impl MetricStore {
    /// `window_ms` is split into `num_buckets` cells of
    /// `ceil(window / num_buckets)` milliseconds each. Entries untouched for
    /// `expire_ms` are removed by [`MetricStore::expire`].
    #[must_use]
    pub fn new(window_ms: u64, num_buckets: usize, expire_ms: u64) -> Self {
        let num_buckets = num_buckets.max(1);
        let bucket_width_ms = window_ms.div_ceil(num_buckets as u64).max(1);
        Self {
            entries: RwLock::new(HashMap::new()),
            bucket_width_ms,
            num_buckets,
            expire_ms,
        }
    }

    /// Width of one bucket in milliseconds.
    #[must_use]
    pub fn bucket_width_ms(&self) -> u64 {
        self.bucket_width_ms
    }

    /// Absorb one call outcome for `instance` at `now_ms`, lazily creating
    /// the entry. The hot path holds the table lock shared; only a first
    /// report for an unseen instance upgrades to exclusive.
    pub fn record(&self, instance: &InstanceId, is_error: bool, now_ms: u64) -> Arc<MetricEntry> {
        let entry = self.get_or_create(instance, now_ms);
        entry.record(now_ms, is_error, self.bucket_width_ms);
        entry
    }

    /// Entry for `instance`, if tracked.
    #[must_use]
    pub fn entry(&self, instance: &InstanceId) -> Option<Arc<MetricEntry>> {
        self.entries.read().get(instance).cloned()
    }

    /// Windowed `(total, errors)` for `instance` at `now_ms`.
    #[must_use]
    pub fn aggregate(&self, instance: &InstanceId, now_ms: u64) -> Option<(u64, u64)> {
        self.entry(instance)
            .map(|entry| entry.aggregate(now_ms, self.bucket_width_ms))
    }

    /// Zero all buckets of `instance`.
    pub fn clear(&self, instance: &InstanceId) {
        if let Some(entry) = self.entry(instance) {
            entry.clear();
        }
    }

    /// Arc-clone snapshot for the periodic pass, so evaluation never holds
    /// the table lock across transition requests.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(InstanceId, Arc<MetricEntry>)> {
        self.entries
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect()
    }

    /// Remove entries untouched for the expiry TTL, forcing each removed
    /// instance back to Closed in the status table.
    pub fn expire(&self, status: &StatusTable, now_ms: u64) {
        let mut entries = self.entries.write();
        entries.retain(|instance, entry| {
            if entry.last_access_ms() + self.expire_ms <= now_ms {
                debug!(instance = %instance, "instance metrics expired");
                status.force_close(instance);
                false
            } else {
                true
            }
        });
    }

    /// Number of tracked instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no instance is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn get_or_create(&self, instance: &InstanceId, now_ms: u64) -> Arc<MetricEntry> {
        if let Some(entry) = self.entries.read().get(instance) {
            entry.touch(now_ms);
            return Arc::clone(entry);
        }

        let mut entries = self.entries.write();
        // Double check: another reporter may have created it between locks.
        if let Some(entry) = entries.get(instance) {
            entry.touch(now_ms);
            return Arc::clone(entry);
        }
        let entry = Arc::new(MetricEntry::new(self.num_buckets, now_ms));
        entries.insert(instance.clone(), Arc::clone(&entry));
        entry
    }
}
