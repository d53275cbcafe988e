//! Consecutive-error circuit breaking
//!
//! Realtime strategy: every failure bumps a per-instance run counter, any
//! success resets it, and crossing the threshold attempts Closed→Open on the
//! spot. Dwell and recovery belong to the error-rate pass and the
//! health-check chain through the shared status table.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::breaker::status::{CircuitState, StatusTable};
use crate::breaker::CircuitBreak;
use crate::clock::Clock;
use crate::config::CircuitBreakerConfig;
use crate::model::{InstanceGauge, InstanceId};
use crate::Result;

#[derive(Debug)]
struct ConsecutiveEntry {
    errors: AtomicU32,
    last_update_ms: AtomicU64,
}

/// Realtime evaluator counting consecutive failures per instance.
#[derive(Debug)]
pub struct ConsecutiveBreaker {
    threshold: u32,
    expire_ms: u64,
    entries: DashMap<InstanceId, ConsecutiveEntry>,
    status: Arc<StatusTable>,
    clock: Arc<dyn Clock>,
}

impl ConsecutiveBreaker {
    /// Build the strategy from a normalized configuration.
    #[must_use]
    pub fn new(
        config: &CircuitBreakerConfig,
        status: Arc<StatusTable>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            threshold: config.consecutive_error_threshold,
            expire_ms: config.metric_expired_time.as_millis() as u64,
            entries: DashMap::new(),
            status,
            clock,
        }
    }

    /// Current failure run for `instance`.
    #[must_use]
    pub fn consecutive_errors(&self, instance: &InstanceId) -> u32 {
        self.entries
            .get(instance)
            .map_or(0, |entry| entry.errors.load(Ordering::SeqCst))
    }
}

impl CircuitBreak for ConsecutiveBreaker {
    fn name(&self) -> &'static str {
        "errorCount"
    }

    fn real_time_break(&self, gauge: &InstanceGauge) -> Result<()> {
        let now_ms = self.clock.now_ms();
        let entry = self
            .entries
            .entry(gauge.instance_id.clone())
            .or_insert_with(|| ConsecutiveEntry {
                errors: AtomicU32::new(0),
                last_update_ms: AtomicU64::new(now_ms),
            });
        entry.last_update_ms.store(now_ms, Ordering::SeqCst);

        if !gauge.outcome.is_error() {
            entry.errors.store(0, Ordering::SeqCst);
            return Ok(());
        }

        let run = entry.errors.fetch_add(1, Ordering::SeqCst) + 1;
        if run >= self.threshold
            && self.status.state(&gauge.instance_id) == CircuitState::Closed
            && self
                .status
                .translate(&gauge.instance_id, CircuitState::Closed, CircuitState::Open)
        {
            debug!(
                instance = %gauge.instance_id,
                run,
                threshold = self.threshold,
                "consecutive failures tripped breaker"
            );
            entry.errors.store(0, Ordering::SeqCst);
        }
        Ok(())
    }

    fn timing_break(&self) -> Result<()> {
        let now_ms = self.clock.now_ms();
        self.entries.retain(|instance, entry| {
            if entry.last_update_ms.load(Ordering::SeqCst) + self.expire_ms <= now_ms {
                debug!(instance = %instance, "consecutive counter expired");
                self.status.force_close(instance);
                false
            } else {
                true
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::CallOutcome;

    fn breaker(clock: Arc<ManualClock>) -> ConsecutiveBreaker {
        let config = CircuitBreakerConfig {
            consecutive_error_threshold: 3,
            metric_expired_time: std::time::Duration::from_millis(5_000),
            ..CircuitBreakerConfig::default()
        };
        let status = Arc::new(StatusTable::new(10, true));
        ConsecutiveBreaker::new(&config, status, clock)
    }

    fn fail(b: &ConsecutiveBreaker, id: &str) {
        b.real_time_break(&InstanceGauge::new(id, CallOutcome::Fail, 5))
            .unwrap();
    }

    fn ok(b: &ConsecutiveBreaker, id: &str) {
        b.real_time_break(&InstanceGauge::new(id, CallOutcome::Ok, 5))
            .unwrap();
    }

    #[test]
    fn trips_at_threshold() {
        let b = breaker(Arc::new(ManualClock::new(0)));
        fail(&b, "a");
        fail(&b, "a");
        assert_eq!(b.status.state(&"a".into()), CircuitState::Closed);
        fail(&b, "a");
        assert_eq!(b.status.state(&"a".into()), CircuitState::Open);
        assert_eq!(b.consecutive_errors(&"a".into()), 0, "run resets on trip");
    }

    #[test]
    fn success_resets_the_run() {
        let b = breaker(Arc::new(ManualClock::new(0)));
        fail(&b, "a");
        fail(&b, "a");
        ok(&b, "a");
        fail(&b, "a");
        fail(&b, "a");
        assert_eq!(b.status.state(&"a".into()), CircuitState::Closed);
        fail(&b, "a");
        assert_eq!(b.status.state(&"a".into()), CircuitState::Open);
    }

    #[test]
    fn runs_are_tracked_per_instance() {
        let b = breaker(Arc::new(ManualClock::new(0)));
        fail(&b, "a");
        fail(&b, "a");
        fail(&b, "b");
        assert_eq!(b.consecutive_errors(&"a".into()), 2);
        assert_eq!(b.consecutive_errors(&"b".into()), 1);
        assert_eq!(b.status.state(&"a".into()), CircuitState::Closed);
    }

    #[test]
    fn further_failures_while_open_do_not_retrip() {
        let b = breaker(Arc::new(ManualClock::new(0)));
        for _ in 0..3 {
            fail(&b, "a");
        }
        assert_eq!(b.status.state(&"a".into()), CircuitState::Open);
        // Straggler reports after the trip leave the state alone.
        fail(&b, "a");
        fail(&b, "a");
        assert_eq!(b.status.state(&"a".into()), CircuitState::Open);
    }

    #[test]
    fn idle_counters_expire_and_force_close() {
        let clock = Arc::new(ManualClock::new(0));
        let b = breaker(Arc::clone(&clock));
        for _ in 0..3 {
            fail(&b, "a");
        }
        assert_eq!(b.status.state(&"a".into()), CircuitState::Open);

        clock.set(5_000);
        b.timing_break().unwrap();
        assert_eq!(b.consecutive_errors(&"a".into()), 0);
        assert_eq!(b.status.state(&"a".into()), CircuitState::Closed);
    }
}
