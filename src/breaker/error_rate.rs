//! Error-rate circuit breaking
//!
//! The realtime half only records outcomes; state changes happen on the
//! periodic pass, which walks a snapshot of the metric store and applies the
//! threshold policy per instance. Pass order per instance: Open dwell →
//! HalfOpen, Closed threshold trip, HalfOpen recovery or re-open. The pass
//! never raises; it finishes with the idle-entry expiration sweep.

use std::sync::Arc;

use tracing::debug;

use crate::breaker::metrics::{MetricEntry, MetricStore};
use crate::breaker::status::{CircuitState, StatusTable};
use crate::breaker::CircuitBreak;
use crate::clock::Clock;
use crate::config::CircuitBreakerConfig;
use crate::model::{InstanceGauge, InstanceId};
use crate::Result;

/// Periodic evaluator applying an error-rate threshold over the sliding
/// window.
#[derive(Debug)]
pub struct ErrorRateBreaker {
    request_volume_threshold: u64,
    error_rate_threshold: f64,
    sleep_window_ms: u64,
    request_count_after_half_open: u64,
    success_count_after_half_open: u64,
    metrics: Arc<MetricStore>,
    status: Arc<StatusTable>,
    clock: Arc<dyn Clock>,
}

impl ErrorRateBreaker {
    /// Build the strategy from a normalized configuration.
    #[must_use]
    pub fn new(
        config: &CircuitBreakerConfig,
        metrics: Arc<MetricStore>,
        status: Arc<StatusTable>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let request_count_after_half_open = u64::from(config.request_count_after_half_open);
        Self {
            request_volume_threshold: u64::from(config.request_volume_threshold),
            error_rate_threshold: config.error_rate_threshold,
            sleep_window_ms: config.sleep_window.as_millis() as u64,
            request_count_after_half_open,
            success_count_after_half_open: u64::from(config.success_count_after_half_open)
                .min(request_count_after_half_open),
            metrics,
            status,
            clock,
        }
    }

    /// Shared metric store handle.
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricStore> {
        &self.metrics
    }

    fn evaluate(&self, instance: &InstanceId, entry: &MetricEntry, now_ms: u64) {
        // The table is authoritative; resync the mirror when another mutator
        // (consecutive strategy, health chain) moved the instance since the
        // last pass, and count dwell from the observation.
        let state = self.status.state(instance);
        if entry.state() != state {
            entry.set_state(state);
            entry.set_last_update_ms(now_ms);
        }

        match state {
            CircuitState::Open => {
                if self.status.auto_half_open_enabled()
                    && entry.last_update_ms() + self.sleep_window_ms <= now_ms
                    && self
                        .status
                        .translate(instance, CircuitState::Open, CircuitState::HalfOpen)
                {
                    entry.set_state(CircuitState::HalfOpen);
                    entry.set_last_update_ms(now_ms);
                    entry.clear();
                }
            }
            CircuitState::Closed => {
                let (total, errors) = entry.aggregate(now_ms, self.metrics.bucket_width_ms());
                if total >= self.request_volume_threshold
                    && errors as f64 / total as f64 >= self.error_rate_threshold
                    && self
                        .status
                        .translate(instance, CircuitState::Closed, CircuitState::Open)
                {
                    entry.set_state(CircuitState::Open);
                    entry.set_last_update_ms(now_ms);
                    debug!(
                        instance = %instance,
                        total,
                        errors,
                        threshold = self.error_rate_threshold,
                        "error rate tripped breaker"
                    );
                    // Buckets are retained: they are ignored until the
                    // half-open episode clears them.
                }
            }
            CircuitState::HalfOpen => {
                let (total, errors) = entry.aggregate(now_ms, self.metrics.bucket_width_ms());
                let successes = total - errors;
                if successes >= self.success_count_after_half_open {
                    if self
                        .status
                        .translate(instance, CircuitState::HalfOpen, CircuitState::Closed)
                    {
                        entry.set_state(CircuitState::Closed);
                        entry.set_last_update_ms(now_ms);
                        entry.clear();
                    }
                } else if errors
                    > self.request_count_after_half_open - self.success_count_after_half_open
                    || entry.last_access_ms() + 100 * self.sleep_window_ms <= now_ms
                {
                    // Too many probe failures, or the probe burst went stale
                    // with nobody reporting against the instance.
                    if self
                        .status
                        .translate(instance, CircuitState::HalfOpen, CircuitState::Open)
                    {
                        entry.set_state(CircuitState::Open);
                        entry.set_last_update_ms(now_ms);
                        entry.clear();
                    }
                }
            }
        }
    }
}

impl CircuitBreak for ErrorRateBreaker {
    fn name(&self) -> &'static str {
        "errorRate"
    }

    fn real_time_break(&self, gauge: &InstanceGauge) -> Result<()> {
        let now_ms = self.clock.now_ms();
        let entry = self
            .metrics
            .record(&gauge.instance_id, gauge.outcome.is_error(), now_ms);
        if entry.state() == CircuitState::HalfOpen && !gauge.outcome.is_error() {
            self.status.record_half_open_success(&gauge.instance_id);
        }
        Ok(())
    }

    fn timing_break(&self) -> Result<()> {
        let now_ms = self.clock.now_ms();
        for (instance, entry) in self.metrics.snapshot() {
            self.evaluate(&instance, &entry, now_ms);
        }
        self.metrics.expire(&self.status, now_ms);
        Ok(())
    }
}
