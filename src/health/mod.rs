//! Active health checking
//!
//! A chain of network probes runs on its own cadence against instances the
//! breaker has taken out of rotation (or against everything, when configured
//! `always`). Probe results are injected into the breaker chain as synthetic
//! call outcomes; a successful probe of an instance that has served its Open
//! dwell additionally requests the Open→HalfOpen transition, after which the
//! error-rate evaluator drives recovery from the injected successes.

mod http;
mod tcp;
mod udp;

pub use http::HttpChecker;
pub use tcp::TcpChecker;
pub use udp::UdpChecker;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::breaker::status::{CircuitState, StatusTable};
use crate::breaker::{CircuitBreakerChain, MetricStore};
use crate::clock::Clock;
use crate::config::DetectWhen;
use crate::model::{CallOutcome, Instance, InstanceGauge};

/// Outcome class of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectCode {
    /// Instance answered as expected
    Ok,
    /// Connect/send/recv failed or timed out
    NetworkFailed,
    /// Instance answered, but not what was expected
    ServerError,
}

/// Result of one probe attempt.
#[derive(Debug, Clone)]
pub struct DetectResult {
    /// Outcome class
    pub code: DetectCode,
    /// Probe round-trip in milliseconds
    pub elapse_ms: u64,
    /// Name of the probe that produced this result
    pub detect_type: &'static str,
}

/// An active network check synthesizing a call outcome.
pub trait HealthChecker: Send + Sync + std::fmt::Debug {
    /// Registry name of the probe.
    fn name(&self) -> &'static str;

    /// Probe `instance` once, within the configured timeout.
    fn detect(&self, instance: &Instance) -> DetectResult;
}

/// Ordered probe chain plus its scheduling policy.
#[derive(Debug)]
pub struct HealthCheckerChain {
    when: DetectWhen,
    checkers: Vec<Box<dyn HealthChecker>>,
    sleep_window_ms: u64,
    metrics: Arc<MetricStore>,
    status: Arc<StatusTable>,
    clock: Arc<dyn Clock>,
}

impl HealthCheckerChain {
    /// Build the chain from already-constructed probes.
    #[must_use]
    pub fn new(
        when: DetectWhen,
        checkers: Vec<Box<dyn HealthChecker>>,
        sleep_window_ms: u64,
        metrics: Arc<MetricStore>,
        status: Arc<StatusTable>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            when,
            checkers,
            sleep_window_ms,
            metrics,
            status,
            clock,
        }
    }

    /// Scheduling policy the chain was built with.
    #[must_use]
    pub fn when(&self) -> DetectWhen {
        self.when
    }

    /// Names of the configured probes, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.checkers.iter().map(|c| c.name()).collect()
    }

    /// Probe `instance` through the chain. The first OK short-circuits; any
    /// probe's network failure marks the detection failed.
    #[must_use]
    pub fn detect_instance(&self, instance: &Instance) -> DetectResult {
        let mut last = DetectResult {
            code: DetectCode::NetworkFailed,
            elapse_ms: 0,
            detect_type: "none",
        };
        for checker in &self.checkers {
            let result = checker.detect(instance);
            debug!(
                instance = %instance.id,
                probe = result.detect_type,
                ok = result.code == DetectCode::Ok,
                elapse_ms = result.elapse_ms,
                "health probe finished"
            );
            if result.code == DetectCode::Ok {
                return result;
            }
            last = result;
        }
        last
    }

    /// One scheduler tick: probe the target set and feed results back into
    /// the breaker chain as synthetic outcomes.
    pub fn run(&self, instances: &[Instance], breakers: &CircuitBreakerChain) {
        if self.when == DetectWhen::Never || self.checkers.is_empty() {
            return;
        }

        for instance in instances {
            let state = self.status.state(&instance.id);
            let target = match self.when {
                DetectWhen::Always => true,
                DetectWhen::OnRecover => {
                    state == CircuitState::Open || state == CircuitState::HalfOpen
                }
                DetectWhen::Never => false,
            };
            if !target {
                continue;
            }

            let result = self.detect_instance(instance);
            let healthy = result.code == DetectCode::Ok;

            if healthy && state == CircuitState::Open {
                self.try_recover(instance);
            } else if !healthy {
                warn!(
                    instance = %instance.id,
                    probe = result.detect_type,
                    "health probe failed"
                );
            }

            let outcome = if healthy { CallOutcome::Ok } else { CallOutcome::Fail };
            breakers.report(&InstanceGauge::new(
                instance.id.clone(),
                outcome,
                result.elapse_ms,
            ));
        }
    }

    /// Request Open→HalfOpen for an instance whose probe succeeded, provided
    /// its sleep window has elapsed. Only effective while the periodic
    /// evaluator's own half-open timer is handed over to probing.
    fn try_recover(&self, instance: &Instance) {
        let now_ms = self.clock.now_ms();
        let dwell_served = self
            .metrics
            .entry(&instance.id)
            .map_or(true, |entry| entry.last_update_ms() + self.sleep_window_ms <= now_ms);
        if !dwell_served {
            return;
        }
        if self
            .status
            .translate(&instance.id, CircuitState::Open, CircuitState::HalfOpen)
        {
            if let Some(entry) = self.metrics.entry(&instance.id) {
                entry.set_state(CircuitState::HalfOpen);
                entry.set_last_update_ms(now_ms);
                entry.clear();
            }
            debug!(instance = %instance.id, "probe success requested half-open");
        }
    }
}
