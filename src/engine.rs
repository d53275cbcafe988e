//! Consumer-facing engine
//!
//! Wires the configured plugins together and owns the worker threads:
//! applications call [`Engine::record_call`] on their hot path, consult
//! [`Engine::choose_instance`] before each call, and feed membership through
//! [`Engine::update_instances`] from whatever discovery source they embed.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::balancer::LoadBalancer;
use crate::breaker::{CircuitBreakerChain, MetricStore, StatusTable};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, DetectWhen};
use crate::executor::{Executor, PeriodicTask};
use crate::health::HealthCheckerChain;
use crate::model::{Criteria, Instance, InstanceGauge, ServiceKey, ServiceInstances};
use crate::registry;
use crate::{Error, Result};

type ServiceMap = DashMap<ServiceKey, Arc<ServiceInstances>>;

/// The governance engine.
#[derive(Debug)]
pub struct Engine {
    status: Arc<StatusTable>,
    metrics: Arc<MetricStore>,
    breakers: Arc<CircuitBreakerChain>,
    balancer: Box<dyn LoadBalancer>,
    services: Arc<ServiceMap>,
    executor: Executor,
}

impl Engine {
    /// Construct the engine from `config` and start its workers.
    ///
    /// The configuration is normalized first (invalid numerics revert to
    /// defaults, with a warning each). A failing member of the breaker or
    /// health-check chain aborts only that plugin; an unresolvable load
    /// balancer aborts construction.
    pub fn init(config: Config) -> Result<Self> {
        Self::init_with_clock(config, Arc::new(SystemClock))
    }

    /// Same as [`Engine::init`] with an explicit time source, so embedders
    /// replaying traffic (and tests) can drive evaluation deterministically.
    pub fn init_with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let config = config.normalized();
        let breaker_config = &config.circuit_breaker;

        let mut checkers = Vec::new();
        if config.health_check.when != DetectWhen::Never {
            for name in &config.health_check.chain {
                match registry::health_checker(name, &config.health_check) {
                    Ok(checker) => checkers.push(checker),
                    Err(e) => error!(plugin = %name, error = %e, "health checker plugin rejected"),
                }
            }
        }

        // Probing hands Open→HalfOpen to the health chain; without probing
        // the periodic evaluator's sleep-window timer owns it. A probe chain
        // whose every member was rejected leaves nobody to recover Open
        // instances, so it falls back to the timer as well.
        let mut auto_half_open = config.health_check.when == DetectWhen::Never;
        if !auto_half_open && checkers.is_empty() {
            warn!("health check chain resolved to no probes, using timer-driven half-open");
            auto_half_open = true;
        }
        let status = Arc::new(StatusTable::new(
            breaker_config.request_count_after_half_open,
            auto_half_open,
        ));
        let metrics = Arc::new(MetricStore::new(
            breaker_config.metric_stat_time_window.as_millis() as u64,
            breaker_config.metric_num_buckets as usize,
            breaker_config.metric_expired_time.as_millis() as u64,
        ));

        let mut strategies = Vec::new();
        for name in &breaker_config.chain {
            match registry::circuit_breaker(
                name,
                breaker_config,
                Arc::clone(&metrics),
                Arc::clone(&status),
                Arc::clone(&clock),
            ) {
                Ok(strategy) => strategies.push(strategy),
                Err(e) => error!(plugin = %name, error = %e, "circuit breaker plugin rejected"),
            }
        }
        let breakers = Arc::new(CircuitBreakerChain::new(strategies));

        let balancer = registry::load_balancer(&config.load_balancer)?;

        let health = Arc::new(HealthCheckerChain::new(
            config.health_check.when,
            checkers,
            breaker_config.sleep_window.as_millis() as u64,
            Arc::clone(&metrics),
            Arc::clone(&status),
            Arc::clone(&clock),
        ));

        let services: Arc<ServiceMap> = Arc::new(DashMap::new());

        let executor = Executor::new();
        let retries = config.executor.init_retry_times;
        executor.spawn(
            Box::new(BreakerTask {
                breakers: Arc::clone(&breakers),
                period: config.executor.breaker_interval,
            }),
            retries,
        )?;
        if health.when() != DetectWhen::Never && !health.names().is_empty() {
            executor.spawn(
                Box::new(HealthCheckTask {
                    health: Arc::clone(&health),
                    breakers: Arc::clone(&breakers),
                    services: Arc::clone(&services),
                    period: config.health_check.interval,
                }),
                retries,
            )?;
        }
        executor.spawn(
            Box::new(ReportTask {
                services: Arc::clone(&services),
                period: config.executor.report_interval,
            }),
            retries,
        )?;

        info!(
            breakers = ?breakers.names(),
            balancer = balancer.name(),
            probes = ?health.names(),
            "governance engine started"
        );

        Ok(Self {
            status,
            metrics,
            breakers,
            balancer,
            services,
            executor,
        })
    }

    /// Report one call outcome. Fire-and-forget: failures inside the chain
    /// are logged, never surfaced to the caller.
    pub fn record_call(&self, gauge: InstanceGauge) {
        self.breakers.report(&gauge);
    }

    /// Select an instance of `service` for the given criteria.
    pub fn choose_instance(&self, service: &ServiceKey, criteria: &Criteria) -> Result<Instance> {
        let view = self
            .services
            .get(service)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::InstanceNotFound(format!("service {service} is not tracked")))?;
        self.balancer.choose(&view, criteria)
    }

    /// Replace the instance set of `service`. This is the seam to the
    /// embedding application's registry cache.
    pub fn update_instances(&self, service: ServiceKey, instances: Vec<Instance>) {
        let view = Arc::new(ServiceInstances::new(
            service.clone(),
            instances,
            Arc::clone(&self.status),
        ));
        debug!(service = %service, instances = view.len(), "instance set updated");
        self.services.insert(service, view);
    }

    /// Authoritative breaker state table.
    #[must_use]
    pub fn status(&self) -> &Arc<StatusTable> {
        &self.status
    }

    /// Sliding-window metric store.
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricStore> {
        &self.metrics
    }

    /// Run one breaker evaluation pass inline. The periodic worker does this
    /// on its own cadence; exposed for embedders driving a manual clock.
    pub fn evaluate_now(&self) {
        self.breakers.tick();
    }

    /// Stop all workers, join them, and drop tracked state. Idempotent.
    pub fn shutdown(&self) {
        self.executor.shutdown();
        self.services.clear();
        info!("governance engine stopped");
    }
}

struct BreakerTask {
    breakers: Arc<CircuitBreakerChain>,
    period: Duration,
}

impl PeriodicTask for BreakerTask {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn tick(&mut self) -> Result<()> {
        self.breakers.tick();
        Ok(())
    }
}

struct HealthCheckTask {
    health: Arc<HealthCheckerChain>,
    breakers: Arc<CircuitBreakerChain>,
    services: Arc<ServiceMap>,
    period: Duration,
}

impl PeriodicTask for HealthCheckTask {
    fn name(&self) -> &'static str {
        "health_check"
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn tick(&mut self) -> Result<()> {
        for entry in self.services.iter() {
            self.health.run(entry.value().all(), &self.breakers);
        }
        Ok(())
    }
}

/// Stub for the control-plane client report; the connector that would carry
/// it is outside the engine.
struct ReportTask {
    services: Arc<ServiceMap>,
    period: Duration,
}

impl PeriodicTask for ReportTask {
    fn name(&self) -> &'static str {
        "main_report"
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn tick(&mut self) -> Result<()> {
        debug!(services = self.services.len(), "client report tick");
        Ok(())
    }
}
