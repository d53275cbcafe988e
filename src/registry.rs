//! Plugin registry
//!
//! Maps configured plugin names to constructors, resolved once at `init`.
//! Unknown names and rejected plugin configurations surface as
//! [`Error::Config`] for that plugin; the caller decides whether the rest of
//! its chain survives.

use std::sync::Arc;

use crate::balancer::{
    ConsistentHashBalancer, HashBalancer, LoadBalancer, MaglevBalancer, RandomBalancer,
    RoundRobinBalancer,
};
use crate::breaker::{CircuitBreak, ConsecutiveBreaker, ErrorRateBreaker, MetricStore, StatusTable};
use crate::clock::Clock;
use crate::config::{CircuitBreakerConfig, HealthCheckConfig, LoadBalancerConfig};
use crate::health::{HealthChecker, HttpChecker, TcpChecker, UdpChecker};
use crate::{Error, Result};

/// Construct one circuit-breaker strategy by registry name.
pub fn circuit_breaker(
    name: &str,
    config: &CircuitBreakerConfig,
    metrics: Arc<MetricStore>,
    status: Arc<StatusTable>,
    clock: Arc<dyn Clock>,
) -> Result<Box<dyn CircuitBreak>> {
    match name {
        "errorRate" => Ok(Box::new(ErrorRateBreaker::new(config, metrics, status, clock))),
        "errorCount" => Ok(Box::new(ConsecutiveBreaker::new(config, status, clock))),
        other => Err(Error::Config(format!(
            "unknown circuit breaker strategy '{other}'"
        ))),
    }
}

/// Construct one health-check probe by registry name.
pub fn health_checker(name: &str, config: &HealthCheckConfig) -> Result<Box<dyn HealthChecker>> {
    match name {
        "tcp" => Ok(Box::new(TcpChecker::new(config.timeout))),
        "udp" => Ok(Box::new(UdpChecker::new(&config.udp, config.timeout)?)),
        "http" => Ok(Box::new(HttpChecker::new(&config.http, config.timeout)?)),
        other => Err(Error::Config(format!("unknown health checker '{other}'"))),
    }
}

/// Construct the configured load balancer.
pub fn load_balancer(config: &LoadBalancerConfig) -> Result<Box<dyn LoadBalancer>> {
    match config.kind.as_str() {
        "random" => Ok(Box::new(RandomBalancer::uniform())),
        "weightedRandom" => Ok(Box::new(RandomBalancer::weighted())),
        "roundRobin" => Ok(Box::new(RoundRobinBalancer::new())),
        "hash" => Ok(Box::new(HashBalancer::new())),
        "ringHash" => Ok(Box::new(ConsistentHashBalancer::new(config.vnode_count))),
        "maglev" => Ok(Box::new(MaglevBalancer::new(config.maglev_table_size))),
        other => Err(Error::Config(format!("unknown load balancer '{other}'"))),
    }
}
