//! Instance circuit breaking
//!
//! Two cooperating evaluators feed one authoritative [`status::StatusTable`]:
//! the error-rate strategy aggregates sliding-window statistics on a periodic
//! pass, and the consecutive-error strategy trips in realtime as outcomes
//! arrive. Both request transitions through the table's CAS, so whichever
//! lands first wins and the loser drops its request silently.

pub mod consecutive;
pub mod error_rate;
pub mod metrics;
pub mod status;

pub use consecutive::ConsecutiveBreaker;
pub use error_rate::ErrorRateBreaker;
pub use metrics::{MetricEntry, MetricStore};
pub use status::{CircuitState, StatusTable};

use tracing::warn;

use crate::model::InstanceGauge;
use crate::Result;

/// A circuit-breaking strategy.
///
/// Strategies hold no instance-scoped state beyond their configuration and
/// their own statistics tables; breaker state itself lives in the shared
/// [`status::StatusTable`].
pub trait CircuitBreak: Send + Sync + std::fmt::Debug {
    /// Registry name of the strategy.
    fn name(&self) -> &'static str;

    /// Absorb one call outcome. Invoked on the caller's hot path; must not
    /// block beyond bounded per-entry work.
    fn real_time_break(&self, gauge: &InstanceGauge) -> Result<()>;

    /// One periodic evaluation pass.
    fn timing_break(&self) -> Result<()>;
}

/// Ordered set of strategies sharing one status table.
#[derive(Debug)]
pub struct CircuitBreakerChain {
    strategies: Vec<Box<dyn CircuitBreak>>,
}

impl CircuitBreakerChain {
    /// Build a chain from already-constructed strategies.
    #[must_use]
    pub fn new(strategies: Vec<Box<dyn CircuitBreak>>) -> Self {
        Self { strategies }
    }

    /// Feed one outcome report to every strategy. Individual strategy
    /// failures are logged and skipped; reporting never raises.
    pub fn report(&self, gauge: &InstanceGauge) {
        for strategy in &self.strategies {
            if let Err(e) = strategy.real_time_break(gauge) {
                warn!(
                    strategy = strategy.name(),
                    instance = %gauge.instance_id,
                    error = %e,
                    "realtime circuit break failed"
                );
            }
        }
    }

    /// Run one periodic pass over every strategy.
    pub fn tick(&self) {
        for strategy in &self.strategies {
            if let Err(e) = strategy.timing_break() {
                warn!(strategy = strategy.name(), error = %e, "timing circuit break failed");
            }
        }
    }

    /// Names of the configured strategies, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }
}
