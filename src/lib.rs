//! Helmsman — service-governance client core
//!
//! Embeddable engine that keeps per-instance health state for the services an
//! application calls:
//!
//! - **Outcome ingestion**: every call outcome lands in per-instance
//!   sliding-window statistics at O(1) cost.
//! - **Circuit breaking**: an error-rate evaluator and a consecutive-failure
//!   evaluator drive a Closed → Open → HalfOpen → Closed|Open state machine
//!   per instance, serialized through one atomic status table.
//! - **Active health checking**: TCP/UDP/HTTP probes feed synthetic outcomes
//!   back into the statistics and recover instances the breaker took out.
//! - **Status-aware load balancing**: random, round-robin, hash, hash-ring,
//!   and maglev strategies that exclude Open instances and admit bounded
//!   HalfOpen probe traffic.
//!
//! Discovery, routing rules, and quota enforcement live outside the engine;
//! membership arrives through [`engine::Engine::update_instances`] and quota
//! traffic is shaped by the value types in [`quota`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod balancer;
pub mod breaker;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod health;
pub mod model;
pub mod quota;
pub mod registry;

pub use engine::Engine;
pub use error::{Error, Result};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
