//! End-to-end breaker lifecycle under a manual clock
//!
//! Engine configured with a 1 s / 10-bucket window, volume threshold 10,
//! error-rate threshold 0.5, 500 ms sleep window, and a 4-probe half-open
//! budget needing 3 successes. Passes are driven inline so every timestamp
//! is exact.

use std::sync::Arc;
use std::time::Duration;

use helmsman::breaker::CircuitState;
use helmsman::clock::ManualClock;
use helmsman::config::{Config, DetectWhen};
use helmsman::model::{CallOutcome, Criteria, Instance, InstanceGauge, ServiceKey};
use helmsman::{Engine, Error};

fn config() -> Config {
    let mut config = Config::default();
    config.circuit_breaker.chain = vec!["errorRate".to_string()];
    config.circuit_breaker.request_volume_threshold = 10;
    config.circuit_breaker.error_rate_threshold = 0.5;
    config.circuit_breaker.metric_stat_time_window = Duration::from_millis(1_000);
    config.circuit_breaker.metric_num_buckets = 10;
    config.circuit_breaker.sleep_window = Duration::from_millis(500);
    config.circuit_breaker.request_count_after_half_open = 4;
    config.circuit_breaker.success_count_after_half_open = 3;
    config.circuit_breaker.metric_expired_time = Duration::from_millis(60_000);
    config.health_check.when = DetectWhen::Never;
    // Workers stay parked; the tests drive evaluation passes inline.
    config.executor.breaker_interval = Duration::from_secs(3600);
    config.executor.report_interval = Duration::from_secs(3600);
    config
}

fn engine(clock: &Arc<ManualClock>) -> Engine {
    Engine::init_with_clock(config(), Arc::clone(clock) as _).unwrap()
}

fn record(engine: &Engine, id: &str, outcome: CallOutcome, count: usize) {
    for _ in 0..count {
        engine.record_call(InstanceGauge::new(id, outcome, 5));
    }
}

#[test]
fn successes_alone_keep_the_instance_closed() {
    let clock = Arc::new(ManualClock::new(100));
    let engine = engine(&clock);

    record(&engine, "a", CallOutcome::Ok, 10);
    clock.set(200);
    engine.evaluate_now();
    assert_eq!(engine.status().state(&"a".into()), CircuitState::Closed);
    engine.shutdown();
}

#[test]
fn full_lifecycle_trip_recover_and_stay_closed() {
    let clock = Arc::new(ManualClock::new(300));
    let engine = engine(&clock);

    // Threshold volume with 60% errors trips the breaker.
    record(&engine, "a", CallOutcome::Fail, 6);
    record(&engine, "a", CallOutcome::Ok, 4);
    clock.set(400);
    engine.evaluate_now();
    assert_eq!(engine.status().state(&"a".into()), CircuitState::Open);
    let entry = engine.metrics().entry(&"a".into()).unwrap();
    assert_eq!(entry.last_update_ms(), 400);
    // The trip leaves the window data in place.
    assert_eq!(
        entry.aggregate(400, engine.metrics().bucket_width_ms()),
        (10, 6)
    );

    // Sleep window (500 ms from the trip) not yet served.
    clock.set(850);
    engine.evaluate_now();
    assert_eq!(engine.status().state(&"a".into()), CircuitState::Open);

    // Served: the evaluator half-opens and clears the window.
    clock.set(900);
    engine.evaluate_now();
    assert_eq!(engine.status().state(&"a".into()), CircuitState::HalfOpen);
    let entry = engine.metrics().entry(&"a".into()).unwrap();
    assert_eq!(
        entry.aggregate(900, engine.metrics().bucket_width_ms()),
        (0, 0)
    );

    // Three probe successes close it again.
    clock.set(950);
    record(&engine, "a", CallOutcome::Ok, 3);
    clock.set(1_000);
    engine.evaluate_now();
    assert_eq!(engine.status().state(&"a".into()), CircuitState::Closed);

    // Fresh traffic below the volume threshold cannot re-trip.
    clock.set(1_050);
    record(&engine, "a", CallOutcome::Fail, 2);
    record(&engine, "a", CallOutcome::Ok, 2);
    clock.set(1_100);
    engine.evaluate_now();
    assert_eq!(engine.status().state(&"a".into()), CircuitState::Closed);
    engine.shutdown();
}

#[test]
fn half_open_failures_reopen_the_instance() {
    let clock = Arc::new(ManualClock::new(1_000));
    let engine = engine(&clock);

    record(&engine, "a", CallOutcome::Fail, 10);
    clock.set(1_100);
    engine.evaluate_now();
    clock.set(1_600);
    engine.evaluate_now();
    assert_eq!(engine.status().state(&"a".into()), CircuitState::HalfOpen);

    // Budget 4 minus success target 3 leaves slack for one failure; the
    // second one re-opens.
    clock.set(1_650);
    record(&engine, "a", CallOutcome::Fail, 2);
    clock.set(1_700);
    engine.evaluate_now();
    assert_eq!(engine.status().state(&"a".into()), CircuitState::Open);
    engine.shutdown();
}

#[test]
fn idle_instance_expires_and_reads_closed() {
    let clock = Arc::new(ManualClock::new(1_000));
    let engine = engine(&clock);

    record(&engine, "b", CallOutcome::Fail, 10);
    clock.set(1_100);
    engine.evaluate_now();
    assert_eq!(engine.status().state(&"b".into()), CircuitState::Open);

    // Untouched for the metric TTL: removed and forced Closed.
    clock.set(61_000);
    engine.evaluate_now();
    assert!(engine.metrics().entry(&"b".into()).is_none());
    assert_eq!(engine.status().state(&"b".into()), CircuitState::Closed);
    engine.shutdown();
}

#[test]
fn balanced_mix_at_threshold_boundary() {
    // K failures then K successes: trips iff K/2K >= threshold.
    let clock = Arc::new(ManualClock::new(100));
    let engine = engine(&clock);
    record(&engine, "a", CallOutcome::Fail, 10);
    record(&engine, "a", CallOutcome::Ok, 10);
    clock.set(200);
    engine.evaluate_now();
    assert_eq!(
        engine.status().state(&"a".into()),
        CircuitState::Open,
        "0.5 meets the >= 0.5 threshold"
    );
    engine.shutdown();

    let mut lenient = config();
    lenient.circuit_breaker.error_rate_threshold = 0.6;
    let clock = Arc::new(ManualClock::new(100));
    let engine = Engine::init_with_clock(lenient, Arc::clone(&clock) as _).unwrap();
    record(&engine, "a", CallOutcome::Fail, 10);
    record(&engine, "a", CallOutcome::Ok, 10);
    clock.set(200);
    engine.evaluate_now();
    assert_eq!(engine.status().state(&"a".into()), CircuitState::Closed);
    engine.shutdown();
}

#[test]
fn open_instance_is_excluded_from_selection_until_recovery() {
    let clock = Arc::new(ManualClock::new(1_000));
    let engine = engine(&clock);
    let service = ServiceKey::new("prod", "checkout");
    engine.update_instances(
        service.clone(),
        vec![
            Instance::new("a", "10.0.0.1", 8000),
            Instance::new("b", "10.0.0.2", 8000),
        ],
    );

    record(&engine, "a", CallOutcome::Timeout, 10);
    clock.set(1_100);
    engine.evaluate_now();

    for _ in 0..25 {
        let chosen = engine
            .choose_instance(&service, &Criteria::default())
            .unwrap();
        assert_eq!(chosen.id.as_str(), "b");
    }

    // Once half-open, bounded probe traffic is admitted again.
    clock.set(1_700);
    engine.evaluate_now();
    assert_eq!(engine.status().state(&"a".into()), CircuitState::HalfOpen);
    let mut probes = 0;
    for _ in 0..25 {
        let chosen = engine
            .choose_instance(&service, &Criteria::default())
            .unwrap();
        if chosen.id.as_str() == "a" {
            probes += 1;
        }
    }
    assert_eq!(probes, 4, "admissions stop at the half-open budget");
    engine.shutdown();
}

#[test]
fn every_instance_open_is_instance_not_found() {
    let clock = Arc::new(ManualClock::new(1_000));
    let engine = engine(&clock);
    let service = ServiceKey::new("prod", "checkout");
    engine.update_instances(service.clone(), vec![Instance::new("a", "10.0.0.1", 8000)]);

    record(&engine, "a", CallOutcome::Fail, 10);
    clock.set(1_100);
    engine.evaluate_now();

    let err = engine
        .choose_instance(
            &service,
            &Criteria {
                ignore_half_open: true,
                ..Criteria::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, Error::InstanceNotFound(_)));
    engine.shutdown();
}
