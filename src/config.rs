//! Configuration management
//!
//! Loaded from a YAML file merged with `HELMSMAN_`-prefixed environment
//! variables. Every numeric governance key is validated by
//! [`Config::normalized`]: invalid values silently revert to their defaults,
//! but each substitution is logged so operators can see what the engine
//! actually runs with.

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Circuit breaker configuration
    pub circuit_breaker: CircuitBreakerConfig,
    /// Health check configuration
    pub health_check: HealthCheckConfig,
    /// Load balancer configuration
    pub load_balancer: LoadBalancerConfig,
    /// Worker configuration
    pub executor: ExecutorConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("HELMSMAN_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Return a copy with every out-of-range numeric replaced by its default.
    ///
    /// The engine always runs on a normalized config; a warning names each
    /// rejected value and the default that replaced it.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let mut config = self.clone();
        config.circuit_breaker = config.circuit_breaker.normalized();
        config.health_check = config.health_check.normalized();
        config.load_balancer = config.load_balancer.normalized();
        config.executor = config.executor.normalized();
        config
    }
}

fn revert_u32(key: &str, value: u32, default: u32) -> u32 {
    if value == 0 {
        warn!(key, rejected = value, default, "invalid config value, using default");
        default
    } else {
        value
    }
}

fn revert_ms(key: &str, value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        warn!(
            key,
            rejected_ms = value.as_millis() as u64,
            default_ms = default.as_millis() as u64,
            "invalid config value, using default"
        );
        default
    } else {
        value
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    /// Strategy chain, evaluated in order on every outcome report
    pub chain: Vec<String>,
    /// Minimum windowed calls before the error rate is evaluated
    pub request_volume_threshold: u32,
    /// Failure fraction that opens the breaker, in (0, 1)
    pub error_rate_threshold: f64,
    /// Statistics window
    #[serde(with = "duration_ms")]
    pub metric_stat_time_window: Duration,
    /// Buckets per window
    pub metric_num_buckets: u32,
    /// Open dwell before a half-open probe burst
    #[serde(with = "duration_ms")]
    pub sleep_window: Duration,
    /// Probe budget while half-open
    pub request_count_after_half_open: u32,
    /// Successes required to close from half-open
    pub success_count_after_half_open: u32,
    /// Idle TTL for per-instance statistics
    #[serde(with = "duration_ms")]
    pub metric_expired_time: Duration,
    /// Consecutive failures that open the breaker in realtime
    pub consecutive_error_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            chain: vec!["errorCount".to_string(), "errorRate".to_string()],
            request_volume_threshold: 10,
            error_rate_threshold: 0.5,
            metric_stat_time_window: Duration::from_millis(60_000),
            metric_num_buckets: 12,
            sleep_window: Duration::from_millis(30_000),
            request_count_after_half_open: 10,
            success_count_after_half_open: 8,
            metric_expired_time: Duration::from_millis(60_000),
            consecutive_error_threshold: 10,
        }
    }
}

impl CircuitBreakerConfig {
    fn normalized(&self) -> Self {
        let defaults = Self::default();
        let mut config = self.clone();

        config.request_volume_threshold = revert_u32(
            "circuitBreaker.requestVolumeThreshold",
            config.request_volume_threshold,
            defaults.request_volume_threshold,
        );
        if config.error_rate_threshold <= 0.0 || config.error_rate_threshold >= 1.0 {
            warn!(
                key = "circuitBreaker.errorRateThreshold",
                rejected = config.error_rate_threshold,
                default = defaults.error_rate_threshold,
                "invalid config value, using default"
            );
            config.error_rate_threshold = defaults.error_rate_threshold;
        }
        config.metric_stat_time_window = revert_ms(
            "circuitBreaker.metricStatTimeWindow",
            config.metric_stat_time_window,
            defaults.metric_stat_time_window,
        );
        config.metric_num_buckets = revert_u32(
            "circuitBreaker.metricNumBuckets",
            config.metric_num_buckets,
            defaults.metric_num_buckets,
        );
        config.sleep_window = revert_ms(
            "circuitBreaker.sleepWindow",
            config.sleep_window,
            defaults.sleep_window,
        );
        config.request_count_after_half_open = revert_u32(
            "circuitBreaker.requestCountAfterHalfOpen",
            config.request_count_after_half_open,
            defaults.request_count_after_half_open,
        );
        config.success_count_after_half_open = revert_u32(
            "circuitBreaker.successCountAfterHalfOpen",
            config.success_count_after_half_open,
            defaults.success_count_after_half_open,
        );
        if config.success_count_after_half_open > config.request_count_after_half_open {
            warn!(
                key = "circuitBreaker.successCountAfterHalfOpen",
                rejected = config.success_count_after_half_open,
                clamped_to = config.request_count_after_half_open,
                "success count exceeds half-open probe budget, clamping"
            );
            config.success_count_after_half_open = config.request_count_after_half_open;
        }
        config.metric_expired_time = revert_ms(
            "circuitBreaker.metricExpiredTime",
            config.metric_expired_time,
            defaults.metric_expired_time,
        );
        config.consecutive_error_threshold = revert_u32(
            "circuitBreaker.consecutiveErrorThreshold",
            config.consecutive_error_threshold,
            defaults.consecutive_error_threshold,
        );
        config
    }
}

/// When the health-check chain probes instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetectWhen {
    /// Probing disabled
    Never,
    /// Probe every instance each tick
    Always,
    /// Probe only instances the breaker has opened
    #[default]
    OnRecover,
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthCheckConfig {
    /// Probe scheduling policy
    pub when: DetectWhen,
    /// Probe chain, tried in order until one succeeds
    pub chain: Vec<String>,
    /// Probe cadence
    #[serde(with = "duration_ms")]
    pub interval: Duration,
    /// Per-probe timeout
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// UDP probe payloads
    pub udp: UdpProbeConfig,
    /// HTTP probe settings
    pub http: HttpProbeConfig,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            when: DetectWhen::OnRecover,
            chain: vec!["tcp".to_string()],
            interval: Duration::from_millis(10_000),
            timeout: Duration::from_millis(500),
            udp: UdpProbeConfig::default(),
            http: HttpProbeConfig::default(),
        }
    }
}

impl HealthCheckConfig {
    fn normalized(&self) -> Self {
        let defaults = Self::default();
        let mut config = self.clone();
        config.interval = revert_ms("healthCheck.interval", config.interval, defaults.interval);
        config.timeout = revert_ms("healthCheck.timeout", config.timeout, defaults.timeout);
        config
    }
}

/// UDP probe payloads, hex-encoded
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UdpProbeConfig {
    /// Bytes to send; required for the UDP probe
    pub send: String,
    /// Expected reply bytes; empty means a completed send suffices
    pub receive: String,
}

/// HTTP probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpProbeConfig {
    /// Request method
    pub method: String,
    /// Request path
    pub path: String,
    /// Status codes counted as healthy
    pub success_codes: Vec<u16>,
}

impl Default for HttpProbeConfig {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            path: "/health".to_string(),
            success_codes: vec![200],
        }
    }
}

/// Load balancer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoadBalancerConfig {
    /// Strategy name
    pub kind: String,
    /// Virtual nodes per instance for the hash ring
    pub vnode_count: u32,
    /// Maglev lookup table size; should be prime
    pub maglev_table_size: u32,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            kind: "weightedRandom".to_string(),
            vnode_count: 160,
            maglev_table_size: 65_537,
        }
    }
}

impl LoadBalancerConfig {
    fn normalized(&self) -> Self {
        let defaults = Self::default();
        let mut config = self.clone();
        config.vnode_count = revert_u32(
            "loadBalancer.vnodeCount",
            config.vnode_count,
            defaults.vnode_count,
        );
        // The maglev fill only terminates when every skip is coprime with
        // the table size, which a prime size guarantees.
        if config.maglev_table_size < 3 || !crate::balancer::is_prime(config.maglev_table_size) {
            warn!(
                key = "loadBalancer.maglevTableSize",
                rejected = config.maglev_table_size,
                default = defaults.maglev_table_size,
                "table size must be prime, using default"
            );
            config.maglev_table_size = defaults.maglev_table_size;
        }
        config
    }
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Bounded retries for a worker's setup phase
    pub init_retry_times: u32,
    /// Circuit breaker evaluation cadence
    #[serde(with = "duration_ms")]
    pub breaker_interval: Duration,
    /// Client identity report cadence
    #[serde(with = "duration_ms")]
    pub report_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            init_retry_times: 3,
            breaker_interval: Duration::from_millis(100),
            report_interval: Duration::from_millis(60_000),
        }
    }
}

impl ExecutorConfig {
    fn normalized(&self) -> Self {
        let defaults = Self::default();
        let mut config = self.clone();
        config.init_retry_times = revert_u32(
            "executor.initRetryTimes",
            config.init_retry_times,
            defaults.init_retry_times,
        );
        config.breaker_interval = revert_ms(
            "executor.breakerInterval",
            config.breaker_interval,
            defaults.breaker_interval,
        );
        config.report_interval = revert_ms(
            "executor.reportInterval",
            config.report_interval,
            defaults.report_interval,
        );
        config
    }
}

/// Millisecond-denominated `Duration` serde: accepts a bare integer (ms) or
/// a suffixed string ("500ms", "30s", "5m").
pub mod duration_ms {
    use std::fmt;
    use std::time::Duration;

    use serde::{de, Deserializer, Serializer};

    /// Serialize as integer milliseconds.
    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    /// Deserialize from integer milliseconds or a suffixed string.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct MsVisitor;

        impl de::Visitor<'_> for MsVisitor {
            type Value = Duration;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("milliseconds or a duration string like \"500ms\" or \"30s\"")
            }

            fn visit_u64<E: de::Error>(self, ms: u64) -> Result<Duration, E> {
                Ok(Duration::from_millis(ms))
            }

            fn visit_i64<E: de::Error>(self, ms: i64) -> Result<Duration, E> {
                u64::try_from(ms)
                    .map(Duration::from_millis)
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_str<E: de::Error>(self, s: &str) -> Result<Duration, E> {
                // "ms" must be checked before the bare "s" suffix.
                if let Some(ms) = s.strip_suffix("ms") {
                    ms.parse::<u64>()
                        .map(Duration::from_millis)
                        .map_err(E::custom)
                } else if let Some(secs) = s.strip_suffix('s') {
                    secs.parse::<u64>()
                        .map(Duration::from_secs)
                        .map_err(E::custom)
                } else if let Some(mins) = s.strip_suffix('m') {
                    mins.parse::<u64>()
                        .map(|m| Duration::from_secs(m * 60))
                        .map_err(E::custom)
                } else {
                    s.parse::<u64>().map(Duration::from_millis).map_err(E::custom)
                }
            }
        }

        deserializer.deserialize_any(MsVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.circuit_breaker.request_volume_threshold, 10);
        assert!((config.circuit_breaker.error_rate_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(
            config.circuit_breaker.metric_stat_time_window,
            Duration::from_millis(60_000)
        );
        assert_eq!(config.circuit_breaker.metric_num_buckets, 12);
        assert_eq!(config.circuit_breaker.sleep_window, Duration::from_millis(30_000));
        assert_eq!(config.circuit_breaker.request_count_after_half_open, 10);
        assert_eq!(config.circuit_breaker.success_count_after_half_open, 8);
        assert_eq!(config.health_check.when, DetectWhen::OnRecover);
        assert_eq!(config.health_check.chain, vec!["tcp".to_string()]);
        assert_eq!(config.health_check.interval, Duration::from_millis(10_000));
        assert_eq!(config.health_check.timeout, Duration::from_millis(500));
    }

    #[test]
    fn normalization_reverts_invalid_numerics() {
        let mut config = Config::default();
        config.circuit_breaker.request_volume_threshold = 0;
        config.circuit_breaker.error_rate_threshold = 1.5;
        config.circuit_breaker.metric_num_buckets = 0;
        config.health_check.interval = Duration::ZERO;

        let normalized = config.normalized();
        assert_eq!(normalized.circuit_breaker.request_volume_threshold, 10);
        assert!((normalized.circuit_breaker.error_rate_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(normalized.circuit_breaker.metric_num_buckets, 12);
        assert_eq!(normalized.health_check.interval, Duration::from_millis(10_000));
    }

    #[test]
    fn composite_maglev_table_size_reverts_to_default() {
        let mut config = Config::default();
        config.load_balancer.maglev_table_size = 100;
        assert_eq!(config.normalized().load_balancer.maglev_table_size, 65_537);

        let mut config = Config::default();
        config.load_balancer.maglev_table_size = 0;
        assert_eq!(config.normalized().load_balancer.maglev_table_size, 65_537);

        let mut config = Config::default();
        config.load_balancer.maglev_table_size = 307;
        assert_eq!(config.normalized().load_balancer.maglev_table_size, 307);
    }

    #[test]
    fn success_count_clamps_to_probe_budget() {
        let mut config = Config::default();
        config.circuit_breaker.request_count_after_half_open = 4;
        config.circuit_breaker.success_count_after_half_open = 9;

        let normalized = config.normalized();
        assert_eq!(normalized.circuit_breaker.success_count_after_half_open, 4);
    }

    #[test]
    fn yaml_parses_camel_case_keys_and_ms_values() {
        let yaml = r#"
circuitBreaker:
  requestVolumeThreshold: 20
  errorRateThreshold: 0.25
  metricStatTimeWindow: 1000
  metricNumBuckets: 10
  sleepWindow: 500ms
healthCheck:
  when: always
  chain: [tcp, http]
  interval: 2s
  udp:
    send: "abcd"
loadBalancer:
  kind: ringHash
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("governance.yaml");
        std::fs::write(&path, yaml).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.circuit_breaker.request_volume_threshold, 20);
        assert!((config.circuit_breaker.error_rate_threshold - 0.25).abs() < f64::EPSILON);
        assert_eq!(
            config.circuit_breaker.metric_stat_time_window,
            Duration::from_millis(1_000)
        );
        assert_eq!(config.circuit_breaker.sleep_window, Duration::from_millis(500));
        assert_eq!(config.health_check.when, DetectWhen::Always);
        assert_eq!(config.health_check.chain, vec!["tcp", "http"]);
        assert_eq!(config.health_check.interval, Duration::from_secs(2));
        assert_eq!(config.health_check.udp.send, "abcd");
        assert_eq!(config.load_balancer.kind, "ringHash");
        // Untouched sections keep their defaults.
        assert_eq!(config.executor.init_retry_times, 3);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = Config::load(Some(Path::new("/nonexistent/governance.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn duration_strings_parse_each_suffix() {
        #[derive(Deserialize)]
        struct Wrap {
            #[serde(with = "duration_ms")]
            d: Duration,
        }
        let parse = |s: &str| -> Duration {
            serde_json::from_str::<Wrap>(&format!("{{\"d\": {s}}}")).unwrap().d
        };
        assert_eq!(parse("250"), Duration::from_millis(250));
        assert_eq!(parse("\"250ms\""), Duration::from_millis(250));
        assert_eq!(parse("\"30s\""), Duration::from_secs(30));
        assert_eq!(parse("\"2m\""), Duration::from_secs(120));
    }
}
