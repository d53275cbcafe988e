//! Quota model façade
//!
//! Value carriers exchanged with the quota limiter. The engine neither owns
//! quota policy nor talks to a quota server; these types only shape the
//! requests, responses, and call reports that cross that boundary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::ServiceKey;

/// Result of a quota acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaResultCode {
    /// Quota granted
    Ok,
    /// Quota exhausted; the caller should back off
    Limited,
}

/// One quota acquisition request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaRequest {
    /// Service the quota is scoped to
    pub service_key: ServiceKey,
    /// Subset selector
    #[serde(default)]
    pub subset: HashMap<String, String>,
    /// Request labels matched against quota rules
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Amount to acquire
    pub acquire_amount: u32,
    /// How long the caller will wait for quota, milliseconds
    pub timeout_ms: u64,
}

impl QuotaRequest {
    /// Request one unit of quota for `service_key`.
    #[must_use]
    pub fn new(service_key: ServiceKey) -> Self {
        Self {
            service_key,
            subset: HashMap::new(),
            labels: HashMap::new(),
            acquire_amount: 1,
            timeout_ms: 0,
        }
    }
}

/// Quota amounts attached to a response.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QuotaResultInfo {
    /// Total quota configured for the matched rule
    pub all_quota: i64,
    /// Rule period, milliseconds
    pub duration_ms: u64,
    /// Quota remaining in the current period
    pub left_quota: i64,
}

/// Answer to one quota acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaResponse {
    /// Grant or limit
    pub result_code: QuotaResultCode,
    /// Suggested wait before retrying, milliseconds
    pub wait_time_ms: u64,
    /// Amounts for the matched rule
    pub info: QuotaResultInfo,
}

impl QuotaResponse {
    /// A response carrying only a code and a wait hint.
    #[must_use]
    pub fn new(result_code: QuotaResultCode, wait_time_ms: u64) -> Self {
        Self {
            result_code,
            wait_time_ms,
            info: QuotaResultInfo::default(),
        }
    }

    /// A response carrying rule amounts.
    #[must_use]
    pub fn with_info(result_code: QuotaResultCode, info: QuotaResultInfo) -> Self {
        Self {
            result_code,
            wait_time_ms: 0,
            info,
        }
    }
}

/// How a limited call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitCallResultType {
    /// Call completed
    #[default]
    Ok,
    /// Call failed
    Failed,
    /// Call was rejected by the limiter
    Limited,
}

/// Report of one call made under a quota grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitCallResult {
    /// Service the call targeted
    pub service_key: ServiceKey,
    /// Subset selector the quota was scoped to
    #[serde(default)]
    pub subset: HashMap<String, String>,
    /// Labels the quota was matched on
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// How the call ended
    pub result_type: LimitCallResultType,
    /// Observed response time, milliseconds
    pub response_time_ms: u64,
    /// Application response code
    pub response_code: i32,
}

impl LimitCallResult {
    /// A successful call report with zeroed measurements.
    #[must_use]
    pub fn new(service_key: ServiceKey) -> Self {
        Self {
            service_key,
            subset: HashMap::new(),
            labels: HashMap::new(),
            result_type: LimitCallResultType::Ok,
            response_time_ms: 0,
            response_code: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_to_one_unit() {
        let request = QuotaRequest::new(ServiceKey::new("prod", "payments"));
        assert_eq!(request.acquire_amount, 1);
        assert_eq!(request.timeout_ms, 0);
        assert!(request.labels.is_empty());
    }

    #[test]
    fn response_constructors_populate_info() {
        let limited = QuotaResponse::new(QuotaResultCode::Limited, 250);
        assert_eq!(limited.result_code, QuotaResultCode::Limited);
        assert_eq!(limited.wait_time_ms, 250);
        assert_eq!(limited.info.all_quota, 0);

        let granted = QuotaResponse::with_info(
            QuotaResultCode::Ok,
            QuotaResultInfo {
                all_quota: 1_000,
                duration_ms: 60_000,
                left_quota: 999,
            },
        );
        assert_eq!(granted.wait_time_ms, 0);
        assert_eq!(granted.info.left_quota, 999);
    }

    #[test]
    fn call_result_round_trips_through_json() {
        let mut report = LimitCallResult::new(ServiceKey::new("prod", "payments"));
        report.result_type = LimitCallResultType::Limited;
        report.response_time_ms = 12;
        report.response_code = 429;

        let json = serde_json::to_string(&report).unwrap();
        let back: LimitCallResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.result_type, LimitCallResultType::Limited);
        assert_eq!(back.response_code, 429);
    }
}
