//! HTTP status probe

use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::Method;

use crate::config::HttpProbeConfig;
use crate::health::{DetectCode, DetectResult, HealthChecker};
use crate::model::Instance;
use crate::{Error, Result};

/// Issues the configured method against the configured path; healthy iff the
/// response status is in the configured set.
#[derive(Debug)]
pub struct HttpChecker {
    client: Client,
    method: Method,
    path: String,
    success_codes: Vec<u16>,
}

impl HttpChecker {
    /// Build the probe. The request path must start with `/`.
    pub fn new(config: &HttpProbeConfig, timeout: Duration) -> Result<Self> {
        let method = Method::from_bytes(config.method.to_uppercase().as_bytes())
            .map_err(|_| {
                Error::Config(format!(
                    "health checker [http]: invalid method '{}'",
                    config.method
                ))
            })?;
        if !config.path.starts_with('/') {
            return Err(Error::Config(format!(
                "health checker [http]: path '{}' must start with '/'",
                config.path
            )));
        }
        if config.success_codes.is_empty() {
            return Err(Error::Config(
                "health checker [http]: successCodes must not be empty".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            method,
            path: config.path.clone(),
            success_codes: config.success_codes.clone(),
        })
    }
}

impl HealthChecker for HttpChecker {
    fn name(&self) -> &'static str {
        "http"
    }

    fn detect(&self, instance: &Instance) -> DetectResult {
        let started = Instant::now();
        let url = format!("http://{}:{}{}", instance.host, instance.port, self.path);
        let code = match self.client.request(self.method.clone(), url).send() {
            Ok(response) => {
                if self.success_codes.contains(&response.status().as_u16()) {
                    DetectCode::Ok
                } else {
                    DetectCode::ServerError
                }
            }
            Err(_) => DetectCode::NetworkFailed,
        };
        DetectResult {
            code,
            elapse_ms: started.elapsed().as_millis() as u64,
            detect_type: "http",
        }
    }
}
