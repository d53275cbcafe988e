//! TCP connect probe

use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::health::{DetectCode, DetectResult, HealthChecker};
use crate::model::Instance;

/// Connect-only probe: an instance is healthy iff the connect completes
/// within the timeout.
#[derive(Debug)]
pub struct TcpChecker {
    timeout: Duration,
}

impl TcpChecker {
    /// Build the probe with a per-attempt timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl HealthChecker for TcpChecker {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn detect(&self, instance: &Instance) -> DetectResult {
        let started = Instant::now();
        let code = match resolve(instance) {
            Some(addr) => match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(_stream) => DetectCode::Ok,
                Err(_) => DetectCode::NetworkFailed,
            },
            None => DetectCode::NetworkFailed,
        };
        DetectResult {
            code,
            elapse_ms: started.elapsed().as_millis() as u64,
            detect_type: "tcp",
        }
    }
}

fn resolve(instance: &Instance) -> Option<std::net::SocketAddr> {
    (instance.host.as_str(), instance.port)
        .to_socket_addrs()
        .ok()?
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn connect_to_listening_socket_succeeds() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let checker = TcpChecker::new(Duration::from_millis(500));

        let result = checker.detect(&Instance::new("a", "127.0.0.1", port));
        assert_eq!(result.code, DetectCode::Ok);
        assert_eq!(result.detect_type, "tcp");
    }

    #[test]
    fn connect_to_closed_port_fails() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let checker = TcpChecker::new(Duration::from_millis(200));

        let result = checker.detect(&Instance::new("a", "127.0.0.1", port));
        assert_eq!(result.code, DetectCode::NetworkFailed);
    }

    #[test]
    fn unresolvable_host_fails() {
        let checker = TcpChecker::new(Duration::from_millis(200));
        let result = checker.detect(&Instance::new("a", "host.invalid.", 80));
        assert_eq!(result.code, DetectCode::NetworkFailed);
    }
}
