//! UDP payload probe
//!
//! Sends a configured byte string (hex in config) and, when a reply payload
//! is configured, requires an exact byte match within the timeout. With no
//! reply configured, a completed send counts as healthy.

use std::net::UdpSocket;
use std::time::{Duration, Instant};

use crate::config::UdpProbeConfig;
use crate::health::{DetectCode, DetectResult, HealthChecker};
use crate::model::Instance;
use crate::{Error, Result};

const MAX_DATAGRAM: usize = 64 * 1024;

/// Hex-payload UDP probe.
#[derive(Debug)]
pub struct UdpChecker {
    timeout: Duration,
    send: Vec<u8>,
    receive: Vec<u8>,
}

impl UdpChecker {
    /// Build the probe from its payload configuration. An empty `send`
    /// payload is a configuration error.
    pub fn new(config: &UdpProbeConfig, timeout: Duration) -> Result<Self> {
        if config.send.is_empty() {
            return Err(Error::Config(
                "health checker [udp]: send payload must not be empty".to_string(),
            ));
        }
        let send = hex::decode(&config.send).map_err(|e| {
            Error::Config(format!("health checker [udp]: send is not valid hex: {e}"))
        })?;
        let receive = if config.receive.is_empty() {
            Vec::new()
        } else {
            hex::decode(&config.receive).map_err(|e| {
                Error::Config(format!("health checker [udp]: receive is not valid hex: {e}"))
            })?
        };
        Ok(Self {
            timeout,
            send,
            receive,
        })
    }

    fn exchange(&self, instance: &Instance) -> DetectCode {
        let Ok(socket) = UdpSocket::bind("0.0.0.0:0") else {
            return DetectCode::NetworkFailed;
        };
        if socket.set_read_timeout(Some(self.timeout)).is_err() {
            return DetectCode::NetworkFailed;
        }
        if socket
            .send_to(&self.send, (instance.host.as_str(), instance.port))
            .is_err()
        {
            return DetectCode::NetworkFailed;
        }
        if self.receive.is_empty() {
            return DetectCode::Ok;
        }

        let mut buf = vec![0u8; MAX_DATAGRAM];
        match socket.recv(&mut buf) {
            Ok(n) if buf[..n] == self.receive[..] => DetectCode::Ok,
            Ok(_) => DetectCode::ServerError,
            Err(_) => DetectCode::NetworkFailed,
        }
    }
}

impl HealthChecker for UdpChecker {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn detect(&self, instance: &Instance) -> DetectResult {
        let started = Instant::now();
        let code = self.exchange(instance);
        DetectResult {
            code,
            elapse_ms: started.elapsed().as_millis() as u64,
            detect_type: "udp",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(send: &str, receive: &str) -> UdpProbeConfig {
        UdpProbeConfig {
            send: send.to_string(),
            receive: receive.to_string(),
        }
    }

    #[test]
    fn empty_send_payload_is_a_config_error() {
        let err = UdpChecker::new(&config("", ""), Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn invalid_hex_is_a_config_error() {
        let err = UdpChecker::new(&config("zz", ""), Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = UdpChecker::new(&config("abcd", "0g"), Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn send_only_probe_succeeds_without_a_listener_reply() {
        let target = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = target.local_addr().unwrap().port();
        let checker = UdpChecker::new(&config("0102", ""), Duration::from_millis(200)).unwrap();

        let result = checker.detect(&Instance::new("a", "127.0.0.1", port));
        assert_eq!(result.code, DetectCode::Ok);

        let mut buf = [0u8; 16];
        let (n, _) = target.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x01, 0x02]);
    }

    #[test]
    fn matching_echo_succeeds_and_mismatch_is_server_error() {
        let target = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = target.local_addr().unwrap().port();

        // Echo the expected reply for the first probe, garbage for the second.
        let responder = std::thread::spawn(move || {
            let mut buf = [0u8; 16];
            for reply in [&[0xca_u8, 0xfe][..], &[0x00][..]] {
                let (_, from) = target.recv_from(&mut buf).unwrap();
                target.send_to(reply, from).unwrap();
            }
        });

        let checker =
            UdpChecker::new(&config("0102", "cafe"), Duration::from_millis(500)).unwrap();
        let instance = Instance::new("a", "127.0.0.1", port);

        assert_eq!(checker.detect(&instance).code, DetectCode::Ok);
        assert_eq!(checker.detect(&instance).code, DetectCode::ServerError);
        responder.join().unwrap();
    }

    #[test]
    fn expected_reply_with_silent_peer_times_out() {
        let target = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = target.local_addr().unwrap().port();
        let checker =
            UdpChecker::new(&config("0102", "cafe"), Duration::from_millis(100)).unwrap();

        let result = checker.detect(&Instance::new("a", "127.0.0.1", port));
        assert_eq!(result.code, DetectCode::NetworkFailed);
    }
}
