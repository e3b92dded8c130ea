//! HTTP server settings

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::error::ServerError;

/// Configuration for the [`CrierServer`](crate::CrierServer)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to
    /// Default: 127.0.0.1
    pub bind_address: IpAddr,

    /// Inclusive range of ports to try, first free one wins
    /// Default: (7070, 7170)
    pub port_range: (u16, u16),

    /// Interval between SSE keep-alive comments on idle streams
    /// Default: 15 seconds
    pub keep_alive_interval: Duration,

    /// Largest accepted message body
    /// Default: 64 KiB
    pub max_body_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port_range: (7070, 7170),
            keep_alive_interval: Duration::from_secs(15),
            max_body_bytes: 64 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), ServerError> {
        let (start, end) = self.port_range;
        if start == 0 || end == 0 {
            return Err(ServerError::Configuration(
                "Port range must not include port 0".to_string(),
            ));
        }

        if start > end {
            return Err(ServerError::Configuration(format!(
                "Invalid port range: start ({start}) > end ({end})"
            )));
        }

        if self.keep_alive_interval.is_zero() {
            return Err(ServerError::Configuration(
                "Keep-alive interval must be greater than 0".to_string(),
            ));
        }

        if self.max_body_bytes == 0 {
            return Err(ServerError::Configuration(
                "Max body size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    pub fn with_port_range(mut self, start: u16, end: u16) -> Self {
        self.port_range = (start, end);
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_max_body_bytes(mut self, max: u64) -> Self {
        self.max_body_bytes = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port_range, (7070, 7170));
        assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[rstest]
    #[case(ServerConfig::default().with_port_range(0, 10), "port 0")]
    #[case(ServerConfig::default().with_port_range(9000, 8000), "start (9000) > end (8000)")]
    #[case(ServerConfig::default().with_keep_alive_interval(Duration::ZERO), "Keep-alive")]
    #[case(ServerConfig::default().with_max_body_bytes(0), "Max body size")]
    fn test_invalid_config(#[case] config: ServerConfig, #[case] expected: &str) {
        match config.validate() {
            Err(ServerError::Configuration(msg)) => assert!(msg.contains(expected), "{msg}"),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_single_port_range_is_valid() {
        assert!(ServerConfig::new().with_port_range(8080, 8080).validate().is_ok());
    }
}
