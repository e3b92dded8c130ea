//! Configuration types for the crier broker
//!
//! This module defines the settings that control history retention, the
//! per-write deadline sessions apply to their transports and how long
//! shutdown waits for sessions to finish.

use std::time::Duration;

use crate::error::CrierError;

/// Configuration for the [`Broker`](crate::Broker)
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Number of most recent events retained in the history log
    /// Default: 20
    pub history_size: usize,

    /// Upper bound on a single transport write
    /// Default: 5 seconds
    pub delivery_timeout: Duration,

    /// Back-to-back write timeouts after which a session ends as a slow consumer
    /// Default: 3
    pub max_consecutive_timeouts: u32,

    /// How long shutdown waits for sessions to confirm teardown
    /// Default: 5 seconds
    pub shutdown_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            history_size: 20,
            delivery_timeout: Duration::from_secs(5),
            max_consecutive_timeouts: 3,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl BrokerConfig {
    /// Create a new BrokerConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), CrierError> {
        if self.history_size == 0 {
            return Err(CrierError::Configuration(
                "History size must be greater than 0".to_string(),
            ));
        }

        if self.delivery_timeout == Duration::ZERO {
            return Err(CrierError::Configuration(
                "Delivery timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_consecutive_timeouts == 0 {
            return Err(CrierError::Configuration(
                "Max consecutive timeouts must be greater than 0".to_string(),
            ));
        }

        if self.shutdown_timeout == Duration::ZERO {
            return Err(CrierError::Configuration(
                "Shutdown timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_history_size(mut self, size: usize) -> Self {
        self.history_size = size;
        self
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    pub fn with_max_consecutive_timeouts(mut self, max: u32) -> Self {
        self.max_consecutive_timeouts = max;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}
