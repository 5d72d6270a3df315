//! # Distributor Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request distributor configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributorConfig {
    /// How long a peer has to answer one request.
    pub request_timeout_ms: u64,

    /// Dispatches of one request before it fails with `Timeout`.
    pub max_attempts: u32,

    /// Consecutive timeouts after which a peer is disconnected.
    pub max_peer_timeouts: u32,

    /// How long a request waits while no registered peer can serve it.
    pub no_peer_timeout_ms: u64,

    /// Period of the assignment retry while a request is queued.
    pub assign_interval_ms: u64,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            max_attempts: 5,
            max_peer_timeouts: 3,
            no_peer_timeout_ms: 30_000,
            assign_interval_ms: 100,
        }
    }
}

impl DistributorConfig {
    /// Create a config for testing (short timeouts).
    pub fn for_testing() -> Self {
        Self {
            request_timeout_ms: 300,
            max_attempts: 3,
            max_peer_timeouts: 2,
            no_peer_timeout_ms: 500,
            assign_interval_ms: 10,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn no_peer_timeout(&self) -> Duration {
        Duration::from_millis(self.no_peer_timeout_ms)
    }

    pub fn assign_interval(&self) -> Duration {
        Duration::from_millis(self.assign_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DistributorConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let config = DistributorConfig {
            assign_interval_ms: 0,
            ..DistributorConfig::for_testing()
        };
        assert_eq!(config.assign_interval(), Duration::from_millis(1));
    }
}
