//! # Handler Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection, serving and sync-trigger limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Network the node belongs to; peers on another network are dropped.
    pub network_id: u64,

    /// Connected base-protocol peers.
    pub max_peers: usize,

    /// Time allowed for the `Status` exchange and the extension handoff.
    pub handshake_timeout_ms: u64,

    /// Peers needed before a sync starts without being forced.
    pub min_sync_peers: usize,

    /// Period after which a sync is forced with whatever peers are connected.
    pub force_sync_interval_ms: u64,

    /// Headers served per request.
    pub max_headers_serve: u64,

    /// Bodies served per request.
    pub max_bodies_serve: usize,

    /// Receipt lists served per request.
    pub max_receipts_serve: usize,

    /// State nodes served per request.
    pub max_node_data_serve: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            network_id: 1,
            max_peers: 50,
            handshake_timeout_ms: 5_000,
            min_sync_peers: 5,
            force_sync_interval_ms: 10_000,
            max_headers_serve: 1024,
            max_bodies_serve: 1024,
            max_receipts_serve: 1024,
            max_node_data_serve: 384,
        }
    }
}

impl HandlerConfig {
    /// Create a config for testing (one peer is enough to sync).
    pub fn for_testing() -> Self {
        Self {
            network_id: 1337,
            max_peers: 4,
            handshake_timeout_ms: 500,
            min_sync_peers: 1,
            force_sync_interval_ms: 200,
            ..Self::default()
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn force_sync_interval(&self) -> Duration {
        Duration::from_millis(self.force_sync_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_caps() {
        let config = HandlerConfig::default();
        assert_eq!(config.max_headers_serve, 1024);
        assert_eq!(config.max_receipts_serve, 1024);
        assert_eq!(config.max_node_data_serve, 384);
    }
}
