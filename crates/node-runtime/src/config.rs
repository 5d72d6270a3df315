//! # Node Configuration
//!
//! Unified configuration for every component and the runtime itself.
//!
//! ## Sources
//!
//! Values are layered, later sources winning:
//!
//! 1. Built-in defaults
//! 2. JSON file named by `MC_CONFIG` (missing sections and fields keep defaults)
//! 3. `MC_*` environment variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | `MC_CONFIG` | path of a JSON config file |
//! | `MC_LISTEN_ADDR` | `network.listen_addr` (`none` disables listening) |
//! | `MC_BOOTNODES` | `network.bootnodes`, comma separated |
//! | `MC_NODE_KEY` | `network.node_key`, 64 hex chars |
//! | `MC_NETWORK_ID` | `handler.network_id` |
//! | `MC_MAX_PEERS` | `handler.max_peers` |
//! | `MC_STORAGE` | `storage.backend` (`memory` or `rocksdb`) |
//! | `MC_DATA_DIR` | `storage.data_dir` |
//! | `MC_MINE` | `miner.enabled` |
//! | `MC_MINER_THREADS` | `miner.threads` |

use mc_02_request_distributor::DistributorConfig;
use mc_03_blockchain::{ChainConfig, Genesis};
use mc_04_txpool::TxPoolConfig;
use mc_05_downloader::DownloaderConfig;
use mc_06_handler::HandlerConfig;
use meridian_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use shared_types::PeerId;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the JSON config file.
pub const CONFIG_FILE_VAR: &str = "MC_CONFIG";

/// Complete node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Listener and bootnodes.
    pub network: NetworkConfig,
    /// Store backend.
    pub storage: StorageConfig,
    /// Mining switch and engine.
    pub miner: MinerConfig,
    /// Genesis block committed on first start.
    pub genesis: Genesis,
    pub chain: ChainConfig,
    pub txpool: TxPoolConfig,
    pub downloader: DownloaderConfig,
    pub distributor: DistributorConfig,
    pub handler: HandlerConfig,
    pub telemetry: TelemetryConfig,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("storage backend rocksdb requires the `rocksdb` feature")]
    RocksDbUnavailable,
}

impl NodeConfig {
    /// Load from `MC_CONFIG` (if set) and the environment, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_FILE_VAR) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.telemetry = config.telemetry.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `MC_*` overrides read through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("MC_LISTEN_ADDR") {
            self.network.listen_addr = if v.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(parse("MC_LISTEN_ADDR", &v)?)
            };
        }
        if let Some(v) = lookup("MC_BOOTNODES") {
            self.network.bootnodes = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse("MC_BOOTNODES", s))
                .collect::<Result<_, _>>()?;
        }
        if let Some(v) = lookup("MC_NODE_KEY") {
            parse_node_key(&v).ok_or_else(|| ConfigError::InvalidValue {
                var: "MC_NODE_KEY",
                value: v.clone(),
            })?;
            self.network.node_key = Some(v);
        }
        if let Some(v) = lookup("MC_NETWORK_ID") {
            self.handler.network_id = parse("MC_NETWORK_ID", &v)?;
        }
        if let Some(v) = lookup("MC_MAX_PEERS") {
            self.handler.max_peers = parse("MC_MAX_PEERS", &v)?;
        }
        if let Some(v) = lookup("MC_STORAGE") {
            self.storage.backend = parse("MC_STORAGE", &v)?;
        }
        if let Some(v) = lookup("MC_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("MC_MINE") {
            self.miner.enabled = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = lookup("MC_MINER_THREADS") {
            self.miner.threads = parse("MC_MINER_THREADS", &v)?;
        }
        Ok(())
    }

    /// Reject settings the node cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let h = &self.handler;
        if h.max_peers == 0 {
            return Err(ConfigError::Invalid("handler.max_peers must be positive".into()));
        }
        if h.min_sync_peers > h.max_peers {
            return Err(ConfigError::Invalid(format!(
                "handler.min_sync_peers ({}) exceeds handler.max_peers ({})",
                h.min_sync_peers, h.max_peers
            )));
        }
        if h.handshake_timeout_ms == 0 || h.force_sync_interval_ms == 0 {
            return Err(ConfigError::Invalid("handler timeouts must be positive".into()));
        }
        if self.distributor.request_timeout_ms == 0 || self.distributor.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "distributor timeout and attempts must be positive".into(),
            ));
        }
        let d = &self.downloader;
        if d.max_header_fetch == 0 || d.max_block_fetch == 0 || d.max_state_fetch == 0 {
            return Err(ConfigError::Invalid("downloader fetch sizes must be positive".into()));
        }
        if d.state_workers == 0 {
            return Err(ConfigError::Invalid("downloader.state_workers must be positive".into()));
        }
        if self.txpool.price_limit == 0 {
            return Err(ConfigError::Invalid("txpool.price_limit must be positive".into()));
        }
        if self.txpool.account_slots == 0 || self.txpool.global_slots == 0 {
            return Err(ConfigError::Invalid("txpool slot limits must be positive".into()));
        }
        if let Some(key) = &self.network.node_key {
            if parse_node_key(key).is_none() {
                return Err(ConfigError::InvalidValue {
                    var: "network.node_key",
                    value: key.clone(),
                });
            }
        }
        if self.storage.backend == StorageBackend::RocksDb {
            if !cfg!(feature = "rocksdb") {
                return Err(ConfigError::RocksDbUnavailable);
            }
            if self.storage.data_dir.as_os_str().is_empty() {
                return Err(ConfigError::Invalid("storage.data_dir is empty".into()));
            }
        }
        if self.storage.min_free_disk_percent > 100 {
            return Err(ConfigError::Invalid(
                "storage.min_free_disk_percent is a percentage".into(),
            ));
        }
        Ok(())
    }

    /// Configuration for tests: loopback listener on an ephemeral port, no
    /// bootnodes, in-memory store, quiet telemetry and fast component timers.
    pub fn for_testing() -> Self {
        Self {
            network: NetworkConfig {
                listen_addr: Some(SocketAddr::from(([127, 0, 0, 1], 0))),
                bootnodes: Vec::new(),
                node_key: None,
                redial_interval_ms: 100,
            },
            storage: StorageConfig::default(),
            miner: MinerConfig::default(),
            genesis: Genesis::default(),
            chain: ChainConfig::for_testing(),
            txpool: TxPoolConfig::for_testing(),
            downloader: DownloaderConfig::for_testing(),
            distributor: DistributorConfig::for_testing(),
            handler: HandlerConfig::for_testing(),
            telemetry: TelemetryConfig::for_testing(),
        }
    }

    /// The node id: `network.node_key` if set, random otherwise.
    pub fn node_id(&self) -> PeerId {
        self.network
            .node_key
            .as_deref()
            .and_then(parse_node_key)
            .unwrap_or_else(|| PeerId(rand::random()))
    }
}

fn parse<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
    })
}

fn parse_node_key(key: &str) -> Option<PeerId> {
    let bytes = hex::decode(key.trim().trim_start_matches("0x")).ok()?;
    let id: [u8; 32] = bytes.try_into().ok()?;
    Some(PeerId(id))
}

// =============================================================================
// NETWORK
// =============================================================================

/// Listener and outbound dialing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP listen address. `None` accepts no inbound connections.
    pub listen_addr: Option<SocketAddr>,
    /// Peers dialed at startup and redialed when their connection ends.
    pub bootnodes: Vec<SocketAddr>,
    /// Hex node id. Random per start when unset.
    pub node_key: Option<String>,
    /// Pause before redialing a bootnode.
    pub redial_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: Some(SocketAddr::from(([0, 0, 0, 0], 30303))),
            bootnodes: Vec::new(),
            node_key: None,
            redial_interval_ms: 30_000,
        }
    }
}

impl NetworkConfig {
    pub fn redial_interval(&self) -> Duration {
        Duration::from_millis(self.redial_interval_ms)
    }
}

// =============================================================================
// STORAGE
// =============================================================================

/// Key-value store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    RocksDb,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "rocksdb" => Ok(Self::RocksDb),
            other => Err(format!("unknown storage backend {other}")),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database directory for persistent backends.
    pub data_dir: PathBuf,
    /// Refuse to open a persistent store below this much free disk.
    pub min_free_disk_percent: u8,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            data_dir: PathBuf::from("./data"),
            min_free_disk_percent: 5,
        }
    }
}

// =============================================================================
// MINING
// =============================================================================

/// Consensus engine family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineChoice {
    #[default]
    ProofOfWork,
    ProofOfAuthority,
}

/// Mining configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Start mining once the node is up.
    pub enabled: bool,
    /// Miner threads for engines that use them. Negative disables.
    pub threads: i32,
    pub engine: EngineChoice,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threads: 1,
            engine: EngineChoice::ProofOfWork,
        }
    }
}
