//! Prometheus metrics for a Meridian-Chain node.
//!
//! All metrics follow the naming convention: `mc_<component>_<metric>_<unit>`
//!
//! | Component | Metrics |
//! |-----------|---------|
//! | chain | height, fast-sync height, side blocks |
//! | peers | connected, connect/disconnect events |
//! | txpool | pending, queued |
//! | sync | attempts by outcome, target height, duration |
//! | eventbus | events observed |

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts,
    Registry, TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Registry the node metrics live in.
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // CHAIN
    // =========================================================================

    pub static ref CHAIN_HEIGHT: Gauge = Gauge::new(
        "mc_chain_height",
        "Number of the canonical head"
    ).expect("metric creation failed");

    pub static ref FAST_HEIGHT: Gauge = Gauge::new(
        "mc_chain_fast_height",
        "Number of the fast-sync head"
    ).expect("metric creation failed");

    pub static ref SIDE_BLOCKS: Counter = Counter::new(
        "mc_chain_side_blocks_total",
        "Blocks stored off the canonical chain or detached by a reorg"
    ).expect("metric creation failed");

    // =========================================================================
    // PEERS
    // =========================================================================

    pub static ref PEERS_CONNECTED: Gauge = Gauge::new(
        "mc_peers_connected",
        "Registered peers"
    ).expect("metric creation failed");

    pub static ref PEER_EVENTS: CounterVec = CounterVec::new(
        Opts::new("mc_peers_events_total", "Peer registrations and removals"),
        &["event"]  // event: connected/disconnected
    ).expect("metric creation failed");

    // =========================================================================
    // TRANSACTION POOL
    // =========================================================================

    pub static ref POOL_PENDING: Gauge = Gauge::new(
        "mc_txpool_pending",
        "Executable transactions in the pool"
    ).expect("metric creation failed");

    pub static ref POOL_QUEUED: Gauge = Gauge::new(
        "mc_txpool_queued",
        "Non-executable transactions in the pool"
    ).expect("metric creation failed");

    // =========================================================================
    // SYNC
    // =========================================================================

    pub static ref SYNC_ATTEMPTS: CounterVec = CounterVec::new(
        Opts::new("mc_sync_attempts_total", "Sync attempts by outcome"),
        &["outcome"]  // outcome: started/completed/failed
    ).expect("metric creation failed");

    pub static ref SYNC_TARGET: Gauge = Gauge::new(
        "mc_sync_target_height",
        "Remote head number of the current or last sync attempt"
    ).expect("metric creation failed");

    pub static ref SYNC_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "mc_sync_duration_seconds",
            "Duration of finished sync attempts"
        ).buckets(exponential_buckets(0.01, 2.0, 16).expect("valid buckets"))
    ).expect("metric creation failed");

    // =========================================================================
    // EVENT BUS
    // =========================================================================

    pub static ref BUS_EVENTS: CounterVec = CounterVec::new(
        Opts::new("mc_eventbus_events_total", "Events observed on the bus by topic"),
        &["topic"]
    ).expect("metric creation failed");
}

/// Proof that the node metrics are registered.
#[derive(Debug, Clone, Copy)]
pub struct MetricsHandle {
    _private: (),
}

/// Register the node metrics with [`REGISTRY`]. Calling it again is a no-op.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Chain
        Box::new(CHAIN_HEIGHT.clone()),
        Box::new(FAST_HEIGHT.clone()),
        Box::new(SIDE_BLOCKS.clone()),
        // Peers
        Box::new(PEERS_CONNECTED.clone()),
        Box::new(PEER_EVENTS.clone()),
        // Pool
        Box::new(POOL_PENDING.clone()),
        Box::new(POOL_QUEUED.clone()),
        // Sync
        Box::new(SYNC_ATTEMPTS.clone()),
        Box::new(SYNC_TARGET.clone()),
        Box::new(SYNC_DURATION.clone()),
        // Event bus
        Box::new(BUS_EVENTS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle { _private: () })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
