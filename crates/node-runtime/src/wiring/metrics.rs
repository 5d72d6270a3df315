//! Feeds the Prometheus gauges from bus events.

use mc_01_peer_set::PeerSet;
use mc_03_blockchain::BlockChain;
use mc_04_txpool::TxPool;
use meridian_telemetry::metrics::{
    BUS_EVENTS, CHAIN_HEIGHT, FAST_HEIGHT, PEERS_CONNECTED, PEER_EVENTS, POOL_PENDING,
    POOL_QUEUED, SIDE_BLOCKS, SYNC_ATTEMPTS, SYNC_DURATION, SYNC_TARGET,
};
use shared_bus::{ChainEvent, EventTopic, Subscription, SubscriptionError};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Mirrors node state into the metrics registry.
pub struct MetricsRecorder {
    chain: Arc<BlockChain>,
    pool: Arc<TxPool>,
    peers: Arc<PeerSet>,
    sync_started: Option<Instant>,
}

impl MetricsRecorder {
    pub fn new(chain: Arc<BlockChain>, pool: Arc<TxPool>, peers: Arc<PeerSet>) -> Self {
        Self {
            chain,
            pool,
            peers,
            sync_started: None,
        }
    }

    /// Update gauges and counters for one event.
    pub fn record(&mut self, event: &ChainEvent) {
        BUS_EVENTS
            .with_label_values(&[topic_label(event.topic())])
            .inc();

        match event {
            ChainEvent::ChainHead(header) => {
                CHAIN_HEIGHT.set(header.number as f64);
                FAST_HEIGHT.set(self.chain.current_fast_block().number() as f64);
                self.record_pool();
            }
            ChainEvent::ChainSide(_) => SIDE_BLOCKS.inc(),
            ChainEvent::NewPendingTransactions(_) => self.record_pool(),
            ChainEvent::PeerConnected(_) => {
                PEER_EVENTS.with_label_values(&["connected"]).inc();
                PEERS_CONNECTED.set(self.peers.len() as f64);
            }
            ChainEvent::PeerDisconnected(_) => {
                PEER_EVENTS.with_label_values(&["disconnected"]).inc();
                PEERS_CONNECTED.set(self.peers.len() as f64);
            }
            ChainEvent::SyncStarted { target, .. } => {
                SYNC_ATTEMPTS.with_label_values(&["started"]).inc();
                SYNC_TARGET.set(*target as f64);
                self.sync_started = Some(Instant::now());
            }
            ChainEvent::SyncCompleted { .. } => {
                SYNC_ATTEMPTS.with_label_values(&["completed"]).inc();
                self.finish_sync();
                CHAIN_HEIGHT.set(self.chain.current_block().number() as f64);
                FAST_HEIGHT.set(self.chain.current_fast_block().number() as f64);
            }
            ChainEvent::SyncFailed { .. } => {
                SYNC_ATTEMPTS.with_label_values(&["failed"]).inc();
                self.finish_sync();
            }
            ChainEvent::NewLogs(_) | ChainEvent::RemovedLogs(_) => {}
        }
    }

    fn record_pool(&self) {
        let stats = self.pool.stats();
        POOL_PENDING.set(stats.pending as f64);
        POOL_QUEUED.set(stats.queued as f64);
    }

    fn finish_sync(&mut self) {
        if let Some(started) = self.sync_started.take() {
            SYNC_DURATION.observe(started.elapsed().as_secs_f64());
        }
    }

    pub async fn run(mut self, mut events: Subscription, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => self.record(&event),
                    Err(SubscriptionError::Lagged(missed)) => {
                        warn!(missed, "Metrics recorder lagged behind the bus");
                    }
                    Err(SubscriptionError::Closed) => break,
                },
            }
        }
        events.unsubscribe();
    }
}

fn topic_label(topic: EventTopic) -> &'static str {
    match topic {
        EventTopic::ChainHead => "chain_head",
        EventTopic::ChainSide => "chain_side",
        EventTopic::Logs => "logs",
        EventTopic::Transactions => "transactions",
        EventTopic::Sync => "sync",
        EventTopic::Peers => "peers",
        EventTopic::All => "all",
    }
}
