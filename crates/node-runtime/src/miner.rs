//! # Miner Sync Gate
//!
//! Mining is paused while the downloader runs a sync so the node does not
//! seal on a stale head.
//!
//! ```text
//!   SyncStarted   ─→ pause, remember whether mining was on
//!   SyncFailed    ─→ resume if it was
//!   SyncCompleted ─→ resume if it was, stop listening for good
//! ```
//!
//! Sealing itself belongs to the consensus engine. The gate only tracks
//! whether the node should be mining and hands the thread count to engines
//! that expose the threaded capability.

use mc_03_blockchain::ConsensusEngine;
use parking_lot::Mutex;
use shared_bus::{ChainEvent, Subscription, SubscriptionError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct GateState {
    /// The worker is running.
    mining: bool,
    /// Mining was requested and should run whenever allowed.
    should_start: bool,
    /// No sync in progress.
    can_start: bool,
    /// Still reacting to sync events.
    listening: bool,
}

/// Pauses and resumes mining around sync attempts.
pub struct MinerGate {
    engine: Arc<dyn ConsensusEngine>,
    state: Mutex<GateState>,
}

impl MinerGate {
    pub fn new(engine: Arc<dyn ConsensusEngine>) -> Self {
        Self {
            engine,
            state: Mutex::new(GateState {
                mining: false,
                should_start: false,
                can_start: true,
                listening: true,
            }),
        }
    }

    /// Request mining with `threads` workers. Engines without the threaded
    /// capability ignore the count. Mining starts now unless a sync is in
    /// progress, in which case it starts when the sync ends.
    pub fn start_mining(&self, threads: i32) {
        if let Some(miner) = self.engine.descriptor().threaded {
            miner.set_threads(threads);
            debug!(threads, "Set miner threads");
        }
        let mut state = self.state.lock();
        state.should_start = true;
        if state.can_start {
            state.mining = true;
            info!(threads, "Mining started");
        } else {
            info!("Mining deferred until sync ends");
        }
    }

    pub fn stop_mining(&self) {
        let mut state = self.state.lock();
        state.should_start = false;
        if state.mining {
            state.mining = false;
            info!("Mining stopped");
        }
    }

    pub fn is_mining(&self) -> bool {
        self.state.lock().mining
    }

    /// Whether sync events still move the gate.
    pub fn is_listening(&self) -> bool {
        self.state.lock().listening
    }

    /// Apply one sync event. Returns false once the gate stops listening.
    pub fn handle_event(&self, event: &ChainEvent) -> bool {
        let mut state = self.state.lock();
        if !state.listening {
            return false;
        }
        match event {
            ChainEvent::SyncStarted { target, .. } => {
                let was_mining = state.mining;
                state.mining = false;
                state.can_start = false;
                if was_mining {
                    state.should_start = true;
                    info!(sync_target = *target, "Mining aborted due to sync");
                }
            }
            ChainEvent::SyncFailed { .. } => {
                state.can_start = true;
                if state.should_start {
                    state.mining = true;
                    info!("Mining resumed after failed sync");
                }
            }
            ChainEvent::SyncCompleted { head, .. } => {
                state.can_start = true;
                if state.should_start {
                    state.mining = true;
                    info!(head, "Mining resumed after sync");
                }
                state.listening = false;
            }
            _ => {}
        }
        state.listening
    }

    /// Follow `events` until the first completed sync or cancellation.
    pub async fn run(self: Arc<Self>, mut events: Subscription, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => {
                        if !self.handle_event(&event) {
                            debug!("Miner gate stopped following sync events");
                            break;
                        }
                    }
                    Err(SubscriptionError::Lagged(missed)) => {
                        warn!(missed, "Miner gate lagged behind sync events");
                    }
                    Err(SubscriptionError::Closed) => break,
                },
            }
        }
        events.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mc_03_blockchain::BasicEngine;
    use shared_bus::{EventFilter, EventPublisher, EventTopic, InMemoryEventBus};
    use std::time::Duration;

    fn pow_gate() -> (Arc<dyn ConsensusEngine>, MinerGate) {
        let engine: Arc<dyn ConsensusEngine> = Arc::new(BasicEngine::proof_of_work());
        (engine.clone(), MinerGate::new(engine))
    }

    fn started() -> ChainEvent {
        ChainEvent::SyncStarted {
            origin: 0,
            target: 10,
        }
    }

    fn completed() -> ChainEvent {
        ChainEvent::SyncCompleted {
            head: 10,
            head_hash: [0u8; 32],
        }
    }

    fn failed() -> ChainEvent {
        ChainEvent::SyncFailed {
            reason: "peer dropped".into(),
        }
    }

    #[test]
    fn test_start_sets_threads() {
        let (engine, gate) = pow_gate();
        gate.start_mining(4);

        assert!(gate.is_mining());
        let threaded = engine.descriptor().threaded.unwrap();
        assert_eq!(threaded.threads(), 4);
    }

    #[test]
    fn test_authority_engine_mines_without_threads() {
        let engine: Arc<dyn ConsensusEngine> = Arc::new(BasicEngine::proof_of_authority());
        let gate = MinerGate::new(engine.clone());
        gate.start_mining(4);

        assert!(gate.is_mining());
        assert!(engine.descriptor().threaded.is_none());
    }

    #[test]
    fn test_sync_pauses_and_failure_resumes() {
        let (_, gate) = pow_gate();
        gate.start_mining(1);

        assert!(gate.handle_event(&started()));
        assert!(!gate.is_mining());

        assert!(gate.handle_event(&failed()));
        assert!(gate.is_mining());
    }

    #[test]
    fn test_completion_resumes_and_stops_listening() {
        let (_, gate) = pow_gate();
        gate.start_mining(1);

        gate.handle_event(&started());
        assert!(!gate.handle_event(&completed()));
        assert!(gate.is_mining());
        assert!(!gate.is_listening());

        // Later syncs no longer pause mining.
        gate.handle_event(&started());
        assert!(gate.is_mining());
    }

    #[test]
    fn test_start_during_sync_is_deferred() {
        let (_, gate) = pow_gate();
        gate.handle_event(&started());

        gate.start_mining(2);
        assert!(!gate.is_mining());

        gate.handle_event(&completed());
        assert!(gate.is_mining());
    }

    #[test]
    fn test_idle_miner_stays_idle_after_sync() {
        let (_, gate) = pow_gate();
        gate.handle_event(&started());
        gate.handle_event(&completed());
        assert!(!gate.is_mining());
    }

    #[test]
    fn test_stop_clears_pending_restart() {
        let (_, gate) = pow_gate();
        gate.start_mining(1);
        gate.handle_event(&started());
        gate.stop_mining();

        gate.handle_event(&failed());
        assert!(!gate.is_mining());
    }

    #[tokio::test]
    async fn test_run_follows_bus_until_completion() {
        let bus = InMemoryEventBus::new();
        let (_, gate) = pow_gate();
        let gate = Arc::new(gate);
        gate.start_mining(1);

        let sub = bus.subscribe(EventFilter::topics(vec![EventTopic::Sync]));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(gate.clone().run(sub, cancel.clone()));

        bus.publish(started());
        tokio::time::timeout(Duration::from_secs(2), async {
            while gate.is_mining() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        bus.publish(completed());
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(gate.is_mining());
        assert!(!gate.is_listening());
    }
}
