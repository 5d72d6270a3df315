//! # Misbehaving Peers
//!
//! Scripted serving peers attached to a full node. The handler picks its
//! sync target by total difficulty, the downloader rejects what the target
//! serves wrong.

#[cfg(test)]
mod tests {
    use crate::fixtures::{build, genesis, Branch};
    use mc_03_blockchain::{BlockChain, ChainConfig, Genesis, InMemoryKVStore};
    use mc_05_downloader::test_utils::{serving_peer, Fault, ServingConnection};
    use mc_05_downloader::{SyncError, SyncMode};
    use mc_06_handler::test_utils::TestNode;
    use shared_bus::InMemoryEventBus;
    use shared_types::protocol::DisconnectReason;
    use shared_types::{Block, PeerId, U256};
    use std::sync::Arc;

    /// A chain of `blocks` owned by nobody but the serving peer.
    fn remote_chain(node: &TestNode, genesis: &Genesis, blocks: &[Block]) -> Arc<BlockChain> {
        let chain = Arc::new(
            BlockChain::new(
                Arc::new(InMemoryKVStore::new()),
                genesis,
                node.engine.clone(),
                node.executor.clone(),
                Arc::new(InMemoryEventBus::new()),
                ChainConfig::for_testing(),
            )
            .unwrap(),
        );
        chain.insert_chain(blocks).unwrap();
        chain
    }

    fn attach(node: &TestNode, tag: u8, chain: &Arc<BlockChain>) -> Arc<ServingConnection> {
        let (peer, conn) = serving_peer(tag, chain, &node.distributor);
        node.peers.register(peer, None).unwrap();
        node.distributor.peers_changed();
        conn
    }

    #[tokio::test]
    async fn test_heaviest_peer_with_bad_headers_is_dropped() {
        let genesis = genesis();
        let node = TestNode::new(9, &genesis);
        node.downloader.fast_sync_gate().disable();
        // Genesis difficulty is 1: TD 100 against TD 50.
        let heavy = build(
            &node.engine,
            &node.executor,
            &genesis,
            9,
            Branch {
                difficulty: 11,
                coinbase: 1,
                ..Branch::default()
            },
        );
        let light = build(
            &node.engine,
            &node.executor,
            &genesis,
            7,
            Branch {
                difficulty: 7,
                coinbase: 2,
                ..Branch::default()
            },
        );
        let heavy_conn = attach(&node, 1, &remote_chain(&node, &genesis, &heavy));
        let _light_conn = attach(&node, 2, &remote_chain(&node, &genesis, &light));
        heavy_conn.set_fault(Fault::TamperHeader(4));

        let op = node.handler.next_sync_op(true).unwrap();
        assert_eq!(op.peer, PeerId::from_byte(1));
        assert_eq!(op.td, U256::from(100));
        assert_eq!(op.mode, SyncMode::Full);

        let err = node.handler.do_sync(op).await.unwrap_err();
        match err {
            SyncError::InvalidHeaders { peer, number, .. } => {
                assert_eq!(peer, PeerId::from_byte(1));
                assert_eq!(number, 4);
            }
            other => panic!("expected invalid headers, got {other:?}"),
        }
        assert_eq!(node.chain.current_block().number(), 0);
        assert!(heavy.iter().all(|b| !node.chain.has_block(&b.hash())));
        assert_eq!(
            heavy_conn.disconnect_reason(),
            Some(DisconnectReason::UnreliablePeer)
        );

        // With the liar gone the next best peer is used.
        node.peers.unregister(&PeerId::from_byte(1)).unwrap();
        node.distributor.peers_changed();
        let op = node.handler.next_sync_op(true).unwrap();
        assert_eq!(op.peer, PeerId::from_byte(2));
        let report = node.handler.do_sync(op).await.unwrap();
        assert_eq!(report.head, 7);
        assert_eq!(node.chain.current_block().hash(), light[6].hash());
    }

    #[tokio::test]
    async fn test_corrupt_bodies_are_refetched_elsewhere() {
        let genesis = genesis();
        let node = TestNode::new(9, &genesis);
        node.downloader.fast_sync_gate().disable();
        let blocks = build(&node.engine, &node.executor, &genesis, 8, Branch::default());
        let remote = remote_chain(&node, &genesis, &blocks);
        let good = attach(&node, 1, &remote);
        let bad = attach(&node, 2, &remote);
        bad.set_fault(Fault::CorruptBodies);

        // Equal TD: the lowest id is the target, the other serves bodies.
        let op = node.handler.next_sync_op(true).unwrap();
        assert_eq!(op.peer, PeerId::from_byte(1));
        let report = node.handler.do_sync(op).await.unwrap();

        assert_eq!(report.head, 8);
        for block in &blocks {
            assert_eq!(node.chain.get_body(&block.hash()), Some(block.body()));
        }
        assert!(node.handler.accepts_transactions());
        assert_eq!(bad.disconnect_reason(), Some(DisconnectReason::UnreliablePeer));
        assert_eq!(good.disconnect_reason(), None);
    }
}
