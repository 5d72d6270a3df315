//! # Chain Sync Across Nodes
//!
//! ```text
//!   A (10 blocks) ──fast──→ B ──fast──→ C
//! ```
//!
//! Covers relayed sync, replay of every block in full mode and block
//! propagation once nodes are in step.

#[cfg(test)]
mod tests {
    use crate::fixtures::{assert_linked, build, canonical_headers, eventually, genesis, Branch};
    use mc_05_downloader::SyncMode;
    use mc_06_handler::test_utils::{connect, TestNode};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_sync_relays_through_intermediate_node() {
        let genesis = genesis();
        let a = TestNode::new(1, &genesis);
        let b = TestNode::new(2, &genesis);
        let c = TestNode::new(3, &genesis);
        let chain = build(&a.engine, &a.executor, &genesis, 10, Branch::default());
        a.chain.insert_chain(&chain).unwrap();
        let cancel = CancellationToken::new();

        tokio::spawn(b.handler.clone().run_syncer(cancel.child_token()));
        tokio::spawn(c.handler.clone().run_syncer(cancel.child_token()));

        let _ab = connect(&a, &b, &cancel);
        assert!(eventually(|| b.chain.current_block().number() == 10).await);

        let _bc = connect(&b, &c, &cancel);
        assert!(eventually(|| c.chain.current_block().number() == 10).await);

        assert_eq!(c.chain.current_block().hash(), chain[9].hash());
        let headers = canonical_headers(&c.chain);
        assert_eq!(headers.len(), 11);
        assert_eq!(headers[0].hash(), genesis.to_block().hash());
        assert_linked(&headers);
        assert!(!b.downloader.fast_sync_gate().is_enabled());
        assert!(!c.downloader.fast_sync_gate().is_enabled());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_full_sync_replays_every_block() {
        let genesis = genesis();
        let a = TestNode::new(1, &genesis);
        let b = TestNode::new(2, &genesis);
        let chain = build(&a.engine, &a.executor, &genesis, 10, Branch::default());
        a.chain.insert_chain(&chain).unwrap();
        b.downloader.fast_sync_gate().disable();
        let cancel = CancellationToken::new();

        let _tasks = connect(&a, &b, &cancel);
        assert!(b.wait_for_peers(1).await);
        let op = b.handler.next_sync_op(true).unwrap();
        assert_eq!(op.mode, SyncMode::Full);
        let report = b.handler.do_sync(op).await.unwrap();
        assert_eq!(report.head, 10);

        for block in &chain {
            let hash = block.hash();
            assert_eq!(b.chain.get_receipts(&hash), a.chain.get_receipts(&hash));
            assert!(b.chain.has_state(&block.header.state_root));
        }
        assert_eq!(b.chain.current_td(), a.chain.current_td());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_propagated_block_extends_synced_peer() {
        let genesis = genesis();
        let a = TestNode::new(1, &genesis);
        let b = TestNode::new(2, &genesis);
        let chain = build(&a.engine, &a.executor, &genesis, 13, Branch::default());
        a.chain.insert_chain(&chain[..12]).unwrap();
        let cancel = CancellationToken::new();

        tokio::spawn(b.handler.clone().run_syncer(cancel.child_token()));
        let _tasks = connect(&a, &b, &cancel);
        assert!(eventually(|| b.chain.current_block().number() == 12).await);
        assert!(eventually(|| !b.downloader.is_syncing()).await);

        a.chain.insert_chain(&chain[12..]).unwrap();
        a.handler.broadcast_block(&chain[12], true);

        assert!(eventually(|| b.chain.current_block().number() == 13).await);
        assert_eq!(b.chain.current_block().hash(), chain[12].hash());
        assert_linked(&canonical_headers(&b.chain));
        cancel.cancel();
    }
}
