//! # Transaction Gossip
//!
//! Two nodes on the same chain, pools following their heads. Admission
//! rules on the originating node decide what reaches the other one.

#[cfg(test)]
mod tests {
    use crate::fixtures::{alice, build, eventually, genesis, transfer, Branch};
    use mc_04_txpool::PoolError;
    use mc_06_handler::test_utils::{connect, TestNode};
    use shared_bus::{EventFilter, EventTopic};
    use tokio_util::sync::CancellationToken;

    /// Follow chain heads with the pool until `cancel` fires.
    fn follow_heads(node: &TestNode, cancel: &CancellationToken) {
        let heads = node
            .bus
            .subscribe(EventFilter::topics(vec![EventTopic::ChainHead]));
        tokio::spawn(node.pool.clone().run(heads, cancel.child_token()));
    }

    #[tokio::test]
    async fn test_admission_and_replacement_across_nodes() {
        let genesis = genesis();
        let a = TestNode::new(1, &genesis);
        let b = TestNode::new(2, &genesis);
        let cancel = CancellationToken::new();
        follow_heads(&a, &cancel);
        follow_heads(&b, &cancel);

        let chain = build(&a.engine, &a.executor, &genesis, 3, Branch::default());
        a.chain.insert_chain(&chain).unwrap();
        b.chain.insert_chain(&chain).unwrap();
        assert!(eventually(|| a.pool.head().number == 3 && b.pool.head().number == 3).await);

        let pending = a
            .bus
            .subscribe(EventFilter::topics(vec![EventTopic::Transactions]));
        tokio::spawn(a.handler.clone().run_tx_broadcast(pending, cancel.child_token()));
        b.handler.enable_transactions();
        let _tasks = connect(&a, &b, &cancel);
        assert!(a.wait_for_peers(1).await);
        assert!(b.wait_for_peers(1).await);

        // Nonces 0..3 are mined.
        assert!(matches!(
            a.pool.add_local(transfer(1, 1)),
            Err(PoolError::NonceTooLow {
                expected: 3,
                got: 1
            })
        ));

        let first = transfer(3, 10);
        a.pool.add_local(first.clone()).unwrap();
        assert!(eventually(|| b.pool.has(&first.hash())).await);

        // A replacement must outbid by the price bump.
        assert!(matches!(
            a.pool.add_local(transfer(3, 5)),
            Err(PoolError::Underpriced)
        ));
        assert!(matches!(
            a.pool.add_local(transfer(3, 10)),
            Err(PoolError::AlreadyKnown(_))
        ));

        let second = transfer(3, 11);
        a.pool.add_local(second.clone()).unwrap();
        assert!(eventually(|| b.pool.has(&second.hash())).await);
        assert!(!a.pool.has(&first.hash()));
        assert!(!b.pool.has(&first.hash()));

        let pending = b.pool.pending();
        let txs = pending.get(&alice().address()).unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].hash(), second.hash());
        assert_eq!(b.pool.stats().pending, 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_mined_transactions_leave_both_pools() {
        let genesis = genesis();
        let a = TestNode::new(1, &genesis);
        let b = TestNode::new(2, &genesis);
        let cancel = CancellationToken::new();
        follow_heads(&a, &cancel);
        follow_heads(&b, &cancel);

        let pending = a
            .bus
            .subscribe(EventFilter::topics(vec![EventTopic::Transactions]));
        tokio::spawn(a.handler.clone().run_tx_broadcast(pending, cancel.child_token()));
        b.handler.enable_transactions();
        let _tasks = connect(&a, &b, &cancel);
        assert!(b.wait_for_peers(1).await);

        // The generated blocks carry these same transfers.
        let txs: Vec<_> = (0..2).map(|nonce| transfer(nonce, 1)).collect();
        for tx in &txs {
            a.pool.add_local(tx.clone()).unwrap();
        }
        assert!(eventually(|| txs.iter().all(|tx| b.pool.has(&tx.hash()))).await);

        let chain = build(&a.engine, &a.executor, &genesis, 2, Branch::default());
        a.chain.insert_chain(&chain).unwrap();
        b.chain.insert_chain(&chain).unwrap();

        assert!(eventually(|| a.pool.stats().pending == 0 && b.pool.stats().pending == 0).await);
        assert_eq!(b.pool.nonce(&alice().address()), 2);
        cancel.cancel();
    }
}
