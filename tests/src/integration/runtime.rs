//! # Full Runtime
//!
//! Two `NodeRuntime`s over TCP. The joining node mines, so its miner gate
//! sees the sync start and finish.

#[cfg(test)]
mod tests {
    use crate::fixtures::{build, eventually, genesis, Branch};
    use node_runtime::{NodeConfig, NodeRuntime};

    fn config() -> NodeConfig {
        let mut config = NodeConfig::for_testing();
        config.genesis = genesis();
        config
    }

    #[tokio::test]
    async fn test_mining_node_resumes_after_bootnode_sync() {
        let seed = NodeRuntime::new(config()).unwrap();
        let chain = build(
            seed.engine(),
            seed.executor(),
            &seed.config().genesis,
            6,
            Branch::default(),
        );
        seed.chain().insert_chain(&chain).unwrap();
        seed.start().await.unwrap();

        let mut joining = config();
        joining.network.listen_addr = None;
        joining.network.bootnodes = vec![seed.local_addr().unwrap()];
        joining.miner.enabled = true;
        let node = NodeRuntime::new(joining).unwrap();
        node.start().await.unwrap();

        assert!(eventually(|| node.chain().current_block().number() == 6).await);
        assert_eq!(node.chain().current_block().hash(), chain[5].hash());
        assert!(eventually(|| !node.miner().is_listening()).await);
        assert!(node.miner().is_mining());
        assert!(node.handler().accepts_transactions());
        assert!(!node.downloader().fast_sync_gate().is_enabled());

        node.shutdown().await;
        seed.shutdown().await;
    }
}
