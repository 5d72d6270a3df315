//! # Fork Choice Over the Wire
//!
//! A node holding a long light branch meets a peer with a shorter branch of
//! higher total difficulty. The sync reorgs onto the heavy branch and every
//! dropped block is reported once as a side block.

#[cfg(test)]
mod tests {
    use crate::fixtures::{build, canonical_headers, eventually, genesis, Branch};
    use mc_06_handler::test_utils::{connect, TestNode};
    use shared_bus::{ChainEvent, EventFilter, EventTopic};
    use std::collections::HashMap;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_sync_reorgs_onto_heavier_branch() {
        let genesis = genesis();
        let heavy_node = TestNode::new(1, &genesis);
        let node = TestNode::new(2, &genesis);
        let light = build(
            &node.engine,
            &node.executor,
            &genesis,
            4,
            Branch {
                coinbase: 1,
                ..Branch::default()
            },
        );
        let heavy = build(
            &node.engine,
            &node.executor,
            &genesis,
            3,
            Branch {
                difficulty: 5_000,
                coinbase: 2,
                ..Branch::default()
            },
        );
        node.chain.insert_chain(&light).unwrap();
        heavy_node.chain.insert_chain(&heavy).unwrap();
        assert!(heavy_node.chain.current_td() > node.chain.current_td());
        node.downloader.fast_sync_gate().disable();

        let mut sides = node
            .bus
            .subscribe(EventFilter::topics(vec![EventTopic::ChainSide]));
        let cancel = CancellationToken::new();
        tokio::spawn(node.handler.clone().run_syncer(cancel.child_token()));
        let _tasks = connect(&heavy_node, &node, &cancel);

        assert!(eventually(|| node.chain.current_block().hash() == heavy[2].hash()).await);
        assert_eq!(node.chain.current_td(), heavy_node.chain.current_td());
        let headers = canonical_headers(&node.chain);
        assert_eq!(headers.len(), 4);
        for (header, block) in headers[1..].iter().zip(&heavy) {
            assert_eq!(header.hash(), block.hash());
        }

        let mut seen: HashMap<_, usize> = HashMap::new();
        while let Ok(Some(event)) = sides.try_recv() {
            if let ChainEvent::ChainSide(block) = event {
                *seen.entry(block.hash()).or_default() += 1;
            }
        }
        for block in &light {
            assert_eq!(seen.get(&block.hash()), Some(&1), "block {}", block.number());
        }
        for block in &heavy {
            assert!(!seen.contains_key(&block.hash()));
        }
        // The light branch stays stored.
        assert!(light.iter().all(|b| node.chain.has_block(&b.hash())));
        cancel.cancel();
    }
}
