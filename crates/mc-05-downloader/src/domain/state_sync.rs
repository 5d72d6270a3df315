//! # State Sync Scheduler
//!
//! Breadth-first walk of the state trie under a root. Workers take batches
//! of node hashes, so every hash is requested by at most one worker at a
//! time; delivered nodes are hash-checked and their children scheduled.

use shared_types::trie::TrieNode;
use shared_types::{keccak256, Hash};
use std::collections::{HashSet, VecDeque};

/// Outcome of applying one node-data response.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NodeDelivery {
    /// Verified nodes to store.
    pub accepted: Vec<(Hash, Vec<u8>)>,
    /// Unrequested, mismatching or undecodable nodes.
    pub dropped: usize,
    /// Requested hashes the response did not cover, rescheduled.
    pub missing: usize,
}

/// Shared trie download state.
#[derive(Debug, Default)]
pub struct StateScheduler {
    queue: VecDeque<Hash>,
    in_flight: HashSet<Hash>,
    /// Hashes stored or already present locally.
    done: HashSet<Hash>,
    pulled: u64,
    known: u64,
}

impl StateScheduler {
    /// Start at `root`.
    pub fn new(root: Hash) -> Self {
        let mut scheduler = Self::default();
        scheduler.schedule(root);
        scheduler
    }

    fn schedule(&mut self, hash: Hash) {
        if self.done.contains(&hash) || self.in_flight.contains(&hash) {
            return;
        }
        if !self.queue.contains(&hash) {
            self.queue.push_back(hash);
            self.known += 1;
        }
    }

    /// Record a node that is already stored locally and schedule its children.
    pub fn mark_present(&mut self, hash: Hash, bytes: &[u8]) {
        self.queue.retain(|h| *h != hash);
        self.in_flight.remove(&hash);
        if !self.done.insert(hash) {
            return;
        }
        if let Ok(node) = TrieNode::decode(bytes) {
            for child in node.children() {
                self.schedule(child);
            }
        }
    }

    /// Take up to `max` hashes nobody is fetching.
    pub fn next_batch(&mut self, max: usize) -> Vec<Hash> {
        let mut batch = Vec::with_capacity(max.min(self.queue.len()));
        while batch.len() < max {
            let Some(hash) = self.queue.pop_front() else {
                break;
            };
            if self.done.contains(&hash) || !self.in_flight.insert(hash) {
                continue;
            }
            batch.push(hash);
        }
        batch
    }

    /// Apply a response to a request for `requested`.
    pub fn deliver(&mut self, requested: &[Hash], nodes: Vec<Vec<u8>>) -> NodeDelivery {
        let requested: HashSet<Hash> = requested.iter().copied().collect();
        let mut delivery = NodeDelivery::default();
        let mut covered = HashSet::new();

        for bytes in nodes {
            let hash = keccak256(&bytes);
            if !requested.contains(&hash) || !self.in_flight.contains(&hash) {
                delivery.dropped += 1;
                continue;
            }
            let Ok(node) = TrieNode::decode(&bytes) else {
                delivery.dropped += 1;
                continue;
            };
            self.in_flight.remove(&hash);
            self.done.insert(hash);
            covered.insert(hash);
            self.pulled += 1;
            for child in node.children() {
                self.schedule(child);
            }
            delivery.accepted.push((hash, bytes));
        }

        for hash in requested.difference(&covered) {
            if self.in_flight.remove(hash) {
                self.queue.push_front(*hash);
                delivery.missing += 1;
            }
        }
        delivery
    }

    /// Return a failed batch to the front of the queue.
    pub fn release(&mut self, hashes: &[Hash]) {
        for hash in hashes.iter().rev() {
            if self.in_flight.remove(hash) {
                self.queue.push_front(*hash);
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_empty()
    }

    /// Nothing is queued but other workers still have requests out.
    pub fn is_waiting(&self) -> bool {
        self.queue.is_empty() && !self.in_flight.is_empty()
    }

    pub fn pulled(&self) -> u64 {
        self.pulled
    }

    pub fn known(&self) -> u64 {
        self.known
    }
}
