//! Common test utilities for coordinator integration tests
#![allow(dead_code)]

use std::sync::Arc;
use twophase_coordinator::{Participant, TransactionId};
use twophase_participant::{Behavior, CallKind, MemoryParticipant};

/// Install a test-friendly subscriber; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A set of in-memory participants addressed by index
pub struct Cluster {
    pub nodes: Vec<Arc<MemoryParticipant>>,
}

impl Cluster {
    /// One participant per behavior, named `node-<index>`
    pub fn new(behaviors: Vec<Behavior>) -> Self {
        let nodes = behaviors
            .into_iter()
            .enumerate()
            .map(|(index, behavior)| {
                Arc::new(MemoryParticipant::with_behavior(
                    format!("node-{}", index),
                    behavior,
                ))
            })
            .collect();
        Self { nodes }
    }

    pub fn healthy(count: usize) -> Self {
        Self::new(vec![Behavior::default(); count])
    }

    /// Handles to pass to the coordinator
    pub fn handles(&self) -> Vec<Arc<dyn Participant>> {
        self.nodes
            .iter()
            .map(|node| node.clone() as Arc<dyn Participant>)
            .collect()
    }

    /// Stage `key = value` on every node
    pub fn stage_all(&self, txn_id: TransactionId, key: &str, value: &str) {
        for node in &self.nodes {
            node.stage(txn_id, key, value).unwrap();
        }
    }

    pub fn node(&self, index: usize) -> &MemoryParticipant {
        &self.nodes[index]
    }

    /// Calls node `index` received for `txn_id`
    pub fn calls(&self, index: usize, txn_id: TransactionId) -> Vec<CallKind> {
        self.nodes[index].calls_for(txn_id)
    }
}
