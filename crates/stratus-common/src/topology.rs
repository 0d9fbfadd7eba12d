use serde::{Deserialize, Serialize};

use crate::NodeId;

/// Replication factor assumed when the storage site file does not set one.
pub const DEFAULT_REPLICATION: u32 = 3;

/// Static cluster shape, rebuilt from the worker list on every invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterTopology {
    coordinator: NodeId,
    workers: Vec<NodeId>,
    configured_replication: u32,
}

impl ClusterTopology {
    /// Builds a topology, dropping repeated workers while keeping file order.
    pub fn new(coordinator: NodeId, workers: Vec<NodeId>, configured_replication: u32) -> Self {
        let mut unique: Vec<NodeId> = Vec::with_capacity(workers.len());
        for w in workers {
            if !unique.contains(&w) {
                unique.push(w);
            }
        }
        Self {
            coordinator,
            workers: unique,
            configured_replication,
        }
    }

    pub fn coordinator(&self) -> &NodeId {
        &self.coordinator
    }

    pub fn workers(&self) -> &[NodeId] {
        &self.workers
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn configured_replication(&self) -> u32 {
        self.configured_replication
    }

    pub fn is_worker(&self, node: &NodeId) -> bool {
        self.workers.contains(node)
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        &self.coordinator == node || self.is_worker(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_keeps_order() {
        let topo = ClusterTopology::new(
            "master".into(),
            vec!["w2".into(), "w1".into(), "w2".into()],
            2,
        );
        assert_eq!(topo.workers(), &[NodeId::from("w2"), NodeId::from("w1")]);
        assert!(topo.contains(&"master".into()));
        assert!(!topo.is_worker(&"master".into()));
    }
}
