//! Export types for serializing captured graph state.
//!
//! A [`GraphExport`] is the versioned, self-contained JSON document a
//! snapshot stores as its payload: full node and edge records plus the
//! cluster groupings derived from their stored metrics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{Edge, Node, NodeId};

/// Format version written into every export document.
pub const EXPORT_VERSION: u32 = 1;

/// A versioned, point-in-time serialization of one tenant's subgraph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphExport {
    /// Format version for forward compatibility.
    pub version: u32,
    /// Epoch seconds at which the capture ran.
    pub captured_at: u64,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    /// Node ids grouped by the cluster id written into their metrics.
    pub clusters: BTreeMap<String, Vec<NodeId>>,
}

impl GraphExport {
    /// Build an export from captured records, deriving cluster groupings
    /// from each node's stored `cluster_id`.
    pub fn new(captured_at: u64, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let mut clusters: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
        for node in &nodes {
            if let Some(cluster) = &node.metrics.cluster_id {
                clusters.entry(cluster.clone()).or_default().push(node.id);
            }
        }
        Self {
            version: EXPORT_VERSION,
            captured_at,
            nodes,
            edges,
            clusters,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}
