//! Traversal Engine: read-only neighbor lookup, bounded multi-hop traversal,
//! and weight-minimizing shortest-path search within a hop bound.
//!
//! Every operation is tenant-scoped and sees only active records whose
//! validity window covers the query time. Traversal is an explicit
//! breadth-first frontier of `(node, path)` pairs: the path doubles as the
//! cycle guard, and expansion follows ascending `EdgeId` order so results are
//! reproducible run to run.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, OmniResult};
use crate::model::{EdgeId, EdgeType, Node, NodeId, NodeType, now_secs};
use crate::store::GraphStore;
use crate::tenant::TenantId;

/// Which stored edge orientations to follow from a node.
///
/// Bidirectional edges satisfy either direction regardless of how they are
/// stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Outgoing => "outgoing",
            Self::Incoming => "incoming",
            Self::Both => "both",
        };
        write!(f, "{s}")
    }
}

/// Bounds and filters for [`Traversal::traverse`]. Built with `with_*`
/// setters; empty type filters mean "all".
#[derive(Debug, Clone)]
pub struct TraversalConfig {
    pub max_depth: usize,
    pub direction: Direction,
    pub edge_types: Vec<EdgeType>,
    /// Nodes of other types are neither returned nor expanded through.
    pub node_types: Vec<NodeType>,
    pub limit: usize,
    /// Query instant for validity windows; `None` means now.
    pub as_of: Option<u64>,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            direction: Direction::Outgoing,
            edge_types: Vec::new(),
            node_types: Vec::new(),
            limit: 100,
            as_of: None,
        }
    }
}

impl TraversalConfig {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_edge_types(mut self, edge_types: Vec<EdgeType>) -> Self {
        self.edge_types = edge_types;
        self
    }

    pub fn with_node_types(mut self, node_types: Vec<NodeType>) -> Self {
        self.node_types = node_types;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_as_of(mut self, as_of: u64) -> Self {
        self.as_of = Some(as_of);
        self
    }
}

/// One direct neighbor, with the connecting edge's id, type, and weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborHit {
    pub node: Node,
    pub edge: EdgeId,
    pub edge_type: EdgeType,
    pub weight: f64,
}

/// One node reached by a bounded traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalHit {
    pub node: NodeId,
    /// Hop count from the start node (1 for direct neighbors).
    pub depth: usize,
    /// Node sequence from the start to this node, inclusive.
    pub path: Vec<NodeId>,
}

/// A shortest path between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathResult {
    /// Node sequence from start to end, inclusive.
    pub path: Vec<NodeId>,
    /// Edges connecting the path's nodes, in order.
    pub edges: Vec<EdgeId>,
    /// Hop count: `path.len() - 1`.
    pub length: usize,
    pub total_weight: f64,
}

/// A candidate path during shortest-path search.
#[derive(Debug, Clone)]
struct PathState {
    node: NodeId,
    path: Vec<NodeId>,
    edges: Vec<EdgeId>,
    weight: f64,
}

/// Heap entry for uniform-cost search. Ordered so the cheapest path pops
/// first; ties fall to fewer hops, then to the path discovered first.
struct Candidate {
    hops: usize,
    seq: u64,
    state: PathState,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap and the minimum must pop first.
        other
            .state
            .weight
            .total_cmp(&self.state.weight)
            .then_with(|| other.hops.cmp(&self.hops))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Read-only traversal over a [`GraphStore`]. Holds no state of its own.
pub struct Traversal {
    store: Arc<GraphStore>,
}

impl Traversal {
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self { store }
    }

    /// Direct neighbors of `node`, ordered by edge weight descending with
    /// ties broken by ascending `EdgeId`.
    pub fn neighbors(
        &self,
        tenant: TenantId,
        node: NodeId,
        direction: Direction,
        edge_types: &[EdgeType],
        limit: usize,
        as_of: Option<u64>,
    ) -> OmniResult<Vec<NeighborHit>> {
        let at = as_of.unwrap_or_else(now_secs);
        self.require_start(tenant, node, at)?;

        let mut hits: Vec<NeighborHit> = self
            .store
            .adjacent(tenant, node, direction, at)
            .into_iter()
            .filter(|adj| edge_types.is_empty() || edge_types.contains(&adj.edge.edge_type))
            .filter_map(|adj| {
                let neighbor = self.store.visible_node(tenant, adj.neighbor, at)?;
                Some(NeighborHit {
                    node: neighbor,
                    edge: adj.edge.id,
                    edge_type: adj.edge.edge_type,
                    weight: adj.edge.weight,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.edge.cmp(&b.edge))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Breadth-first traversal from `start`, bounded by depth and result
    /// count.
    ///
    /// The start node itself is not a result. A node reachable by several
    /// paths appears once, at its lowest depth; cycles are cut by rejecting
    /// any candidate already on the current path and never error.
    pub fn traverse(
        &self,
        tenant: TenantId,
        start: NodeId,
        config: &TraversalConfig,
    ) -> OmniResult<Vec<TraversalHit>> {
        let at = config.as_of.unwrap_or_else(now_secs);
        self.require_start(tenant, start, at)?;

        let mut hits: Vec<TraversalHit> = Vec::new();
        let mut seen: std::collections::HashSet<NodeId> = std::collections::HashSet::new();
        seen.insert(start);

        let mut frontier: Vec<(NodeId, Vec<NodeId>)> = vec![(start, vec![start])];
        let mut depth = 0;

        while !frontier.is_empty() && depth < config.max_depth && hits.len() < config.limit {
            depth += 1;
            let mut next: Vec<(NodeId, Vec<NodeId>)> = Vec::new();

            'frontier: for (node, path) in frontier {
                for adj in self.store.adjacent(tenant, node, config.direction, at) {
                    if !config.edge_types.is_empty()
                        && !config.edge_types.contains(&adj.edge.edge_type)
                    {
                        continue;
                    }
                    let candidate = adj.neighbor;
                    // Cycle guard: never walk back onto the current path.
                    if path.contains(&candidate) {
                        continue;
                    }
                    if seen.contains(&candidate) {
                        continue;
                    }
                    let Some(node_record) = self.store.visible_node(tenant, candidate, at) else {
                        continue;
                    };
                    if !config.node_types.is_empty()
                        && !config.node_types.contains(&node_record.node_type)
                    {
                        // Type filters prune expansion, not just results.
                        continue;
                    }

                    seen.insert(candidate);
                    let mut extended = path.clone();
                    extended.push(candidate);
                    hits.push(TraversalHit {
                        node: candidate,
                        depth,
                        path: extended.clone(),
                    });
                    if hits.len() >= config.limit {
                        break 'frontier;
                    }
                    next.push((candidate, extended));
                }
            }
            frontier = next;
        }
        Ok(hits)
    }

    /// Minimum-weight path from `start` to `end` within `max_depth` hops.
    ///
    /// Edges are followed in both directions; the path view is undirected, so
    /// a route exists whenever the two nodes are connected at all. Optimality
    /// order: lower cumulative weight first, then fewer hops, then the path
    /// discovered first under ascending-`EdgeId` expansion. Returns `Ok(None)`
    /// when no path exists within `max_depth` hops; only an invalid start
    /// node is an error.
    pub fn shortest_path(
        &self,
        tenant: TenantId,
        start: NodeId,
        end: NodeId,
        max_depth: usize,
        as_of: Option<u64>,
    ) -> OmniResult<Option<PathResult>> {
        let at = as_of.unwrap_or_else(now_secs);
        self.require_start(tenant, start, at)?;

        if start == end {
            return Ok(Some(PathResult {
                path: vec![start],
                edges: Vec::new(),
                length: 0,
                total_weight: 0.0,
            }));
        }
        if self.store.visible_node(tenant, end, at).is_none() {
            return Ok(None);
        }

        // Uniform-cost search over (node, hops) states. The hop bound makes
        // a plain per-node settled set unsound: a heavier path with fewer
        // hops can still reach `end` when the lighter one runs out of hop
        // budget, so the best weight is tracked per (node, hops) pair.
        let mut best: HashMap<(NodeId, usize), f64> = HashMap::new();
        let mut heap: BinaryHeap<Candidate> = BinaryHeap::new();
        let mut seq = 0u64;
        heap.push(Candidate {
            hops: 0,
            seq,
            state: PathState {
                node: start,
                path: vec![start],
                edges: Vec::new(),
                weight: 0.0,
            },
        });

        while let Some(Candidate { hops, state, .. }) = heap.pop() {
            if state.node == end {
                return Ok(Some(PathResult {
                    path: state.path,
                    edges: state.edges,
                    length: hops,
                    total_weight: state.weight,
                }));
            }
            // Stale entry: a cheaper path to this state was found after this
            // one was pushed.
            if best
                .get(&(state.node, hops))
                .is_some_and(|&w| w < state.weight)
            {
                continue;
            }
            if hops == max_depth {
                continue;
            }

            for adj in self.store.adjacent(tenant, state.node, Direction::Both, at) {
                let candidate = adj.neighbor;
                if state.path.contains(&candidate) {
                    continue;
                }
                if self.store.visible_node(tenant, candidate, at).is_none() {
                    continue;
                }
                let weight = state.weight + adj.edge.weight;
                let slot = best.entry((candidate, hops + 1)).or_insert(f64::INFINITY);
                if *slot <= weight {
                    continue;
                }
                *slot = weight;

                let mut path = state.path.clone();
                path.push(candidate);
                let mut edges = state.edges.clone();
                edges.push(adj.edge.id);
                seq += 1;
                heap.push(Candidate {
                    hops: hops + 1,
                    seq,
                    state: PathState {
                        node: candidate,
                        path,
                        edges,
                        weight,
                    },
                });
            }
        }
        Ok(None)
    }

    fn require_start(&self, tenant: TenantId, node: NodeId, at: u64) -> OmniResult<()> {
        if self.store.visible_node(tenant, node, at).is_none() {
            return Err(GraphError::UnknownStartNode { tenant, node }.into());
        }
        Ok(())
    }
}
