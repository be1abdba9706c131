//! Graph Store: the single owner of node and edge lifecycle.
//!
//! Two layers serve different access patterns:
//!
//! - **In-memory layer**: a `petgraph` [`StableDiGraph`] topology index plus
//!   record maps, all behind one `RwLock`. Mutations serialize through the
//!   write lock, so the unique `(tenant, external_id, source_system)` index
//!   commits atomically with the insert, so there is no check-then-insert
//!   window for concurrent duplicate registrations to slip through.
//! - **Persistent layer** ([`DurableStore`]): redb tables written through on
//!   every mutation and replayed on startup.
//!
//! Tenant scope is validated here, at the storage boundary, on every call.

pub mod durable;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use petgraph::Direction as PDirection;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};

use crate::audit::{AuditAction, AuditLog};
use crate::error::{GraphError, OmniResult};
use crate::model::{
    Edge, EdgeId, EdgeType, GraphMetrics, IdAllocator, NewEdge, NewNode, Node, NodeId, NodeType,
    Properties, Provenance, merge_properties, now_secs,
};
use crate::tenant::TenantId;
use crate::traverse::Direction;
use self::durable::{DurableStore, EDGES, NODES};

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// `(tenant, external_id, source_system)`: the ingestion identity of a node.
type ExternalKey = (TenantId, String, String);

/// One traversable edge incident to a queried node.
#[derive(Debug, Clone)]
pub struct Adjacent {
    pub edge: Edge,
    /// The endpoint opposite the queried node.
    pub neighbor: NodeId,
    /// The edge's stored orientation relative to the queried node.
    pub orientation: Direction,
}

#[derive(Default)]
struct StoreState {
    topology: StableDiGraph<NodeId, EdgeId>,
    node_idx: HashMap<NodeId, NodeIndex>,
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Edge>,
    external_index: HashMap<ExternalKey, NodeId>,
}

/// Durable, tenant-isolated storage of nodes and directed/bidirectional edges.
pub struct GraphStore {
    state: RwLock<StoreState>,
    node_ids: IdAllocator,
    edge_ids: IdAllocator,
    durable: Option<Arc<DurableStore>>,
    audit: Arc<AuditLog>,
}

impl GraphStore {
    /// Create a store, replaying any persisted nodes and edges.
    pub fn new(durable: Option<Arc<DurableStore>>, audit: Arc<AuditLog>) -> OmniResult<Self> {
        let mut state = StoreState::default();
        let node_ids = IdAllocator::new();
        let edge_ids = IdAllocator::new();

        if let Some(d) = &durable {
            let nodes: Vec<(u64, Node)> = d.load_all(NODES)?;
            for (raw, node) in nodes {
                node_ids.observe(raw);
                index_node(&mut state, node);
            }
            let edges: Vec<(u64, Edge)> = d.load_all(EDGES)?;
            for (raw, edge) in edges {
                edge_ids.observe(raw);
                index_edge(&mut state, edge);
            }
            tracing::info!(
                nodes = state.nodes.len(),
                edges = state.edges.len(),
                "graph store replayed from durable layer"
            );
        }

        Ok(Self {
            state: RwLock::new(state),
            node_ids,
            edge_ids,
            durable,
            audit,
        })
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Create a node.
    ///
    /// Fails with [`GraphError::DuplicateExternalId`] if the node carries an
    /// external identity that is already registered for this tenant.
    pub fn create_node(&self, tenant: TenantId, new: NewNode) -> OmniResult<NodeId> {
        let mut state = self.state.write().expect("graph store lock poisoned");
        let id = self.create_node_locked(&mut state, tenant, new)?;
        self.audit.record(tenant, AuditAction::NodeCreated { node: id });
        Ok(id)
    }

    /// Idempotent ingestion entry point: get-or-create on
    /// `(tenant, source_record_id, source_system)`.
    ///
    /// Re-registration returns the existing `NodeId` and merges `properties`.
    pub fn register_node(
        &self,
        tenant: TenantId,
        source_system: &str,
        source_record_id: &str,
        node_type: NodeType,
        label: &str,
        properties: Properties,
    ) -> OmniResult<NodeId> {
        let mut state = self.state.write().expect("graph store lock poisoned");
        let key = (tenant, source_record_id.to_string(), source_system.to_string());

        if let Some(&id) = state.external_index.get(&key) {
            if !properties.is_empty() {
                let node = state.nodes.get_mut(&id).expect("external index out of sync");
                let before = node.properties.clone();
                merge_properties(&mut node.properties, &properties);
                if node.properties != before {
                    node.updated_at = now_secs();
                    self.persist_node(state.nodes.get(&id).expect("just updated"))?;
                    self.audit
                        .record(tenant, AuditAction::NodePropertiesUpdated { node: id });
                }
            }
            return Ok(id);
        }

        let new = NewNode::new(node_type, label)
            .with_external_id(source_system, source_record_id)
            .with_properties(properties);
        let id = self.create_node_locked(&mut state, tenant, new)?;
        self.audit.record(tenant, AuditAction::NodeCreated { node: id });
        Ok(id)
    }

    /// Create an edge between two existing, active nodes of this tenant.
    pub fn create_edge(&self, tenant: TenantId, new: NewEdge) -> OmniResult<EdgeId> {
        let mut state = self.state.write().expect("graph store lock poisoned");
        let id = self.create_edge_locked(&mut state, tenant, new)?;
        self.audit.record(tenant, AuditAction::EdgeCreated { edge: id });
        Ok(id)
    }

    /// Idempotent ingestion entry point for edges: get-or-create on the
    /// `(source, target, edge_type, source_system)` tuple among active edges.
    ///
    /// Symmetric edge types (`similar_to`, `correlates_with`) are created
    /// bidirectional.
    pub fn register_edge(
        &self,
        tenant: TenantId,
        source_system: &str,
        source: NodeId,
        target: NodeId,
        edge_type: EdgeType,
        properties: Properties,
    ) -> OmniResult<EdgeId> {
        let mut state = self.state.write().expect("graph store lock poisoned");

        let existing = state.node_idx.get(&source).map(|&idx| {
            state
                .topology
                .edges_directed(idx, PDirection::Outgoing)
                .map(|e| *e.weight())
                .collect::<Vec<_>>()
        });
        if let Some(edge_ids) = existing {
            for edge_id in edge_ids {
                let Some(edge) = state.edges.get(&edge_id) else {
                    continue;
                };
                if edge.is_active
                    && edge.tenant == tenant
                    && edge.target == target
                    && edge.edge_type == edge_type
                    && edge.provenance.source_system.as_deref() == Some(source_system)
                {
                    return Ok(edge_id);
                }
            }
        }

        let mut new = NewEdge::new(source, target, edge_type)
            .with_provenance(Provenance {
                source_system: Some(source_system.to_string()),
                inference_method: Some("asserted".to_string()),
                confidence: 1.0,
            })
            .with_properties(properties);
        if edge_type.is_symmetric() {
            new = new.bidirectional();
        }
        let id = self.create_edge_locked(&mut state, tenant, new)?;
        self.audit.record(tenant, AuditAction::EdgeCreated { edge: id });
        Ok(id)
    }

    /// Soft-delete a node, cascading deactivation to every active edge
    /// touching it. Returns the number of edges deactivated.
    pub fn deactivate_node(&self, tenant: TenantId, node: NodeId) -> OmniResult<usize> {
        let mut state = self.state.write().expect("graph store lock poisoned");
        let idx = self.resolve_active(&state, tenant, node)?;

        let incident: Vec<EdgeId> = state
            .topology
            .edges_directed(idx, PDirection::Outgoing)
            .chain(state.topology.edges_directed(idx, PDirection::Incoming))
            .map(|e| *e.weight())
            .collect();

        let now = now_secs();
        let mut cascaded = 0;
        for edge_id in incident {
            let edge = state.edges.get_mut(&edge_id).expect("topology out of sync");
            if edge.is_active {
                edge.is_active = false;
                edge.updated_at = now;
                cascaded += 1;
                self.persist_edge(state.edges.get(&edge_id).expect("just updated"))?;
            }
        }

        let record = state.nodes.get_mut(&node).expect("resolved above");
        record.is_active = false;
        record.updated_at = now;
        if let (Some(ext), Some(src)) = (record.external_id.clone(), record.source_system.clone()) {
            state.external_index.remove(&(tenant, ext, src));
        }
        self.persist_node(state.nodes.get(&node).expect("just updated"))?;

        tracing::debug!(%tenant, %node, cascaded, "node deactivated");
        self.audit.record(
            tenant,
            AuditAction::NodeDeactivated {
                node,
                cascaded_edges: cascaded,
            },
        );
        Ok(cascaded)
    }

    /// Soft-delete an edge.
    pub fn deactivate_edge(&self, tenant: TenantId, edge: EdgeId) -> OmniResult<()> {
        let mut state = self.state.write().expect("graph store lock poisoned");
        let record = state
            .edges
            .get_mut(&edge)
            .filter(|e| e.tenant == tenant && e.is_active)
            .ok_or(GraphError::UnknownEdge { tenant, edge })?;
        record.is_active = false;
        record.updated_at = now_secs();
        self.persist_edge(state.edges.get(&edge).expect("just updated"))?;
        self.audit.record(tenant, AuditAction::EdgeDeactivated { edge });
        Ok(())
    }

    /// Hard-delete a node, cascading hard deletion of incident edges so no
    /// edge is left referencing a missing endpoint. Returns the number of
    /// edges removed.
    pub fn remove_node(&self, tenant: TenantId, node: NodeId) -> OmniResult<usize> {
        let mut state = self.state.write().expect("graph store lock poisoned");
        let idx = *state
            .node_idx
            .get(&node)
            .filter(|_| state.nodes.get(&node).is_some_and(|n| n.tenant == tenant))
            .ok_or(GraphError::UnknownNode { tenant, node })?;

        let incident: Vec<EdgeId> = state
            .topology
            .edges_directed(idx, PDirection::Outgoing)
            .chain(state.topology.edges_directed(idx, PDirection::Incoming))
            .map(|e| *e.weight())
            .collect();

        for edge_id in &incident {
            state.edges.remove(edge_id);
            if let Some(d) = &self.durable {
                d.remove_record(EDGES, edge_id.get())?;
            }
        }

        state.topology.remove_node(idx);
        state.node_idx.remove(&node);
        let record = state.nodes.remove(&node).expect("resolved above");
        if let (Some(ext), Some(src)) = (record.external_id, record.source_system) {
            state.external_index.remove(&(tenant, ext, src));
        }
        if let Some(d) = &self.durable {
            d.remove_record(NODES, node.get())?;
        }

        tracing::debug!(%tenant, %node, cascaded = incident.len(), "node removed");
        self.audit.record(
            tenant,
            AuditAction::NodeRemoved {
                node,
                cascaded_edges: incident.len(),
            },
        );
        Ok(incident.len())
    }

    /// Merge `patch` into a node's property map. Keys absent from the patch
    /// are kept.
    pub fn update_node_properties(
        &self,
        tenant: TenantId,
        node: NodeId,
        patch: &Properties,
    ) -> OmniResult<()> {
        let mut state = self.state.write().expect("graph store lock poisoned");
        self.resolve_active(&state, tenant, node)?;
        let record = state.nodes.get_mut(&node).expect("resolved above");
        merge_properties(&mut record.properties, patch);
        record.updated_at = now_secs();
        self.persist_node(state.nodes.get(&node).expect("just updated"))?;
        self.audit
            .record(tenant, AuditAction::NodePropertiesUpdated { node });
        Ok(())
    }

    /// Merge `patch` into an edge's property map.
    pub fn update_edge_properties(
        &self,
        tenant: TenantId,
        edge: EdgeId,
        patch: &Properties,
    ) -> OmniResult<()> {
        let mut state = self.state.write().expect("graph store lock poisoned");
        let record = state
            .edges
            .get_mut(&edge)
            .filter(|e| e.tenant == tenant && e.is_active)
            .ok_or(GraphError::UnknownEdge { tenant, edge })?;
        merge_properties(&mut record.properties, patch);
        record.updated_at = now_secs();
        self.persist_edge(state.edges.get(&edge).expect("just updated"))?;
        self.audit
            .record(tenant, AuditAction::EdgePropertiesUpdated { edge });
        Ok(())
    }

    /// Write the precomputed metric block for a node. This is the external
    /// batch job's interface; the engine itself never computes metrics.
    pub fn set_node_metrics(
        &self,
        tenant: TenantId,
        node: NodeId,
        metrics: GraphMetrics,
    ) -> OmniResult<()> {
        let mut state = self.state.write().expect("graph store lock poisoned");
        let record = state
            .nodes
            .get_mut(&node)
            .filter(|n| n.tenant == tenant)
            .ok_or(GraphError::UnknownNode { tenant, node })?;
        record.metrics = metrics;
        record.updated_at = now_secs();
        self.persist_node(state.nodes.get(&node).expect("just updated"))?;
        self.audit.record(tenant, AuditAction::MetricsUpdated { node });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Fetch a node by id, tenant-checked. Inactive nodes are returned.
    pub fn get_node(&self, tenant: TenantId, node: NodeId) -> Option<Node> {
        let state = self.state.read().expect("graph store lock poisoned");
        state
            .nodes
            .get(&node)
            .filter(|n| n.tenant == tenant)
            .cloned()
    }

    /// Fetch an edge by id, tenant-checked. Inactive edges are returned.
    pub fn get_edge(&self, tenant: TenantId, edge: EdgeId) -> Option<Edge> {
        let state = self.state.read().expect("graph store lock poisoned");
        state
            .edges
            .get(&edge)
            .filter(|e| e.tenant == tenant)
            .cloned()
    }

    /// Look a node up by its ingestion identity.
    pub fn find_by_external_id(
        &self,
        tenant: TenantId,
        source_system: &str,
        external_id: &str,
    ) -> Option<NodeId> {
        let state = self.state.read().expect("graph store lock poisoned");
        state
            .external_index
            .get(&(tenant, external_id.to_string(), source_system.to_string()))
            .copied()
    }

    /// Fetch a node only if it is active and valid at `as_of`.
    pub fn visible_node(&self, tenant: TenantId, node: NodeId, as_of: u64) -> Option<Node> {
        self.get_node(tenant, node).filter(|n| n.visible_at(as_of))
    }

    /// All traversable edges incident to `node` in the requested direction,
    /// in ascending `EdgeId` order (the documented stable iteration order).
    ///
    /// Bidirectional edges are traversable against their stored direction, so
    /// they satisfy either requested direction; each edge appears at most
    /// once. Only edges visible at `as_of` are returned; the neighbor node's
    /// own visibility is the caller's concern.
    pub fn adjacent(
        &self,
        tenant: TenantId,
        node: NodeId,
        direction: Direction,
        as_of: u64,
    ) -> Vec<Adjacent> {
        let state = self.state.read().expect("graph store lock poisoned");
        let Some(&idx) = state.node_idx.get(&node) else {
            return Vec::new();
        };
        let want_out = matches!(direction, Direction::Outgoing | Direction::Both);
        let want_in = matches!(direction, Direction::Incoming | Direction::Both);

        let mut hits: BTreeMap<EdgeId, Adjacent> = BTreeMap::new();
        for edge_ref in state.topology.edges_directed(idx, PDirection::Outgoing) {
            let edge_id = *edge_ref.weight();
            let Some(edge) = state.edges.get(&edge_id) else {
                continue;
            };
            if edge.tenant != tenant || !edge.visible_at(as_of) {
                continue;
            }
            if want_out || (want_in && edge.bidirectional) {
                hits.entry(edge_id).or_insert_with(|| Adjacent {
                    edge: edge.clone(),
                    neighbor: edge.target,
                    orientation: Direction::Outgoing,
                });
            }
        }
        for edge_ref in state.topology.edges_directed(idx, PDirection::Incoming) {
            let edge_id = *edge_ref.weight();
            let Some(edge) = state.edges.get(&edge_id) else {
                continue;
            };
            if edge.tenant != tenant || !edge.visible_at(as_of) {
                continue;
            }
            if want_in || (want_out && edge.bidirectional) {
                hits.entry(edge_id).or_insert_with(|| Adjacent {
                    edge: edge.clone(),
                    neighbor: edge.source,
                    orientation: Direction::Incoming,
                });
            }
        }
        hits.into_values().collect()
    }

    /// Consistent clone of the tenant's active subgraph for snapshot capture.
    ///
    /// Empty type filters mean "all". Edges are included only when both
    /// endpoints made it into the captured node set, so the capture is
    /// self-contained.
    pub fn capture(
        &self,
        tenant: TenantId,
        node_types: &[NodeType],
        edge_types: &[EdgeType],
    ) -> (Vec<Node>, Vec<Edge>) {
        let state = self.state.read().expect("graph store lock poisoned");
        let nodes: Vec<Node> = state
            .nodes
            .values()
            .filter(|n| {
                n.tenant == tenant
                    && n.is_active
                    && (node_types.is_empty() || node_types.contains(&n.node_type))
            })
            .cloned()
            .collect();
        let captured: std::collections::HashSet<NodeId> = nodes.iter().map(|n| n.id).collect();
        let edges: Vec<Edge> = state
            .edges
            .values()
            .filter(|e| {
                e.tenant == tenant
                    && e.is_active
                    && (edge_types.is_empty() || edge_types.contains(&e.edge_type))
                    && captured.contains(&e.source)
                    && captured.contains(&e.target)
            })
            .cloned()
            .collect();
        (nodes, edges)
    }

    /// Total number of nodes across tenants (including inactive).
    pub fn node_count(&self) -> usize {
        self.state.read().expect("graph store lock poisoned").nodes.len()
    }

    /// Total number of edges across tenants (including inactive).
    pub fn edge_count(&self) -> usize {
        self.state.read().expect("graph store lock poisoned").edges.len()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn create_node_locked(
        &self,
        state: &mut StoreState,
        tenant: TenantId,
        new: NewNode,
    ) -> OmniResult<NodeId> {
        if let (Some(ext), Some(src)) = (&new.external_id, &new.source_system) {
            let key = (tenant, ext.clone(), src.clone());
            if state.external_index.contains_key(&key) {
                return Err(GraphError::DuplicateExternalId {
                    tenant,
                    external_id: ext.clone(),
                    source_system: src.clone(),
                }
                .into());
            }
        }

        let id = NodeId::new(self.node_ids.next_raw()?.get()).expect("allocator yields nonzero");
        let now = now_secs();
        let node = Node {
            id,
            tenant,
            node_type: new.node_type,
            external_id: new.external_id,
            source_system: new.source_system,
            label: new.label,
            properties: new.properties,
            tags: new.tags,
            categories: new.categories,
            validity: new.validity,
            metrics: GraphMetrics::default(),
            is_active: true,
            confidence: new.confidence,
            created_at: now,
            updated_at: now,
        };
        self.persist_node(&node)?;
        tracing::debug!(%tenant, node = %id, node_type = %node.node_type, "node created");
        index_node(state, node);
        Ok(id)
    }

    fn create_edge_locked(
        &self,
        state: &mut StoreState,
        tenant: TenantId,
        new: NewEdge,
    ) -> OmniResult<EdgeId> {
        if !new.weight.is_finite() || new.weight <= 0.0 {
            return Err(GraphError::InvalidWeight { weight: new.weight }.into());
        }
        if new.source == new.target {
            return Err(GraphError::SelfLoop {
                tenant,
                node: new.source,
            }
            .into());
        }

        for endpoint in [new.source, new.target] {
            let node = state
                .nodes
                .get(&endpoint)
                .ok_or(GraphError::UnknownNode {
                    tenant,
                    node: endpoint,
                })?;
            if node.tenant != tenant {
                return Err(GraphError::CrossTenant {
                    tenant,
                    source_node: new.source,
                    target_node: new.target,
                }
                .into());
            }
            if !node.is_active {
                return Err(GraphError::UnknownNode {
                    tenant,
                    node: endpoint,
                }
                .into());
            }
        }

        let id = EdgeId::new(self.edge_ids.next_raw()?.get()).expect("allocator yields nonzero");
        let now = now_secs();
        let edge = Edge {
            id,
            tenant,
            source: new.source,
            target: new.target,
            edge_type: new.edge_type,
            weight: new.weight,
            bidirectional: new.bidirectional,
            validity: new.validity,
            provenance: new.provenance,
            properties: new.properties,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.persist_edge(&edge)?;
        tracing::debug!(%tenant, edge = %id, edge_type = %edge.edge_type, "edge created");
        index_edge(state, edge);
        Ok(id)
    }

    fn resolve_active(
        &self,
        state: &StoreState,
        tenant: TenantId,
        node: NodeId,
    ) -> GraphResult<NodeIndex> {
        let record = state
            .nodes
            .get(&node)
            .filter(|n| n.tenant == tenant && n.is_active)
            .ok_or(GraphError::UnknownNode { tenant, node })?;
        Ok(*state.node_idx.get(&record.id).expect("node maps out of sync"))
    }

    fn persist_node(&self, node: &Node) -> OmniResult<()> {
        if let Some(d) = &self.durable {
            d.put_record(NODES, node.id.get(), node)?;
        }
        Ok(())
    }

    fn persist_edge(&self, edge: &Edge) -> OmniResult<()> {
        if let Some(d) = &self.durable {
            d.put_record(EDGES, edge.id.get(), edge)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .finish()
    }
}

fn index_node(state: &mut StoreState, node: Node) {
    let idx = state.topology.add_node(node.id);
    state.node_idx.insert(node.id, idx);
    if node.is_active {
        if let (Some(ext), Some(src)) = (&node.external_id, &node.source_system) {
            state
                .external_index
                .insert((node.tenant, ext.clone(), src.clone()), node.id);
        }
    }
    state.nodes.insert(node.id, node);
}

fn index_edge(state: &mut StoreState, edge: Edge) {
    let (Some(&src), Some(&dst)) = (
        state.node_idx.get(&edge.source),
        state.node_idx.get(&edge.target),
    ) else {
        // A dangling edge record can only appear through durable-layer
        // corruption; skip it rather than poison the topology.
        tracing::warn!(edge = %edge.id, "skipping edge with missing endpoint");
        return;
    };
    state.topology.add_edge(src, dst, edge.id);
    state.edges.insert(edge.id, edge);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OmniError;
    use crate::model::ValidityWindow;

    fn store() -> GraphStore {
        GraphStore::new(None, Arc::new(AuditLog::new(None))).unwrap()
    }

    fn tenant(raw: u64) -> TenantId {
        TenantId::new(raw).unwrap()
    }

    fn graph_err(result: OmniResult<impl std::fmt::Debug>) -> GraphError {
        match result {
            Err(OmniError::Graph(e)) => e,
            other => panic!("expected graph error, got {other:?}"),
        }
    }

    #[test]
    fn create_and_get_node() {
        let s = store();
        let t = tenant(1);
        let id = s
            .create_node(t, NewNode::new(NodeType::Brand, "Acme"))
            .unwrap();
        let node = s.get_node(t, id).unwrap();
        assert_eq!(node.label, "Acme");
        assert!(node.is_active);
        // Invisible to another tenant.
        assert!(s.get_node(tenant(2), id).is_none());
    }

    #[test]
    fn duplicate_external_id_rejected() {
        let s = store();
        let t = tenant(1);
        s.create_node(
            t,
            NewNode::new(NodeType::PressRelease, "Launch").with_external_id("press", "pr-1"),
        )
        .unwrap();
        let err = graph_err(s.create_node(
            t,
            NewNode::new(NodeType::PressRelease, "Launch again").with_external_id("press", "pr-1"),
        ));
        assert!(matches!(err, GraphError::DuplicateExternalId { .. }));

        // Same identity under a different tenant is fine.
        s.create_node(
            tenant(2),
            NewNode::new(NodeType::PressRelease, "Launch").with_external_id("press", "pr-1"),
        )
        .unwrap();
    }

    #[test]
    fn concurrent_duplicate_inserts_yield_one_success() {
        let s = Arc::new(store());
        let t = tenant(1);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || {
                    s.create_node(
                        t,
                        NewNode::new(NodeType::PressRelease, format!("attempt {i}"))
                            .with_external_id("press", "pr-race"),
                    )
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        for result in results {
            if let Err(e) = result {
                assert!(matches!(
                    e,
                    OmniError::Graph(GraphError::DuplicateExternalId { .. })
                ));
            }
        }
        assert!(s.find_by_external_id(t, "press", "pr-race").is_some());
    }

    #[test]
    fn self_loop_rejected() {
        let s = store();
        let t = tenant(1);
        let a = s.create_node(t, NewNode::new(NodeType::Topic, "ai")).unwrap();
        let err = graph_err(s.create_edge(t, NewEdge::new(a, a, EdgeType::SimilarTo)));
        assert!(matches!(err, GraphError::SelfLoop { .. }));
    }

    #[test]
    fn cross_tenant_edge_rejected() {
        let s = store();
        let a = s
            .create_node(tenant(1), NewNode::new(NodeType::Brand, "Acme"))
            .unwrap();
        let b = s
            .create_node(tenant(2), NewNode::new(NodeType::Brand, "Rival"))
            .unwrap();
        let err = graph_err(s.create_edge(tenant(1), NewEdge::new(a, b, EdgeType::Mentions)));
        assert!(matches!(err, GraphError::CrossTenant { .. }));
    }

    #[test]
    fn edge_to_unknown_or_inactive_node_rejected() {
        let s = store();
        let t = tenant(1);
        let a = s.create_node(t, NewNode::new(NodeType::Brand, "Acme")).unwrap();
        let ghost = NodeId::new(999).unwrap();
        let err = graph_err(s.create_edge(t, NewEdge::new(a, ghost, EdgeType::Mentions)));
        assert!(matches!(err, GraphError::UnknownNode { .. }));

        let b = s.create_node(t, NewNode::new(NodeType::Brand, "Gone")).unwrap();
        s.deactivate_node(t, b).unwrap();
        let err = graph_err(s.create_edge(t, NewEdge::new(a, b, EdgeType::Mentions)));
        assert!(matches!(err, GraphError::UnknownNode { .. }));
    }

    #[test]
    fn non_positive_weight_rejected() {
        let s = store();
        let t = tenant(1);
        let a = s.create_node(t, NewNode::new(NodeType::Topic, "a")).unwrap();
        let b = s.create_node(t, NewNode::new(NodeType::Topic, "b")).unwrap();
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = graph_err(
                s.create_edge(t, NewEdge::new(a, b, EdgeType::SimilarTo).with_weight(bad)),
            );
            assert!(matches!(err, GraphError::InvalidWeight { .. }));
        }
    }

    #[test]
    fn deactivate_node_cascades_to_edges() {
        let s = store();
        let t = tenant(1);
        let a = s.create_node(t, NewNode::new(NodeType::Article, "a")).unwrap();
        let b = s.create_node(t, NewNode::new(NodeType::Journalist, "b")).unwrap();
        let c = s.create_node(t, NewNode::new(NodeType::Brand, "c")).unwrap();
        let ab = s.create_edge(t, NewEdge::new(a, b, EdgeType::AuthoredBy)).unwrap();
        let cb = s.create_edge(t, NewEdge::new(c, b, EdgeType::Targets)).unwrap();

        let cascaded = s.deactivate_node(t, b).unwrap();
        assert_eq!(cascaded, 2);
        assert!(!s.get_node(t, b).unwrap().is_active);
        assert!(!s.get_edge(t, ab).unwrap().is_active);
        assert!(!s.get_edge(t, cb).unwrap().is_active);

        // Already-inactive node cannot be deactivated again.
        let err = graph_err(s.deactivate_node(t, b));
        assert!(matches!(err, GraphError::UnknownNode { .. }));
    }

    #[test]
    fn remove_node_hard_deletes_incident_edges() {
        let s = store();
        let t = tenant(1);
        let a = s.create_node(t, NewNode::new(NodeType::Article, "a")).unwrap();
        let b = s.create_node(t, NewNode::new(NodeType::Brand, "b")).unwrap();
        let e = s.create_edge(t, NewEdge::new(a, b, EdgeType::Mentions)).unwrap();

        let removed = s.remove_node(t, b).unwrap();
        assert_eq!(removed, 1);
        assert!(s.get_node(t, b).is_none());
        assert!(s.get_edge(t, e).is_none());
        assert_eq!(s.node_count(), 1);
        assert_eq!(s.edge_count(), 0);
    }

    #[test]
    fn update_properties_merges() {
        let s = store();
        let t = tenant(1);
        let mut props = Properties::new();
        props.insert("outlet".into(), serde_json::json!("Daily Wire"));
        let a = s
            .create_node(t, NewNode::new(NodeType::Article, "a").with_properties(props))
            .unwrap();

        let mut patch = Properties::new();
        patch.insert("sentiment".into(), serde_json::json!(0.4));
        s.update_node_properties(t, a, &patch).unwrap();

        let node = s.get_node(t, a).unwrap();
        assert_eq!(node.properties.len(), 2);
        assert_eq!(node.properties["outlet"], serde_json::json!("Daily Wire"));
        assert_eq!(node.properties["sentiment"], serde_json::json!(0.4));
    }

    #[test]
    fn register_node_is_idempotent() {
        let s = store();
        let t = tenant(1);
        let first = s
            .register_node(t, "press", "pr-9", NodeType::PressRelease, "Launch", Properties::new())
            .unwrap();
        let second = s
            .register_node(t, "press", "pr-9", NodeType::PressRelease, "Launch", Properties::new())
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(s.node_count(), 1);
    }

    #[test]
    fn register_edge_is_idempotent_and_symmetric_types_bidirectional() {
        let s = store();
        let t = tenant(1);
        let a = s.create_node(t, NewNode::new(NodeType::Article, "a")).unwrap();
        let b = s.create_node(t, NewNode::new(NodeType::Article, "b")).unwrap();

        let first = s
            .register_edge(t, "similarity", a, b, EdgeType::SimilarTo, Properties::new())
            .unwrap();
        let second = s
            .register_edge(t, "similarity", a, b, EdgeType::SimilarTo, Properties::new())
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(s.edge_count(), 1);
        assert!(s.get_edge(t, first).unwrap().bidirectional);
    }

    #[test]
    fn adjacent_respects_direction_and_bidirectionality() {
        let s = store();
        let t = tenant(1);
        let a = s.create_node(t, NewNode::new(NodeType::Topic, "a")).unwrap();
        let b = s.create_node(t, NewNode::new(NodeType::Topic, "b")).unwrap();
        let c = s.create_node(t, NewNode::new(NodeType::Topic, "c")).unwrap();
        // a -> b directed, c -> a bidirectional.
        s.create_edge(t, NewEdge::new(a, b, EdgeType::Precedes)).unwrap();
        s.create_edge(t, NewEdge::new(c, a, EdgeType::SimilarTo).bidirectional())
            .unwrap();

        let now = now_secs();
        let out: Vec<NodeId> = s
            .adjacent(t, a, Direction::Outgoing, now)
            .iter()
            .map(|adj| adj.neighbor)
            .collect();
        // b via the directed edge, c against the stored direction of the
        // bidirectional edge.
        assert_eq!(out, vec![b, c]);

        let inc: Vec<NodeId> = s
            .adjacent(t, a, Direction::Incoming, now)
            .iter()
            .map(|adj| adj.neighbor)
            .collect();
        assert_eq!(inc, vec![c]);

        let both = s.adjacent(t, a, Direction::Both, now);
        assert_eq!(both.len(), 2);
    }

    #[test]
    fn adjacent_skips_invisible_edges() {
        let s = store();
        let t = tenant(1);
        let a = s.create_node(t, NewNode::new(NodeType::Topic, "a")).unwrap();
        let b = s.create_node(t, NewNode::new(NodeType::Topic, "b")).unwrap();
        let expired = s
            .create_edge(
                t,
                NewEdge::new(a, b, EdgeType::Precedes).with_validity(ValidityWindow::between(0, 10)),
            )
            .unwrap();
        let live = s.create_edge(t, NewEdge::new(a, b, EdgeType::Mentions)).unwrap();
        s.deactivate_edge(t, live).unwrap();

        assert!(s.adjacent(t, a, Direction::Outgoing, 1_000_000).is_empty());
        // Historical as-of sees the expired edge again.
        let hist = s.adjacent(t, a, Direction::Outgoing, 5);
        assert_eq!(hist.len(), 1);
        assert_eq!(hist[0].edge.id, expired);
    }

    #[test]
    fn capture_filters_and_is_self_contained() {
        let s = store();
        let t = tenant(1);
        let a = s.create_node(t, NewNode::new(NodeType::Article, "a")).unwrap();
        let b = s.create_node(t, NewNode::new(NodeType::Brand, "b")).unwrap();
        let j = s.create_node(t, NewNode::new(NodeType::Journalist, "j")).unwrap();
        s.create_edge(t, NewEdge::new(a, b, EdgeType::Mentions)).unwrap();
        s.create_edge(t, NewEdge::new(a, j, EdgeType::AuthoredBy)).unwrap();

        let (nodes, edges) = s.capture(t, &[], &[]);
        assert_eq!(nodes.len(), 3);
        assert_eq!(edges.len(), 2);

        // Filtering out journalists drops the authored_by edge too.
        let (nodes, edges) = s.capture(t, &[NodeType::Article, NodeType::Brand], &[]);
        assert_eq!(nodes.len(), 2);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].edge_type, EdgeType::Mentions);
    }

    #[test]
    fn mutations_append_audit_entries() {
        let audit = Arc::new(AuditLog::new(None));
        let s = GraphStore::new(None, audit.clone()).unwrap();
        let t = tenant(1);
        let a = s.create_node(t, NewNode::new(NodeType::Brand, "a")).unwrap();
        let b = s.create_node(t, NewNode::new(NodeType::Brand, "b")).unwrap();
        s.create_edge(t, NewEdge::new(a, b, EdgeType::Influences)).unwrap();
        s.deactivate_node(t, a).unwrap();
        assert_eq!(audit.len(), 4);
    }
}
