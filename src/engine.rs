//! Engine facade: top-level API for the omnigraph system.
//!
//! The `Engine` owns all subsystems and provides the public interface for
//! ingesting records, querying the graph, and managing snapshots. Every
//! query runs through a wrapper that appends an audit entry carrying the
//! result count and wall-clock execution time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::audit::{AuditAction, AuditEntry, AuditLog, QueryKind};
use crate::embedding::{Embedding, EmbeddingIndex, EmbeddingOwner, OwnerKind, SimilarityHit};
use crate::error::{EngineError, OmniResult};
use crate::model::{
    EdgeId, EdgeType, EmbeddingId, GraphMetrics, NewEdge, NewNode, Node, NodeId, NodeType,
    Properties, SnapshotId,
};
use crate::snapshot::{Snapshot, SnapshotFilter, SnapshotManager};
use crate::store::GraphStore;
use crate::store::durable::DurableStore;
use crate::tenant::TenantId;
use crate::traverse::{
    Direction, NeighborHit, PathResult, Traversal, TraversalConfig, TraversalHit,
};

/// Configuration for the omnigraph engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Data directory for persistence. `None` for memory-only mode.
    pub data_dir: Option<PathBuf>,
    /// Traversal depth bound applied when a caller passes no explicit one.
    pub default_max_depth: usize,
    /// Result-count bound for neighbor and traversal queries.
    pub default_limit: usize,
    /// Result-count bound for similarity search.
    pub default_top_k: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            default_max_depth: 3,
            default_limit: 100,
            default_top_k: 10,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> OmniResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| EngineError::InvalidConfig {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        let config: Self = toml::from_str(&text).map_err(|e| EngineError::InvalidConfig {
            message: format!("failed to parse {}: {e}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> OmniResult<()> {
        if self.default_max_depth == 0 {
            return Err(EngineError::InvalidConfig {
                message: "default_max_depth must be > 0".into(),
            }
            .into());
        }
        if self.default_limit == 0 {
            return Err(EngineError::InvalidConfig {
                message: "default_limit must be > 0".into(),
            }
            .into());
        }
        if self.default_top_k == 0 {
            return Err(EngineError::InvalidConfig {
                message: "default_top_k must be > 0".into(),
            }
            .into());
        }
        Ok(())
    }
}

/// The omnigraph knowledge-graph engine.
///
/// Owns all subsystems: graph store, traversal engine, embedding index,
/// snapshot manager, and audit log.
pub struct Engine {
    config: EngineConfig,
    store: Arc<GraphStore>,
    traversal: Traversal,
    embeddings: Arc<EmbeddingIndex>,
    snapshots: Arc<SnapshotManager>,
    audit: Arc<AuditLog>,
}

impl Engine {
    /// Create a new engine with the given configuration, reopening any
    /// persisted state from the data directory.
    pub fn new(config: EngineConfig) -> OmniResult<Self> {
        config.validate()?;

        let durable = match &config.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|_| EngineError::DataDir {
                    path: dir.display().to_string(),
                })?;
                Some(Arc::new(DurableStore::open(dir)?))
            }
            None => None,
        };

        let audit = match &durable {
            Some(d) => Arc::new(AuditLog::open(Arc::clone(d))?),
            None => Arc::new(AuditLog::new(None)),
        };
        let store = Arc::new(GraphStore::new(durable.clone(), Arc::clone(&audit))?);
        let traversal = Traversal::new(Arc::clone(&store));
        let embeddings = Arc::new(EmbeddingIndex::new(durable.clone(), Arc::clone(&audit))?);
        let snapshots = Arc::new(SnapshotManager::new(
            Arc::clone(&store),
            durable,
            Arc::clone(&audit),
        )?);

        tracing::info!(
            persistent = config.data_dir.is_some(),
            nodes = store.node_count(),
            edges = store.edge_count(),
            "initializing omnigraph engine"
        );

        Ok(Self {
            config,
            store,
            traversal,
            embeddings,
            snapshots,
            audit,
        })
    }

    // -----------------------------------------------------------------------
    // Ingestion interface
    // -----------------------------------------------------------------------

    /// Idempotent node ingestion keyed by the source record's identity.
    pub fn register_node(
        &self,
        tenant: TenantId,
        source_system: &str,
        source_record_id: &str,
        node_type: NodeType,
        label: &str,
        properties: Properties,
    ) -> OmniResult<NodeId> {
        self.store.register_node(
            tenant,
            source_system,
            source_record_id,
            node_type,
            label,
            properties,
        )
    }

    /// Idempotent edge ingestion keyed by endpoints, type, and source system.
    pub fn register_edge(
        &self,
        tenant: TenantId,
        source_system: &str,
        source: NodeId,
        target: NodeId,
        edge_type: EdgeType,
        properties: Properties,
    ) -> OmniResult<EdgeId> {
        self.store
            .register_edge(tenant, source_system, source, target, edge_type, properties)
    }

    /// Create a node directly, without ingestion identity semantics.
    pub fn create_node(&self, tenant: TenantId, new: NewNode) -> OmniResult<NodeId> {
        self.store.create_node(tenant, new)
    }

    /// Create an edge directly.
    pub fn create_edge(&self, tenant: TenantId, new: NewEdge) -> OmniResult<EdgeId> {
        self.store.create_edge(tenant, new)
    }

    /// Soft-delete a node, cascading to its edges. Returns the cascade count.
    pub fn deactivate_node(&self, tenant: TenantId, node: NodeId) -> OmniResult<usize> {
        self.store.deactivate_node(tenant, node)
    }

    /// Soft-delete an edge.
    pub fn deactivate_edge(&self, tenant: TenantId, edge: EdgeId) -> OmniResult<()> {
        self.store.deactivate_edge(tenant, edge)
    }

    /// Hard-delete a node and its incident edges.
    pub fn remove_node(&self, tenant: TenantId, node: NodeId) -> OmniResult<usize> {
        self.store.remove_node(tenant, node)
    }

    /// Merge a patch into a node's properties.
    pub fn update_node_properties(
        &self,
        tenant: TenantId,
        node: NodeId,
        patch: &Properties,
    ) -> OmniResult<()> {
        self.store.update_node_properties(tenant, node, patch)
    }

    /// Merge a patch into an edge's properties.
    pub fn update_edge_properties(
        &self,
        tenant: TenantId,
        edge: EdgeId,
        patch: &Properties,
    ) -> OmniResult<()> {
        self.store.update_edge_properties(tenant, edge, patch)
    }

    /// Write a node's precomputed metric block.
    pub fn set_node_metrics(
        &self,
        tenant: TenantId,
        node: NodeId,
        metrics: GraphMetrics,
    ) -> OmniResult<()> {
        self.store.set_node_metrics(tenant, node, metrics)
    }

    /// Insert or refresh an embedding for a node or edge.
    pub fn upsert_embedding(
        &self,
        tenant: TenantId,
        owner: EmbeddingOwner,
        provider: &str,
        vector: Vec<f32>,
        context_text: &str,
        expires_at: Option<u64>,
    ) -> OmniResult<EmbeddingId> {
        self.embeddings
            .upsert(tenant, owner, provider, vector, context_text, expires_at)
    }

    // -----------------------------------------------------------------------
    // Query interface (audited)
    // -----------------------------------------------------------------------

    /// Fetch a node by id.
    pub fn get_node(&self, tenant: TenantId, node: NodeId) -> Option<Node> {
        self.store.get_node(tenant, node)
    }

    /// Look a node up by its ingestion identity.
    pub fn find_by_external_id(
        &self,
        tenant: TenantId,
        source_system: &str,
        external_id: &str,
    ) -> Option<NodeId> {
        self.store
            .find_by_external_id(tenant, source_system, external_id)
    }

    /// Direct neighbors, weight-descending. `limit` defaults from config.
    pub fn neighbors(
        &self,
        tenant: TenantId,
        node: NodeId,
        direction: Direction,
        edge_types: &[EdgeType],
        limit: Option<usize>,
    ) -> OmniResult<Vec<NeighborHit>> {
        let limit = limit.unwrap_or(self.config.default_limit);
        let started = Instant::now();
        let hits = self
            .traversal
            .neighbors(tenant, node, direction, edge_types, limit, None)?;
        self.audit_query(tenant, QueryKind::Neighbors, hits.len(), started);
        Ok(hits)
    }

    /// Bounded breadth-first traversal.
    pub fn traverse(
        &self,
        tenant: TenantId,
        start: NodeId,
        config: &TraversalConfig,
    ) -> OmniResult<Vec<TraversalHit>> {
        let started = Instant::now();
        let hits = self.traversal.traverse(tenant, start, config)?;
        self.audit_query(tenant, QueryKind::Traverse, hits.len(), started);
        Ok(hits)
    }

    /// Minimum-weight path within a hop bound. `max_depth` defaults from
    /// config; `as_of` defaults to now.
    pub fn shortest_path(
        &self,
        tenant: TenantId,
        start: NodeId,
        end: NodeId,
        max_depth: Option<usize>,
        as_of: Option<u64>,
    ) -> OmniResult<Option<PathResult>> {
        let max_depth = max_depth.unwrap_or(self.config.default_max_depth);
        let started = Instant::now();
        let result = self
            .traversal
            .shortest_path(tenant, start, end, max_depth, as_of)?;
        let count = usize::from(result.is_some());
        self.audit_query(tenant, QueryKind::ShortestPath, count, started);
        Ok(result)
    }

    /// Top-k similarity search. `top_k` defaults from config.
    pub fn nearest_neighbors(
        &self,
        tenant: TenantId,
        query: &[f32],
        provider: &str,
        owner_kind: Option<OwnerKind>,
        top_k: Option<usize>,
    ) -> OmniResult<Vec<SimilarityHit>> {
        let top_k = top_k.unwrap_or(self.config.default_top_k);
        let started = Instant::now();
        let hits = self
            .embeddings
            .nearest_neighbors(tenant, query, provider, owner_kind, top_k)?;
        self.audit_query(tenant, QueryKind::NearestNeighbors, hits.len(), started);
        Ok(hits)
    }

    /// The current embedding for an owner/provider slot.
    pub fn current_embedding(
        &self,
        tenant: TenantId,
        owner: EmbeddingOwner,
        provider: &str,
    ) -> Option<Embedding> {
        self.embeddings.current(tenant, owner, provider)
    }

    // -----------------------------------------------------------------------
    // Snapshot interface
    // -----------------------------------------------------------------------

    /// Register a snapshot request in the pending state.
    pub fn request_snapshot(
        &self,
        tenant: TenantId,
        name: &str,
        description: Option<&str>,
        filter: SnapshotFilter,
    ) -> OmniResult<SnapshotId> {
        self.snapshots.request(tenant, name, description, filter)
    }

    /// Generate a pending snapshot on the calling thread.
    pub fn run_snapshot(&self, tenant: TenantId, id: SnapshotId) -> OmniResult<()> {
        self.snapshots.run(tenant, id)
    }

    /// Generate a pending snapshot on a background thread.
    pub fn spawn_snapshot(&self, tenant: TenantId, id: SnapshotId) -> std::thread::JoinHandle<()> {
        self.snapshots.spawn_run(tenant, id)
    }

    /// Request cancellation of a generating snapshot.
    pub fn cancel_snapshot(&self, tenant: TenantId, id: SnapshotId, reason: &str) -> OmniResult<()> {
        self.snapshots.cancel(tenant, id, reason)
    }

    /// Archive a complete snapshot.
    pub fn archive_snapshot(&self, tenant: TenantId, id: SnapshotId) -> OmniResult<()> {
        self.snapshots.archive(tenant, id)
    }

    /// Fetch one of the tenant's snapshot rows, audited as a query.
    pub fn get_snapshot(&self, tenant: TenantId, id: SnapshotId) -> OmniResult<Snapshot> {
        let started = Instant::now();
        let snap = self.snapshots.get(tenant, id)?;
        self.audit_query(tenant, QueryKind::GetSnapshot, 1, started);
        Ok(snap)
    }

    /// List a tenant's snapshots by request time, audited as a query.
    pub fn list_snapshots(&self, tenant: TenantId) -> Vec<Snapshot> {
        let started = Instant::now();
        let snaps = self.snapshots.list(tenant);
        self.audit_query(tenant, QueryKind::ListSnapshots, snaps.len(), started);
        snaps
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Audit entries for a tenant, in sequence order.
    pub fn audit_entries(&self, tenant: TenantId) -> Vec<AuditEntry> {
        self.audit.entries(tenant)
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get the graph store handle.
    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// Get the embedding index handle.
    pub fn embeddings(&self) -> &EmbeddingIndex {
        &self.embeddings
    }

    /// Get the snapshot manager handle.
    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    /// Get the audit log handle.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Summary counts across all subsystems.
    pub fn info(&self) -> EngineInfo {
        EngineInfo {
            node_count: self.store.node_count(),
            edge_count: self.store.edge_count(),
            embedding_count: self.embeddings.len(),
            audit_entries: self.audit.len(),
            persistent: self.config.data_dir.is_some(),
        }
    }

    fn audit_query(&self, tenant: TenantId, kind: QueryKind, count: usize, started: Instant) {
        self.audit.record(
            tenant,
            AuditAction::Query {
                kind,
                result_count: count,
                execution_time_ms: started.elapsed().as_millis() as u64,
            },
        );
    }
}

/// Summary information about the engine state.
#[derive(Debug, Clone)]
pub struct EngineInfo {
    pub node_count: usize,
    pub edge_count: usize,
    pub embedding_count: usize,
    pub audit_entries: usize,
    pub persistent: bool,
}

impl std::fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "omnigraph engine info")?;
        writeln!(f, "  nodes:       {}", self.node_count)?;
        writeln!(f, "  edges:       {}", self.edge_count)?;
        writeln!(f, "  embeddings:  {}", self.embedding_count)?;
        writeln!(f, "  audit rows:  {}", self.audit_entries)?;
        writeln!(f, "  persistent:  {}", self.persistent)?;
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("embeddings", &self.embeddings)
            .finish()
    }
}
