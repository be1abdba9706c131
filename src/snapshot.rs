//! Snapshot Manager: point-in-time capture of a tenant's subgraph, with a
//! diff against the previous completed snapshot.
//!
//! Lifecycle is an explicit state machine:
//!
//! ```text
//! pending -> generating -> complete -> archived
//!                       \-> failed
//! ```
//!
//! Generation runs against a consistent clone of the store's state, so
//! mutations proceed concurrently; long captures are processed in batches
//! with a cancellation check at every batch boundary.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::audit::{AuditAction, AuditLog};
use crate::error::{OmniResult, SnapshotError, StoreError};
use crate::export::GraphExport;
use crate::model::{EdgeId, EdgeType, IdAllocator, NodeId, NodeType, SnapshotId, now_secs};
use crate::store::GraphStore;
use crate::store::durable::{DurableStore, SNAPSHOTS};
use crate::tenant::TenantId;

/// How many records are processed between cancellation checks.
const BATCH_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Pending,
    Generating,
    Complete,
    Failed,
    Archived,
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Archived => "archived",
        };
        write!(f, "{s}")
    }
}

/// Which records a snapshot captures. Empty filters mean "all".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFilter {
    pub node_types: Vec<NodeType>,
    pub edge_types: Vec<EdgeType>,
}

/// Set-based difference against the previous completed snapshot.
///
/// `changed` means the id exists in both captures with a different record
/// hash. Id lists are sorted ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub previous: Option<SnapshotId>,
    pub added_nodes: Vec<NodeId>,
    pub removed_nodes: Vec<NodeId>,
    pub changed_nodes: Vec<NodeId>,
    pub added_edges: Vec<EdgeId>,
    pub removed_edges: Vec<EdgeId>,
    pub changed_edges: Vec<EdgeId>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added_nodes.is_empty()
            && self.removed_nodes.is_empty()
            && self.changed_nodes.is_empty()
            && self.added_edges.is_empty()
            && self.removed_edges.is_empty()
            && self.changed_edges.is_empty()
    }
}

/// One snapshot row, from request through finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub tenant: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub filter: SnapshotFilter,
    pub status: SnapshotStatus,
    pub node_count: usize,
    pub edge_count: usize,
    /// Serialized [`GraphExport`] JSON document; present once complete.
    pub payload: Option<String>,
    pub storage_bytes: u64,
    /// Present once complete, when a previous completed snapshot existed.
    pub diff: Option<SnapshotDiff>,
    /// Failure or cancellation message, retained for inspection.
    pub error: Option<String>,
    pub requested_at: u64,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
}

impl Snapshot {
    /// Decode the stored payload document.
    pub fn export(&self) -> OmniResult<Option<GraphExport>> {
        match &self.payload {
            None => Ok(None),
            Some(json) => serde_json::from_str(json)
                .map(Some)
                .map_err(|e| StoreError::Serialization { message: e.to_string() }.into()),
        }
    }
}

/// Owns the snapshot rows and drives their lifecycle.
pub struct SnapshotManager {
    snapshots: RwLock<BTreeMap<SnapshotId, Snapshot>>,
    /// Cancellation requests, keyed by snapshot, holding the reason.
    cancellations: DashMap<SnapshotId, String>,
    ids: IdAllocator,
    store: Arc<GraphStore>,
    durable: Option<Arc<DurableStore>>,
    audit: Arc<AuditLog>,
}

impl SnapshotManager {
    /// Create a manager, replaying persisted snapshots. Rows a previous
    /// process left generating are finalized as failed; pending rows stay
    /// runnable.
    pub fn new(
        store: Arc<GraphStore>,
        durable: Option<Arc<DurableStore>>,
        audit: Arc<AuditLog>,
    ) -> OmniResult<Self> {
        let mut snapshots = BTreeMap::new();
        let ids = IdAllocator::new();

        if let Some(d) = &durable {
            let rows: Vec<(u64, Snapshot)> = d.load_all(SNAPSHOTS)?;
            for (raw, mut snap) in rows {
                ids.observe(raw);
                if snap.status == SnapshotStatus::Generating {
                    snap.status = SnapshotStatus::Failed;
                    snap.error = Some("interrupted by restart".to_string());
                    snap.finished_at = Some(now_secs());
                    d.put_record(SNAPSHOTS, raw, &snap)?;
                }
                snapshots.insert(snap.id, snap);
            }
        }

        Ok(Self {
            snapshots: RwLock::new(snapshots),
            cancellations: DashMap::new(),
            ids,
            store,
            durable,
            audit,
        })
    }

    /// Register a new snapshot in the pending state.
    pub fn request(
        &self,
        tenant: TenantId,
        name: &str,
        description: Option<&str>,
        filter: SnapshotFilter,
    ) -> OmniResult<SnapshotId> {
        let id = SnapshotId::new(self.ids.next_raw()?.get()).expect("allocator yields nonzero");
        let snap = Snapshot {
            id,
            tenant,
            name: name.to_string(),
            description: description.map(String::from),
            filter,
            status: SnapshotStatus::Pending,
            node_count: 0,
            edge_count: 0,
            payload: None,
            storage_bytes: 0,
            diff: None,
            error: None,
            requested_at: now_secs(),
            started_at: None,
            finished_at: None,
        };
        self.persist(&snap)?;
        self.snapshots
            .write()
            .expect("snapshot lock poisoned")
            .insert(id, snap);
        tracing::info!(%tenant, snapshot = %id, name, "snapshot requested");
        self.audit
            .record(tenant, AuditAction::SnapshotRequested { snapshot: id });
        Ok(id)
    }

    /// Generate a pending snapshot to completion on the calling thread.
    ///
    /// On any failure, including cancellation, the row is finalized as
    /// failed with the message retained, and the error is returned.
    pub fn run(&self, tenant: TenantId, id: SnapshotId) -> OmniResult<()> {
        let filter = self.begin(tenant, id)?;
        match self.generate(id, tenant, &filter) {
            Ok(()) => Ok(()),
            Err(message) => {
                self.finalize_failed(id, tenant, &message)?;
                Err(SnapshotError::GenerationFailed {
                    snapshot: id,
                    message,
                }
                .into())
            }
        }
    }

    /// Generate a pending snapshot on a background thread. Callers poll
    /// [`SnapshotManager::get`] for the outcome.
    pub fn spawn_run(self: &Arc<Self>, tenant: TenantId, id: SnapshotId) -> std::thread::JoinHandle<()> {
        let manager = Arc::clone(self);
        std::thread::spawn(move || {
            if let Err(e) = manager.run(tenant, id) {
                tracing::warn!(snapshot = %id, error = %e, "background snapshot failed");
            }
        })
    }

    /// Ask a generating snapshot to stop. The worker observes the request at
    /// its next batch boundary and finalizes the row as failed with `reason`.
    pub fn cancel(&self, tenant: TenantId, id: SnapshotId, reason: &str) -> OmniResult<()> {
        let snapshots = self.snapshots.read().expect("snapshot lock poisoned");
        let snap = owned_by(snapshots.get(&id), tenant, id)?;
        if snap.status != SnapshotStatus::Generating {
            return Err(SnapshotError::InvalidTransition {
                snapshot: id,
                from: snap.status.to_string(),
                to: "failed (cancelled)".to_string(),
            }
            .into());
        }
        self.cancellations.insert(id, reason.to_string());
        Ok(())
    }

    /// Archive a complete snapshot. One-way; any other starting state is an
    /// invalid transition.
    pub fn archive(&self, tenant: TenantId, id: SnapshotId) -> OmniResult<()> {
        let mut snapshots = self.snapshots.write().expect("snapshot lock poisoned");
        let snap = owned_by_mut(snapshots.get_mut(&id), tenant, id)?;
        if snap.status != SnapshotStatus::Complete {
            return Err(SnapshotError::InvalidTransition {
                snapshot: id,
                from: snap.status.to_string(),
                to: SnapshotStatus::Archived.to_string(),
            }
            .into());
        }
        snap.status = SnapshotStatus::Archived;
        let snap = snap.clone();
        drop(snapshots);
        self.persist(&snap)?;
        tracing::info!(snapshot = %id, "snapshot archived");
        Ok(())
    }

    /// Fetch a snapshot row. Another tenant's snapshot is indistinguishable
    /// from a missing one.
    pub fn get(&self, tenant: TenantId, id: SnapshotId) -> OmniResult<Snapshot> {
        let snapshots = self.snapshots.read().expect("snapshot lock poisoned");
        Ok(owned_by(snapshots.get(&id), tenant, id)?.clone())
    }

    /// All snapshots for a tenant, ordered by request time then id.
    pub fn list(&self, tenant: TenantId) -> Vec<Snapshot> {
        let mut out: Vec<Snapshot> = self
            .snapshots
            .read()
            .expect("snapshot lock poisoned")
            .values()
            .filter(|s| s.tenant == tenant)
            .cloned()
            .collect();
        out.sort_by_key(|s| (s.requested_at, s.id));
        out
    }

    // -----------------------------------------------------------------------
    // Generation internals
    // -----------------------------------------------------------------------

    fn begin(&self, tenant: TenantId, id: SnapshotId) -> OmniResult<SnapshotFilter> {
        let mut snapshots = self.snapshots.write().expect("snapshot lock poisoned");
        let snap = owned_by_mut(snapshots.get_mut(&id), tenant, id)?;
        if snap.status != SnapshotStatus::Pending {
            return Err(SnapshotError::InvalidTransition {
                snapshot: id,
                from: snap.status.to_string(),
                to: SnapshotStatus::Generating.to_string(),
            }
            .into());
        }
        snap.status = SnapshotStatus::Generating;
        snap.started_at = Some(now_secs());
        let filter = snap.filter.clone();
        let snap = snap.clone();
        drop(snapshots);
        self.persist(&snap)?;
        tracing::debug!(snapshot = %id, "snapshot generation started");
        Ok(filter)
    }

    /// The capture itself. Returns the failure message on any error so the
    /// caller can finalize the row.
    fn generate(
        &self,
        id: SnapshotId,
        tenant: TenantId,
        filter: &SnapshotFilter,
    ) -> std::result::Result<(), String> {
        let (nodes, edges) = self
            .store
            .capture(tenant, &filter.node_types, &filter.edge_types);
        let captured_at = now_secs();

        let mut node_hashes: BTreeMap<NodeId, String> = BTreeMap::new();
        for batch in nodes.chunks(BATCH_SIZE) {
            self.check_cancelled(id)?;
            for node in batch {
                node_hashes.insert(node.id, record_hash(node)?);
            }
        }
        let mut edge_hashes: BTreeMap<EdgeId, String> = BTreeMap::new();
        for batch in edges.chunks(BATCH_SIZE) {
            self.check_cancelled(id)?;
            for edge in batch {
                edge_hashes.insert(edge.id, record_hash(edge)?);
            }
        }
        self.check_cancelled(id)?;

        let diff = self
            .previous_complete(tenant, id)
            .map(|prev| diff_against(&prev, &node_hashes, &edge_hashes))
            .transpose()?;

        let export = GraphExport::new(captured_at, nodes, edges);
        let payload =
            serde_json::to_string(&export).map_err(|e| format!("payload encoding failed: {e}"))?;

        let mut snapshots = self.snapshots.write().expect("snapshot lock poisoned");
        let snap = snapshots.get_mut(&id).ok_or("snapshot row vanished")?;
        snap.status = SnapshotStatus::Complete;
        snap.node_count = export.node_count();
        snap.edge_count = export.edge_count();
        snap.storage_bytes = payload.len() as u64;
        snap.payload = Some(payload);
        snap.diff = diff;
        snap.finished_at = Some(now_secs());
        let snap = snap.clone();
        drop(snapshots);
        self.persist(&snap).map_err(|e| e.to_string())?;

        tracing::info!(
            snapshot = %id,
            nodes = snap.node_count,
            edges = snap.edge_count,
            "snapshot complete"
        );
        self.audit.record(
            tenant,
            AuditAction::SnapshotFinished {
                snapshot: id,
                status: SnapshotStatus::Complete.to_string(),
            },
        );
        Ok(())
    }

    fn finalize_failed(&self, id: SnapshotId, tenant: TenantId, message: &str) -> OmniResult<()> {
        self.cancellations.remove(&id);
        let mut snapshots = self.snapshots.write().expect("snapshot lock poisoned");
        let snap = snapshots
            .get_mut(&id)
            .ok_or(SnapshotError::NotFound { snapshot: id })?;
        snap.status = SnapshotStatus::Failed;
        snap.error = Some(message.to_string());
        snap.finished_at = Some(now_secs());
        let snap = snap.clone();
        drop(snapshots);
        self.persist(&snap)?;
        tracing::warn!(snapshot = %id, message, "snapshot failed");
        self.audit.record(
            tenant,
            AuditAction::SnapshotFinished {
                snapshot: id,
                status: SnapshotStatus::Failed.to_string(),
            },
        );
        Ok(())
    }

    fn check_cancelled(&self, id: SnapshotId) -> std::result::Result<(), String> {
        match self.cancellations.get(&id) {
            Some(reason) => Err(format!("cancelled: {}", reason.value())),
            None => Ok(()),
        }
    }

    /// The tenant's most recent complete (or archived) snapshot other than
    /// `current`, as the diff baseline.
    fn previous_complete(&self, tenant: TenantId, current: SnapshotId) -> Option<Snapshot> {
        self.snapshots
            .read()
            .expect("snapshot lock poisoned")
            .values()
            .filter(|s| {
                s.tenant == tenant
                    && s.id != current
                    && matches!(
                        s.status,
                        SnapshotStatus::Complete | SnapshotStatus::Archived
                    )
            })
            .max_by_key(|s| (s.finished_at, s.id))
            .cloned()
    }

    fn persist(&self, snap: &Snapshot) -> OmniResult<()> {
        if let Some(d) = &self.durable {
            d.put_record(SNAPSHOTS, snap.id.get(), snap)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.snapshots.read().expect("snapshot lock poisoned").len();
        f.debug_struct("SnapshotManager")
            .field("snapshots", &count)
            .finish()
    }
}

// Tenant scoping at the row-lookup seam: another tenant's snapshot is
// reported as missing, never as present-but-forbidden.
fn owned_by<'a>(
    snap: Option<&'a Snapshot>,
    tenant: TenantId,
    id: SnapshotId,
) -> OmniResult<&'a Snapshot> {
    match snap {
        Some(s) if s.tenant == tenant => Ok(s),
        _ => Err(SnapshotError::NotFound { snapshot: id }.into()),
    }
}

fn owned_by_mut<'a>(
    snap: Option<&'a mut Snapshot>,
    tenant: TenantId,
    id: SnapshotId,
) -> OmniResult<&'a mut Snapshot> {
    match snap {
        Some(s) if s.tenant == tenant => Ok(s),
        _ => Err(SnapshotError::NotFound { snapshot: id }.into()),
    }
}

/// SHA-256 hex of a record's bincode encoding, the identity used by diffs.
fn record_hash<T: Serialize>(record: &T) -> std::result::Result<String, String> {
    let bytes = bincode::serialize(record).map_err(|e| format!("record hashing failed: {e}"))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

fn diff_against(
    prev: &Snapshot,
    node_hashes: &BTreeMap<NodeId, String>,
    edge_hashes: &BTreeMap<EdgeId, String>,
) -> std::result::Result<SnapshotDiff, String> {
    let prev_export: GraphExport = match &prev.payload {
        Some(json) => {
            serde_json::from_str(json).map_err(|e| format!("previous payload unreadable: {e}"))?
        }
        None => return Err("previous snapshot has no payload".to_string()),
    };

    let mut prev_nodes: BTreeMap<NodeId, String> = BTreeMap::new();
    for node in &prev_export.nodes {
        prev_nodes.insert(node.id, record_hash(node)?);
    }
    let mut prev_edges: BTreeMap<EdgeId, String> = BTreeMap::new();
    for edge in &prev_export.edges {
        prev_edges.insert(edge.id, record_hash(edge)?);
    }

    let (added_nodes, removed_nodes, changed_nodes) = diff_sets(node_hashes, &prev_nodes);
    let (added_edges, removed_edges, changed_edges) = diff_sets(edge_hashes, &prev_edges);

    Ok(SnapshotDiff {
        previous: Some(prev.id),
        added_nodes,
        removed_nodes,
        changed_nodes,
        added_edges,
        removed_edges,
        changed_edges,
    })
}

fn diff_sets<K: Ord + Copy>(
    current: &BTreeMap<K, String>,
    previous: &BTreeMap<K, String>,
) -> (Vec<K>, Vec<K>, Vec<K>) {
    let cur_ids: BTreeSet<K> = current.keys().copied().collect();
    let prev_ids: BTreeSet<K> = previous.keys().copied().collect();
    let added = cur_ids.difference(&prev_ids).copied().collect();
    let removed = prev_ids.difference(&cur_ids).copied().collect();
    let changed = cur_ids
        .intersection(&prev_ids)
        .copied()
        .filter(|id| current[id] != previous[id])
        .collect();
    (added, removed, changed)
}
