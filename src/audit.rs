//! Append-only audit log.
//!
//! Every Graph Store mutation and every Traversal Engine / Embedding Index
//! query produces exactly one [`AuditEntry`]. The log is a pure observer:
//! it owns nothing, and no update or delete API exists. Retention and rollup
//! are external concerns.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::model::{EdgeId, EmbeddingId, NodeId, SnapshotId, now_secs};
use crate::store::durable::{AUDIT, DurableStore};
use crate::tenant::TenantId;

/// Which read operation a query entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryKind {
    Neighbors,
    Traverse,
    ShortestPath,
    NearestNeighbors,
    GetSnapshot,
    ListSnapshots,
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Neighbors => "neighbors",
            Self::Traverse => "traverse",
            Self::ShortestPath => "shortest_path",
            Self::NearestNeighbors => "nearest_neighbors",
            Self::GetSnapshot => "get_snapshot",
            Self::ListSnapshots => "list_snapshots",
        };
        write!(f, "{s}")
    }
}

/// What happened, with the ids involved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuditAction {
    NodeCreated { node: NodeId },
    EdgeCreated { edge: EdgeId },
    NodeDeactivated { node: NodeId, cascaded_edges: usize },
    EdgeDeactivated { edge: EdgeId },
    NodeRemoved { node: NodeId, cascaded_edges: usize },
    NodePropertiesUpdated { node: NodeId },
    EdgePropertiesUpdated { edge: EdgeId },
    MetricsUpdated { node: NodeId },
    EmbeddingUpserted { embedding: EmbeddingId },
    SnapshotRequested { snapshot: SnapshotId },
    SnapshotFinished { snapshot: SnapshotId, status: String },
    Query {
        kind: QueryKind,
        result_count: usize,
        execution_time_ms: u64,
    },
}

/// One append-only audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic sequence number, unique across tenants.
    pub seq: u64,
    pub tenant: TenantId,
    pub action: AuditAction,
    /// Epoch seconds.
    pub at: u64,
}

/// The append-only sink. Entries live in memory and, when a durable store is
/// attached, are written through keyed by sequence number.
pub struct AuditLog {
    entries: RwLock<Vec<AuditEntry>>,
    seq: AtomicU64,
    durable: Option<std::sync::Arc<DurableStore>>,
}

impl AuditLog {
    /// Create an empty in-memory log.
    pub fn new(durable: Option<std::sync::Arc<DurableStore>>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            seq: AtomicU64::new(1),
            durable,
        }
    }

    /// Reload a log from its durable table.
    pub fn open(durable: std::sync::Arc<DurableStore>) -> crate::error::OmniResult<Self> {
        let rows: Vec<(u64, AuditEntry)> = durable.load_all(AUDIT)?;
        let next = rows.last().map(|(seq, _)| seq + 1).unwrap_or(1);
        let entries = rows.into_iter().map(|(_, e)| e).collect();
        Ok(Self {
            entries: RwLock::new(entries),
            seq: AtomicU64::new(next),
            durable: Some(durable),
        })
    }

    /// Append one entry, returning its sequence number.
    pub fn record(&self, tenant: TenantId, action: AuditAction) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let entry = AuditEntry {
            seq,
            tenant,
            action,
            at: now_secs(),
        };
        if let Some(durable) = &self.durable {
            if let Err(e) = durable.put_record(AUDIT, seq, &entry) {
                tracing::warn!(seq, error = %e, "audit write-through failed");
            }
        }
        self.entries
            .write()
            .expect("audit lock poisoned")
            .push(entry);
        seq
    }

    /// All entries for a tenant, in sequence order.
    pub fn entries(&self, tenant: TenantId) -> Vec<AuditEntry> {
        self.entries
            .read()
            .expect("audit lock poisoned")
            .iter()
            .filter(|e| e.tenant == tenant)
            .cloned()
            .collect()
    }

    /// All entries across tenants, in sequence order.
    pub fn all(&self) -> Vec<AuditEntry> {
        self.entries.read().expect("audit lock poisoned").clone()
    }

    /// Number of entries recorded.
    pub fn len(&self) -> usize {
        self.entries.read().expect("audit lock poisoned").len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(raw: u64) -> TenantId {
        TenantId::new(raw).unwrap()
    }

    #[test]
    fn record_assigns_monotonic_sequence() {
        let log = AuditLog::new(None);
        let a = log.record(
            tenant(1),
            AuditAction::NodeCreated {
                node: NodeId::new(1).unwrap(),
            },
        );
        let b = log.record(
            tenant(1),
            AuditAction::NodeCreated {
                node: NodeId::new(2).unwrap(),
            },
        );
        assert!(b > a);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn entries_are_tenant_scoped() {
        let log = AuditLog::new(None);
        log.record(
            tenant(1),
            AuditAction::NodeCreated {
                node: NodeId::new(1).unwrap(),
            },
        );
        log.record(
            tenant(2),
            AuditAction::NodeCreated {
                node: NodeId::new(2).unwrap(),
            },
        );

        assert_eq!(log.entries(tenant(1)).len(), 1);
        assert_eq!(log.entries(tenant(2)).len(), 1);
        assert_eq!(log.all().len(), 2);
    }

    #[test]
    fn query_entries_carry_cardinality_and_timing() {
        let log = AuditLog::new(None);
        log.record(
            tenant(1),
            AuditAction::Query {
                kind: QueryKind::Traverse,
                result_count: 12,
                execution_time_ms: 3,
            },
        );
        let entries = log.entries(tenant(1));
        assert!(matches!(
            entries[0].action,
            AuditAction::Query {
                kind: QueryKind::Traverse,
                result_count: 12,
                execution_time_ms: 3,
            }
        ));
    }

    #[test]
    fn durable_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let durable = std::sync::Arc::new(DurableStore::open(dir.path()).unwrap());
        {
            let log = AuditLog::new(Some(durable.clone()));
            log.record(
                tenant(1),
                AuditAction::EdgeCreated {
                    edge: EdgeId::new(9).unwrap(),
                },
            );
        }
        let log = AuditLog::open(durable).unwrap();
        assert_eq!(log.len(), 1);
        // Sequence resumes after the last persisted entry.
        let seq = log.record(
            tenant(1),
            AuditAction::EdgeDeactivated {
                edge: EdgeId::new(9).unwrap(),
            },
        );
        assert_eq!(seq, 2);
    }
}
