//! Embedding Index: per-node and per-edge vectors keyed by provider.
//!
//! The engine never generates vectors; callers bring them from whatever model
//! produced them. Each `(tenant, owner, provider)` slot has at most one
//! current row, tracked through a content hash of the text the vector was
//! computed from: re-upserting unchanged context is a no-op, changed context
//! retires the old row and inserts a new current one. History rows are kept
//! for lineage but never searched.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::audit::{AuditAction, AuditLog};
use crate::error::{EmbeddingError, OmniResult};
use crate::model::{EdgeId, EmbeddingId, IdAllocator, NodeId, now_secs};
use crate::store::durable::{DurableStore, EMBEDDINGS};
use crate::tenant::TenantId;

/// What a vector describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EmbeddingOwner {
    Node(NodeId),
    Edge(EdgeId),
}

impl EmbeddingOwner {
    pub fn kind(self) -> OwnerKind {
        match self {
            Self::Node(_) => OwnerKind::Node,
            Self::Edge(_) => OwnerKind::Edge,
        }
    }
}

impl std::fmt::Display for EmbeddingOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node(id) => write!(f, "{id}"),
            Self::Edge(id) => write!(f, "{id}"),
        }
    }
}

/// Owner-kind filter for similarity search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnerKind {
    Node,
    Edge,
}

/// One stored vector row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub id: EmbeddingId,
    pub tenant: TenantId,
    pub owner: EmbeddingOwner,
    /// Which model produced the vector (e.g. "openai:text-embedding-3-small").
    pub provider: String,
    pub vector: Vec<f32>,
    pub dimension: usize,
    /// SHA-256 hex of the context text the vector was computed from.
    pub context_hash: String,
    pub is_current: bool,
    /// Epoch seconds after which the row is excluded from search.
    pub expires_at: Option<u64>,
    pub created_at: u64,
}

impl Embedding {
    fn searchable_at(&self, at: u64) -> bool {
        self.is_current && self.expires_at.map_or(true, |t| at < t)
    }
}

/// One similarity search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityHit {
    pub embedding: EmbeddingId,
    pub owner: EmbeddingOwner,
    /// Cosine similarity in [-1.0, 1.0].
    pub score: f32,
}

/// SHA-256 hex digest of an embedding's context text.
pub fn context_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

type CurrentKey = (TenantId, EmbeddingOwner, String);

/// The index itself: all rows behind one lock, with a lock-free side index
/// from `(tenant, owner, provider)` to the current row and a per-provider
/// dimension registry fixed by first use.
pub struct EmbeddingIndex {
    rows: RwLock<BTreeMap<EmbeddingId, Embedding>>,
    current: DashMap<CurrentKey, EmbeddingId>,
    dimensions: DashMap<String, usize>,
    ids: IdAllocator,
    durable: Option<Arc<DurableStore>>,
    audit: Arc<AuditLog>,
}

impl EmbeddingIndex {
    /// Create an index, replaying any persisted rows.
    pub fn new(durable: Option<Arc<DurableStore>>, audit: Arc<AuditLog>) -> OmniResult<Self> {
        let mut rows = BTreeMap::new();
        let current = DashMap::new();
        let dimensions = DashMap::new();
        let ids = IdAllocator::new();

        if let Some(d) = &durable {
            let persisted: Vec<(u64, Embedding)> = d.load_all(EMBEDDINGS)?;
            for (raw, row) in persisted {
                ids.observe(raw);
                dimensions.entry(row.provider.clone()).or_insert(row.dimension);
                if row.is_current {
                    current.insert(
                        (row.tenant, row.owner, row.provider.clone()),
                        row.id,
                    );
                }
                rows.insert(row.id, row);
            }
            tracing::info!(rows = rows.len(), "embedding index replayed from durable layer");
        }

        Ok(Self {
            rows: RwLock::new(rows),
            current,
            dimensions,
            ids,
            durable,
            audit,
        })
    }

    /// Insert or refresh the current vector for an owner/provider slot.
    ///
    /// If the context hash matches the existing current row this is a no-op
    /// returning the existing id; nothing is written and nothing is audited.
    /// Otherwise the old row (if any) is retired and a new current row
    /// inserted. The first upsert for a provider fixes its dimension.
    pub fn upsert(
        &self,
        tenant: TenantId,
        owner: EmbeddingOwner,
        provider: &str,
        vector: Vec<f32>,
        context_text: &str,
        expires_at: Option<u64>,
    ) -> OmniResult<EmbeddingId> {
        if vector.is_empty() {
            return Err(EmbeddingError::EmptyVector {
                provider: provider.to_string(),
            }
            .into());
        }
        self.check_dimension(provider, vector.len())?;

        let hash = context_hash(context_text);
        let key: CurrentKey = (tenant, owner, provider.to_string());
        let mut rows = self.rows.write().expect("embedding lock poisoned");

        if let Some(existing_id) = self.current.get(&key).map(|r| *r.value()) {
            let existing = rows.get(&existing_id).expect("current index out of sync");
            if existing.context_hash == hash {
                return Ok(existing_id);
            }
            let retired = rows.get_mut(&existing_id).expect("checked above");
            retired.is_current = false;
            self.persist(rows.get(&existing_id).expect("just updated"))?;
        }

        let id = EmbeddingId::new(self.ids.next_raw()?.get()).expect("allocator yields nonzero");
        let dimension = vector.len();
        let row = Embedding {
            id,
            tenant,
            owner,
            provider: provider.to_string(),
            vector,
            dimension,
            context_hash: hash,
            is_current: true,
            expires_at,
            created_at: now_secs(),
        };
        self.persist(&row)?;
        tracing::debug!(%tenant, owner = %owner, provider, "embedding upserted");
        rows.insert(id, row);
        self.current.insert(key, id);
        drop(rows);

        self.audit
            .record(tenant, AuditAction::EmbeddingUpserted { embedding: id });
        Ok(id)
    }

    /// Top-k cosine-similarity search over current, non-expired rows.
    ///
    /// A provider no row has ever used yields an empty result. Results are
    /// ordered by score descending, ties by ascending `EmbeddingId`.
    pub fn nearest_neighbors(
        &self,
        tenant: TenantId,
        query: &[f32],
        provider: &str,
        owner_kind: Option<OwnerKind>,
        top_k: usize,
    ) -> OmniResult<Vec<SimilarityHit>> {
        let Some(expected) = self.dimensions.get(provider).map(|d| *d.value()) else {
            return Ok(Vec::new());
        };
        if query.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                provider: provider.to_string(),
                expected,
                actual: query.len(),
            }
            .into());
        }

        let at = now_secs();
        let candidates: Vec<Embedding> = {
            let rows = self.rows.read().expect("embedding lock poisoned");
            rows.values()
                .filter(|r| {
                    r.tenant == tenant
                        && r.provider == provider
                        && r.searchable_at(at)
                        && owner_kind.is_none_or(|k| r.owner.kind() == k)
                })
                .cloned()
                .collect()
        };

        let mut hits: Vec<SimilarityHit> = candidates
            .par_iter()
            .map(|row| SimilarityHit {
                embedding: row.id,
                owner: row.owner,
                score: cosine_similarity(query, &row.vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.embedding.cmp(&b.embedding))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    /// The current row for an owner/provider slot, if any.
    pub fn current(
        &self,
        tenant: TenantId,
        owner: EmbeddingOwner,
        provider: &str,
    ) -> Option<Embedding> {
        let id = *self
            .current
            .get(&(tenant, owner, provider.to_string()))?
            .value();
        self.rows
            .read()
            .expect("embedding lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Total stored rows, current and retired.
    pub fn len(&self) -> usize {
        self.rows.read().expect("embedding lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_dimension(&self, provider: &str, actual: usize) -> OmniResult<()> {
        let expected = *self
            .dimensions
            .entry(provider.to_string())
            .or_insert(actual)
            .value();
        if expected != actual {
            return Err(EmbeddingError::DimensionMismatch {
                provider: provider.to_string(),
                expected,
                actual,
            }
            .into());
        }
        Ok(())
    }

    fn persist(&self, row: &Embedding) -> OmniResult<()> {
        if let Some(d) = &self.durable {
            d.put_record(EMBEDDINGS, row.id.get(), row)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for EmbeddingIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingIndex")
            .field("rows", &self.len())
            .field("providers", &self.dimensions.len())
            .finish()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 { 0.0 } else { dot / denom }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OmniError;

    fn index() -> EmbeddingIndex {
        EmbeddingIndex::new(None, Arc::new(AuditLog::new(None))).unwrap()
    }

    fn tenant(raw: u64) -> TenantId {
        TenantId::new(raw).unwrap()
    }

    fn node_owner(raw: u64) -> EmbeddingOwner {
        EmbeddingOwner::Node(NodeId::new(raw).unwrap())
    }

    #[test]
    fn upsert_same_context_is_noop() {
        let idx = index();
        let t = tenant(1);
        let first = idx
            .upsert(t, node_owner(1), "openai", vec![1.0, 0.0], "press release text", None)
            .unwrap();
        let second = idx
            .upsert(t, node_owner(1), "openai", vec![0.9, 0.1], "press release text", None)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(idx.len(), 1);
        // The no-op kept the original vector.
        assert_eq!(idx.current(t, node_owner(1), "openai").unwrap().vector, vec![1.0, 0.0]);
    }

    #[test]
    fn upsert_changed_context_retires_old_row() {
        let idx = index();
        let t = tenant(1);
        let old = idx
            .upsert(t, node_owner(1), "openai", vec![1.0, 0.0], "v1", None)
            .unwrap();
        let new = idx
            .upsert(t, node_owner(1), "openai", vec![0.0, 1.0], "v2", None)
            .unwrap();
        assert_ne!(old, new);
        assert_eq!(idx.len(), 2);
        let current = idx.current(t, node_owner(1), "openai").unwrap();
        assert_eq!(current.id, new);
        assert!(current.is_current);
    }

    #[test]
    fn provider_dimension_fixed_by_first_upsert() {
        let idx = index();
        let t = tenant(1);
        idx.upsert(t, node_owner(1), "openai", vec![1.0, 0.0, 0.0], "a", None)
            .unwrap();
        let err = idx
            .upsert(t, node_owner(2), "openai", vec![1.0, 0.0], "b", None)
            .unwrap_err();
        assert!(matches!(
            err,
            OmniError::Embedding(EmbeddingError::DimensionMismatch {
                expected: 3,
                actual: 2,
                ..
            })
        ));
        // A different provider may use a different dimension.
        idx.upsert(t, node_owner(2), "cohere", vec![1.0, 0.0], "b", None)
            .unwrap();
    }

    #[test]
    fn empty_vector_rejected() {
        let idx = index();
        let err = idx
            .upsert(tenant(1), node_owner(1), "openai", vec![], "text", None)
            .unwrap_err();
        assert!(matches!(
            err,
            OmniError::Embedding(EmbeddingError::EmptyVector { .. })
        ));
    }

    #[test]
    fn nearest_neighbors_ranked_by_cosine() {
        let idx = index();
        let t = tenant(1);
        idx.upsert(t, node_owner(1), "openai", vec![1.0, 0.0], "aligned", None)
            .unwrap();
        idx.upsert(t, node_owner(2), "openai", vec![0.0, 1.0], "orthogonal", None)
            .unwrap();
        idx.upsert(t, node_owner(3), "openai", vec![0.7, 0.7], "diagonal", None)
            .unwrap();

        let hits = idx
            .nearest_neighbors(t, &[1.0, 0.0], "openai", None, 2)
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].owner, node_owner(1));
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].owner, node_owner(3));
    }

    #[test]
    fn nearest_neighbors_skips_retired_and_expired_rows() {
        let idx = index();
        let t = tenant(1);
        idx.upsert(t, node_owner(1), "openai", vec![1.0, 0.0], "v1", None)
            .unwrap();
        idx.upsert(t, node_owner(1), "openai", vec![0.0, 1.0], "v2", None)
            .unwrap();
        idx.upsert(t, node_owner(2), "openai", vec![1.0, 0.0], "stale", Some(1))
            .unwrap();

        let hits = idx
            .nearest_neighbors(t, &[1.0, 0.0], "openai", None, 10)
            .unwrap();
        // Only node 1's current row survives the filters.
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].owner, node_owner(1));
    }

    #[test]
    fn nearest_neighbors_owner_kind_filter() {
        let idx = index();
        let t = tenant(1);
        idx.upsert(t, node_owner(1), "openai", vec![1.0, 0.0], "n", None)
            .unwrap();
        idx.upsert(
            t,
            EmbeddingOwner::Edge(EdgeId::new(1).unwrap()),
            "openai",
            vec![1.0, 0.0],
            "e",
            None,
        )
        .unwrap();

        let nodes = idx
            .nearest_neighbors(t, &[1.0, 0.0], "openai", Some(OwnerKind::Node), 10)
            .unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(matches!(nodes[0].owner, EmbeddingOwner::Node(_)));
    }

    #[test]
    fn nearest_neighbors_isolated_per_tenant() {
        let idx = index();
        idx.upsert(tenant(1), node_owner(1), "openai", vec![1.0, 0.0], "a", None)
            .unwrap();
        let hits = idx
            .nearest_neighbors(tenant(2), &[1.0, 0.0], "openai", None, 10)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn unknown_provider_query_is_empty() {
        let idx = index();
        let hits = idx
            .nearest_neighbors(tenant(1), &[1.0], "never-seen", None, 5)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn query_dimension_mismatch_rejected() {
        let idx = index();
        let t = tenant(1);
        idx.upsert(t, node_owner(1), "openai", vec![1.0, 0.0, 0.0], "a", None)
            .unwrap();
        let err = idx
            .nearest_neighbors(t, &[1.0, 0.0], "openai", None, 5)
            .unwrap_err();
        assert!(matches!(
            err,
            OmniError::Embedding(EmbeddingError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn context_hash_is_stable_hex() {
        let h = context_hash("hello");
        assert_eq!(h.len(), 64);
        assert_eq!(h, context_hash("hello"));
        assert_ne!(h, context_hash("hello!"));
    }
}
