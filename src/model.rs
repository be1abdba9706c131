//! Core data model: ids, node/edge types, and graph records.
//!
//! Every addressable entity from every source domain (press release,
//! journalist, crisis event, strategic report, ...) becomes a [`Node`];
//! relationships between them become typed, weighted [`Edge`]s. Both carry
//! open JSON property bags alongside their typed fields so unknown keys
//! round-trip unchanged.

use std::collections::BTreeMap;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, OmniResult};
use crate::tenant::TenantId;

/// Seconds since the UNIX epoch.
pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        ///
        /// Uses `NonZeroU64` so that `Option<Self>` is the same size as `Self`
        /// (the niche optimization lets the compiler use 0 as the `None`
        /// discriminant).
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[repr(transparent)]
        pub struct $name(NonZeroU64);

        impl $name {
            /// Create an id from a raw `u64`. Returns `None` if `raw` is zero.
            pub fn new(raw: u64) -> Option<Self> {
                NonZeroU64::new(raw).map($name)
            }

            /// Get the underlying `u64` value.
            pub fn get(self) -> u64 {
                self.0.get()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Unique identifier for a graph node.
    NodeId,
    "node"
);
id_type!(
    /// Unique identifier for a graph edge.
    EdgeId,
    "edge"
);
id_type!(
    /// Unique identifier for an embedding row.
    EmbeddingId,
    "embedding"
);
id_type!(
    /// Unique identifier for a snapshot.
    SnapshotId,
    "snapshot"
);

/// Thread-safe monotonic id allocator.
///
/// Produces monotonically increasing raw ids starting from 1.
/// Safe to share across threads via `Arc<IdAllocator>`.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Create a new allocator that starts from id 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Create an allocator that resumes from a given id.
    ///
    /// Used when restoring state from persistent storage.
    pub fn starting_from(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start.max(1)),
        }
    }

    /// Allocate the next raw id.
    ///
    /// Returns an error if the id space is exhausted.
    pub fn next_raw(&self) -> OmniResult<NonZeroU64> {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        NonZeroU64::new(raw).ok_or_else(|| EngineError::IdsExhausted.into())
    }

    /// Bump the allocator so the next id is strictly greater than `seen`.
    pub fn observe(&self, seen: u64) {
        self.next.fetch_max(seen.saturating_add(1), Ordering::Relaxed);
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Type enumerations
// ---------------------------------------------------------------------------

/// Closed enumeration of entity kinds a node may represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    PressRelease,
    Article,
    Journalist,
    MediaOutlet,
    Brand,
    CrisisEvent,
    Campaign,
    StrategicReport,
    Persona,
    Topic,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PressRelease => "press_release",
            Self::Article => "article",
            Self::Journalist => "journalist",
            Self::MediaOutlet => "media_outlet",
            Self::Brand => "brand",
            Self::CrisisEvent => "crisis_event",
            Self::Campaign => "campaign",
            Self::StrategicReport => "strategic_report",
            Self::Persona => "persona",
            Self::Topic => "topic",
        };
        write!(f, "{s}")
    }
}

/// Closed enumeration of relationship kinds an edge may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Mentions,
    AuthoredBy,
    PublishedBy,
    CausedBy,
    Precedes,
    SimilarTo,
    CorrelatesWith,
    RespondsTo,
    Targets,
    Influences,
    SentimentToward,
}

impl EdgeType {
    /// Whether this relationship is inherently symmetric.
    ///
    /// Symmetric relations (`similar_to`, `correlates_with`) default to
    /// bidirectional edges at ingestion so traversal can follow them either
    /// way without a mirrored row.
    pub fn is_symmetric(self) -> bool {
        matches!(self, Self::SimilarTo | Self::CorrelatesWith)
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Mentions => "mentions",
            Self::AuthoredBy => "authored_by",
            Self::PublishedBy => "published_by",
            Self::CausedBy => "caused_by",
            Self::Precedes => "precedes",
            Self::SimilarTo => "similar_to",
            Self::CorrelatesWith => "correlates_with",
            Self::RespondsTo => "responds_to",
            Self::Targets => "targets",
            Self::Influences => "influences",
            Self::SentimentToward => "sentiment_toward",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Shared record parts
// ---------------------------------------------------------------------------

/// Open key/value property bag. `BTreeMap` keeps iteration (and therefore
/// serialization and record hashing) deterministic.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// Merge `patch` into `target`. Keys absent from the patch are kept.
pub fn merge_properties(target: &mut Properties, patch: &Properties) {
    for (key, value) in patch {
        target.insert(key.clone(), value.clone());
    }
}

/// Optional temporal validity window, in epoch seconds.
///
/// `valid_from` is inclusive, `valid_to` exclusive. An unset bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub valid_from: Option<u64>,
    pub valid_to: Option<u64>,
}

impl ValidityWindow {
    /// Create a window spanning `[from, to)`.
    pub fn between(from: u64, to: u64) -> Self {
        Self {
            valid_from: Some(from),
            valid_to: Some(to),
        }
    }

    /// Create a window open-ended after `from`.
    pub fn starting_at(from: u64) -> Self {
        Self {
            valid_from: Some(from),
            valid_to: None,
        }
    }

    /// Whether the window covers the instant `at`.
    pub fn covers(&self, at: u64) -> bool {
        if let Some(from) = self.valid_from {
            if at < from {
                return false;
            }
        }
        if let Some(to) = self.valid_to {
            if at >= to {
                return false;
            }
        }
        true
    }
}

/// Precomputed graph metrics, written by an external batch job.
///
/// The engine stores and exposes these read-only; it never computes them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphMetrics {
    pub degree_centrality: f64,
    pub betweenness_centrality: f64,
    pub closeness_centrality: f64,
    pub pagerank: f64,
    pub cluster_id: Option<String>,
    pub community_id: Option<String>,
}

/// Where a record came from and how it was derived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Originating domain system (e.g. "press_releases", "crisis_events").
    pub source_system: Option<String>,
    /// How the relationship was produced (e.g. "asserted", "nlp_extraction").
    pub inference_method: Option<String>,
    /// Confidence in [0.0, 1.0].
    pub confidence: f32,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A graph node: any addressable entity from any source domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub tenant: TenantId,
    pub node_type: NodeType,
    /// Primary key of the originating domain record; unique together with
    /// `source_system` per tenant when present.
    pub external_id: Option<String>,
    pub source_system: Option<String>,
    /// Human-readable display name.
    pub label: String,
    pub properties: Properties,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub validity: Option<ValidityWindow>,
    /// Written only through `set_node_metrics`; read-only everywhere else.
    pub metrics: GraphMetrics,
    pub is_active: bool,
    pub confidence: f32,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Node {
    /// Whether the node is active and its validity window covers `at`.
    pub fn visible_at(&self, at: u64) -> bool {
        self.is_active && self.validity.map_or(true, |w| w.covers(at))
    }
}

/// Parameters for creating a node. Built with `with_*` setters.
#[derive(Debug, Clone)]
pub struct NewNode {
    pub node_type: NodeType,
    pub label: String,
    pub external_id: Option<String>,
    pub source_system: Option<String>,
    pub properties: Properties,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub validity: Option<ValidityWindow>,
    pub confidence: f32,
}

impl NewNode {
    /// Create node parameters with full confidence and no external identity.
    pub fn new(node_type: NodeType, label: impl Into<String>) -> Self {
        Self {
            node_type,
            label: label.into(),
            external_id: None,
            source_system: None,
            properties: Properties::new(),
            tags: Vec::new(),
            categories: Vec::new(),
            validity: None,
            confidence: 1.0,
        }
    }

    /// Attach the originating domain record's identity.
    pub fn with_external_id(
        mut self,
        source_system: impl Into<String>,
        external_id: impl Into<String>,
    ) -> Self {
        self.source_system = Some(source_system.into());
        self.external_id = Some(external_id.into());
        self
    }

    /// Set the property bag.
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    /// Set the tag set.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set the temporal validity window.
    pub fn with_validity(mut self, validity: ValidityWindow) -> Self {
        self.validity = Some(validity);
        self
    }

    /// Set the confidence score, clamped to [0.0, 1.0].
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// A typed, weighted, optionally bidirectional relationship between two
/// distinct nodes of the same tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub tenant: TenantId,
    pub source: NodeId,
    pub target: NodeId,
    pub edge_type: EdgeType,
    /// Strictly positive; enforced at creation.
    pub weight: f64,
    /// A bidirectional edge is traversable against its stored direction.
    pub bidirectional: bool,
    pub validity: Option<ValidityWindow>,
    pub provenance: Provenance,
    pub properties: Properties,
    pub is_active: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Edge {
    /// Whether the edge is active and its validity window covers `at`.
    pub fn visible_at(&self, at: u64) -> bool {
        self.is_active && self.validity.map_or(true, |w| w.covers(at))
    }

    /// The endpoint opposite `node`, if `node` is an endpoint.
    pub fn opposite(&self, node: NodeId) -> Option<NodeId> {
        if node == self.source {
            Some(self.target)
        } else if node == self.target {
            Some(self.source)
        } else {
            None
        }
    }
}

/// Parameters for creating an edge. Built with `with_*` setters.
#[derive(Debug, Clone)]
pub struct NewEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub edge_type: EdgeType,
    pub weight: f64,
    pub bidirectional: bool,
    pub validity: Option<ValidityWindow>,
    pub provenance: Provenance,
    pub properties: Properties,
}

impl NewEdge {
    /// Create edge parameters with weight 1.0, directed.
    pub fn new(source: NodeId, target: NodeId, edge_type: EdgeType) -> Self {
        Self {
            source,
            target,
            edge_type,
            weight: 1.0,
            bidirectional: false,
            validity: None,
            provenance: Provenance {
                confidence: 1.0,
                ..Provenance::default()
            },
            properties: Properties::new(),
        }
    }

    /// Set the edge weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Mark the edge as traversable in both directions.
    pub fn bidirectional(mut self) -> Self {
        self.bidirectional = true;
        self
    }

    /// Set the temporal validity window.
    pub fn with_validity(mut self, validity: ValidityWindow) -> Self {
        self.validity = Some(validity);
        self
    }

    /// Set the provenance block.
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    /// Set the property bag.
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_niche_optimization() {
        assert_eq!(
            std::mem::size_of::<Option<NodeId>>(),
            std::mem::size_of::<NodeId>()
        );
    }

    #[test]
    fn id_zero_is_none() {
        assert!(NodeId::new(0).is_none());
        assert!(EdgeId::new(0).is_none());
        assert_eq!(NodeId::new(42).unwrap().get(), 42);
    }

    #[test]
    fn id_display() {
        assert_eq!(NodeId::new(3).unwrap().to_string(), "node:3");
        assert_eq!(EdgeId::new(4).unwrap().to_string(), "edge:4");
        assert_eq!(SnapshotId::new(5).unwrap().to_string(), "snapshot:5");
    }

    #[test]
    fn allocator_produces_sequential_ids() {
        let alloc = IdAllocator::new();
        assert_eq!(alloc.next_raw().unwrap().get(), 1);
        assert_eq!(alloc.next_raw().unwrap().get(), 2);
    }

    #[test]
    fn allocator_observe_resumes_past_seen() {
        let alloc = IdAllocator::new();
        alloc.observe(100);
        assert_eq!(alloc.next_raw().unwrap().get(), 101);
        // Observing a smaller id never rewinds.
        alloc.observe(5);
        assert_eq!(alloc.next_raw().unwrap().get(), 102);
    }

    #[test]
    fn validity_window_covers() {
        let w = ValidityWindow::between(100, 200);
        assert!(!w.covers(99));
        assert!(w.covers(100));
        assert!(w.covers(199));
        assert!(!w.covers(200));

        let open = ValidityWindow::starting_at(50);
        assert!(open.covers(u64::MAX));
        assert!(!open.covers(49));

        assert!(ValidityWindow::default().covers(0));
    }

    #[test]
    fn merge_properties_keeps_absent_keys() {
        let mut target = Properties::new();
        target.insert("kept".into(), serde_json::json!(1));
        target.insert("replaced".into(), serde_json::json!("old"));

        let mut patch = Properties::new();
        patch.insert("replaced".into(), serde_json::json!("new"));
        patch.insert("added".into(), serde_json::json!(true));

        merge_properties(&mut target, &patch);
        assert_eq!(target.len(), 3);
        assert_eq!(target["kept"], serde_json::json!(1));
        assert_eq!(target["replaced"], serde_json::json!("new"));
        assert_eq!(target["added"], serde_json::json!(true));
    }

    #[test]
    fn symmetric_edge_types() {
        assert!(EdgeType::SimilarTo.is_symmetric());
        assert!(EdgeType::CorrelatesWith.is_symmetric());
        assert!(!EdgeType::AuthoredBy.is_symmetric());
        assert!(!EdgeType::Mentions.is_symmetric());
    }

    #[test]
    fn type_display_snake_case() {
        assert_eq!(NodeType::PressRelease.to_string(), "press_release");
        assert_eq!(EdgeType::SentimentToward.to_string(), "sentiment_toward");
    }

    #[test]
    fn new_node_builder() {
        let n = NewNode::new(NodeType::Article, "Q3 coverage")
            .with_external_id("articles", "a-77")
            .with_confidence(1.5);
        assert_eq!(n.label, "Q3 coverage");
        assert_eq!(n.external_id.as_deref(), Some("a-77"));
        assert_eq!(n.source_system.as_deref(), Some("articles"));
        assert!((n.confidence - 1.0).abs() < f32::EPSILON); // clamped
    }

    #[test]
    fn edge_opposite() {
        let a = NodeId::new(1).unwrap();
        let b = NodeId::new(2).unwrap();
        let c = NodeId::new(3).unwrap();
        let e = Edge {
            id: EdgeId::new(1).unwrap(),
            tenant: TenantId::new(1).unwrap(),
            source: a,
            target: b,
            edge_type: EdgeType::Mentions,
            weight: 1.0,
            bidirectional: false,
            validity: None,
            provenance: Provenance::default(),
            properties: Properties::new(),
            is_active: true,
            created_at: 0,
            updated_at: 0,
        };
        assert_eq!(e.opposite(a), Some(b));
        assert_eq!(e.opposite(b), Some(a));
        assert_eq!(e.opposite(c), None);
    }
}
