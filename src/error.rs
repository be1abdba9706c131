//! Rich diagnostic error types for the omnigraph engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and structured context (tenant, offending
//! ids) so callers can render a precise message without parsing free text.

use miette::Diagnostic;
use thiserror::Error;

use crate::model::{EdgeId, NodeId, SnapshotId};
use crate::tenant::TenantId;

/// Top-level error type for the omnigraph engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum OmniError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// Graph Store / Traversal errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error(
        "duplicate external id for {tenant}: ({external_id}, {source_system}) already registered"
    )]
    #[diagnostic(
        code(omnigraph::graph::duplicate_external_id),
        help(
            "A node with this (external_id, source_system) pair already exists for \
             the tenant. Use `register_node` for idempotent ingestion, or look the \
             existing node up by its external id."
        )
    )]
    DuplicateExternalId {
        tenant: TenantId,
        external_id: String,
        source_system: String,
    },

    #[error("self-loop rejected for {tenant}: edge would connect {node} to itself")]
    #[diagnostic(
        code(omnigraph::graph::self_loop),
        help("Edges must connect two distinct nodes. Check the source and target ids.")
    )]
    SelfLoop { tenant: TenantId, node: NodeId },

    #[error(
        "cross-tenant edge rejected: {source_node} and {target_node} do not both belong to {tenant}"
    )]
    #[diagnostic(
        code(omnigraph::graph::cross_tenant),
        help(
            "Both endpoints of an edge must belong to the same tenant as the edge. \
             Verify that the node ids come from this tenant's graph."
        )
    )]
    CrossTenant {
        tenant: TenantId,
        source_node: NodeId,
        target_node: NodeId,
    },

    #[error("node not found for {tenant}: {node}")]
    #[diagnostic(
        code(omnigraph::graph::unknown_node),
        help(
            "The node does not exist or has been deactivated. Inactive nodes are \
             invisible to mutations and traversal."
        )
    )]
    UnknownNode { tenant: TenantId, node: NodeId },

    #[error("edge not found for {tenant}: {edge}")]
    #[diagnostic(
        code(omnigraph::graph::unknown_edge),
        help("The edge does not exist or has been deactivated.")
    )]
    UnknownEdge { tenant: TenantId, edge: EdgeId },

    #[error("traversal start node not found for {tenant}: {node}")]
    #[diagnostic(
        code(omnigraph::graph::unknown_start_node),
        help(
            "Traversal requires an existing, active start node. Cycles and \
             disconnected regions never error; only an invalid starting point does."
        )
    )]
    UnknownStartNode { tenant: TenantId, node: NodeId },

    #[error("invalid edge weight {weight}: weights must be finite and > 0")]
    #[diagnostic(
        code(omnigraph::graph::invalid_weight),
        help(
            "Shortest-path search relies on strictly positive weights. \
             Use the default weight of 1.0 if the relationship is unweighted."
        )
    )]
    InvalidWeight { weight: f64 },
}

// ---------------------------------------------------------------------------
// Embedding Index errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EmbeddingError {
    #[error("dimension mismatch for provider {provider:?}: expected {expected}, got {actual}")]
    #[diagnostic(
        code(omnigraph::embedding::dim_mismatch),
        help(
            "All vectors for a provider must share the dimensionality fixed by the \
             first upsert. Re-embed with the correct model, or use a different \
             provider key for the new dimensionality."
        )
    )]
    DimensionMismatch {
        provider: String,
        expected: usize,
        actual: usize,
    },

    #[error("empty vector rejected for provider {provider:?}")]
    #[diagnostic(
        code(omnigraph::embedding::empty_vector),
        help("A zero-length vector cannot be indexed or compared.")
    )]
    EmptyVector { provider: String },
}

// ---------------------------------------------------------------------------
// Snapshot Manager errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SnapshotError {
    #[error("snapshot not found: {snapshot}")]
    #[diagnostic(
        code(omnigraph::snapshot::not_found),
        help("The snapshot id does not exist. List snapshots for the tenant to see valid ids.")
    )]
    NotFound { snapshot: SnapshotId },

    #[error("invalid snapshot transition for {snapshot}: {from} -> {to}")]
    #[diagnostic(
        code(omnigraph::snapshot::invalid_transition),
        help(
            "The snapshot lifecycle is pending -> generating -> complete | failed, \
             with complete -> archived as the only further transition."
        )
    )]
    InvalidTransition {
        snapshot: SnapshotId,
        from: String,
        to: String,
    },

    #[error("snapshot generation failed for {snapshot}: {message}")]
    #[diagnostic(
        code(omnigraph::snapshot::generation_failed),
        help(
            "The snapshot row is retained in the failed state with this message for \
             operator inspection. Request a new snapshot after fixing the cause."
        )
    )]
    GenerationFailed { snapshot: SnapshotId, message: String },
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(omnigraph::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(omnigraph::store::redb),
        help(
            "The embedded database encountered a transaction error. \
             This may indicate corruption; try running with a fresh data directory."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(omnigraph::store::serde),
        help(
            "Failed to serialize or deserialize a stored record. This usually means \
             the stored data format has changed between versions."
        )
    )]
    Serialization { message: String },
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(omnigraph::engine::invalid_config),
        help("Check the EngineConfig fields. {message}")
    )]
    InvalidConfig { message: String },

    #[error("data directory error: {path}")]
    #[diagnostic(
        code(omnigraph::engine::data_dir),
        help(
            "The data directory could not be accessed. \
             Ensure the path exists and has read/write permissions."
        )
    )]
    DataDir { path: String },

    #[error("id space exhausted: cannot allocate more than u64::MAX ids")]
    #[diagnostic(
        code(omnigraph::engine::ids_exhausted),
        help(
            "The id space is exhausted. This is extremely unlikely in practice \
             (requires 2^64 allocations); check for allocation loops."
        )
    )]
    IdsExhausted,
}

/// Convenience alias for functions returning omnigraph results.
pub type OmniResult<T> = std::result::Result<T, OmniError>;
