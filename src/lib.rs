//! # omnigraph
//!
//! A multi-tenant cross-domain knowledge-graph engine: typed nodes and edges
//! from many source systems, embedding-backed similarity, bounded traversal
//! with cycle avoidance, shortest-path search, and point-in-time snapshots
//! with diffs.
//!
//! ## Architecture
//!
//! - **Graph store** (`store`): petgraph topology + record maps behind one
//!   write lock, written through to redb when persistent
//! - **Traversal** (`traverse`): breadth-first frontier with deterministic
//!   ascending-`EdgeId` expansion
//! - **Embeddings** (`embedding`): per-provider vectors with content-hash
//!   currency tracking and a rayon-parallel cosine scan
//! - **Snapshots** (`snapshot`): background capture with set-based diffs
//!   against the previous completed snapshot
//! - **Audit** (`audit`): append-only record of every mutation and query
//!
//! ## Library usage
//!
//! ```no_run
//! use omnigraph::engine::{Engine, EngineConfig};
//! use omnigraph::model::{NodeType, EdgeType, Properties};
//! use omnigraph::tenant::TenantId;
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! let tenant = TenantId::new(1).unwrap();
//! let brand = engine
//!     .register_node(tenant, "brands", "b-1", NodeType::Brand, "Acme", Properties::new())
//!     .unwrap();
//! let article = engine
//!     .register_node(tenant, "articles", "a-1", NodeType::Article, "Review", Properties::new())
//!     .unwrap();
//! engine
//!     .register_edge(tenant, "nlp", article, brand, EdgeType::Mentions, Properties::new())
//!     .unwrap();
//! ```

pub mod audit;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod export;
pub mod model;
pub mod snapshot;
pub mod store;
pub mod tenant;
pub mod traverse;
