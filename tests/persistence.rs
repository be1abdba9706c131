//! Persistence and recovery tests for the omnigraph engine.
//!
//! These tests verify that graph records, embeddings, snapshots, the audit
//! log, and allocator state survive an engine restart (reopen cycle against
//! the same data directory).

use omnigraph::embedding::EmbeddingOwner;
use omnigraph::engine::{Engine, EngineConfig};
use omnigraph::model::{EdgeType, NodeType, Properties};
use omnigraph::snapshot::{SnapshotFilter, SnapshotStatus};
use omnigraph::tenant::TenantId;
use omnigraph::traverse::Direction;

fn persistent_engine(dir: &std::path::Path) -> Engine {
    Engine::new(EngineConfig {
        data_dir: Some(dir.to_path_buf()),
        ..Default::default()
    })
    .unwrap()
}

fn tenant() -> TenantId {
    TenantId::new(1).unwrap()
}

#[test]
fn graph_records_survive_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let t = tenant();

    let (brand, article) = {
        let engine = persistent_engine(dir.path());
        let brand = engine
            .register_node(t, "brands", "b-1", NodeType::Brand, "Acme", Properties::new())
            .unwrap();
        let article = engine
            .register_node(t, "articles", "a-1", NodeType::Article, "Review", Properties::new())
            .unwrap();
        engine
            .register_edge(t, "nlp", article, brand, EdgeType::Mentions, Properties::new())
            .unwrap();
        (brand, article)
    };

    let engine = persistent_engine(dir.path());
    let info = engine.info();
    assert_eq!(info.node_count, 2);
    assert_eq!(info.edge_count, 1);
    assert!(info.persistent);

    // Records, topology, and the external-id index all came back.
    assert_eq!(engine.get_node(t, brand).unwrap().label, "Acme");
    assert_eq!(engine.find_by_external_id(t, "brands", "b-1"), Some(brand));
    let hits = engine
        .neighbors(t, article, Direction::Outgoing, &[], None)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].node.id, brand);
}

#[test]
fn id_allocation_resumes_past_persisted_ids() {
    let dir = tempfile::TempDir::new().unwrap();
    let t = tenant();

    let first = {
        let engine = persistent_engine(dir.path());
        engine
            .register_node(t, "brands", "b-1", NodeType::Brand, "Acme", Properties::new())
            .unwrap()
    };

    let engine = persistent_engine(dir.path());
    let second = engine
        .register_node(t, "brands", "b-2", NodeType::Brand, "Rival", Properties::new())
        .unwrap();
    assert!(second.get() > first.get());
}

#[test]
fn deactivation_state_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let t = tenant();

    let node = {
        let engine = persistent_engine(dir.path());
        let node = engine
            .register_node(t, "brands", "b-1", NodeType::Brand, "Acme", Properties::new())
            .unwrap();
        engine.deactivate_node(t, node).unwrap();
        node
    };

    let engine = persistent_engine(dir.path());
    assert!(!engine.get_node(t, node).unwrap().is_active);
    // The external-id slot is free again after deactivation.
    assert!(engine.find_by_external_id(t, "brands", "b-1").is_none());
}

#[test]
fn embeddings_survive_restart_with_currency() {
    let dir = tempfile::TempDir::new().unwrap();
    let t = tenant();

    let (node, current) = {
        let engine = persistent_engine(dir.path());
        let node = engine
            .register_node(t, "articles", "a-1", NodeType::Article, "Review", Properties::new())
            .unwrap();
        let owner = EmbeddingOwner::Node(node);
        engine
            .upsert_embedding(t, owner, "openai", vec![1.0, 0.0], "v1", None)
            .unwrap();
        let current = engine
            .upsert_embedding(t, owner, "openai", vec![0.0, 1.0], "v2", None)
            .unwrap();
        (node, current)
    };

    let engine = persistent_engine(dir.path());
    let owner = EmbeddingOwner::Node(node);
    assert_eq!(engine.info().embedding_count, 2);
    let row = engine.current_embedding(t, owner, "openai").unwrap();
    assert_eq!(row.id, current);
    assert_eq!(row.vector, vec![0.0, 1.0]);

    // The provider dimension registry came back too.
    let err = engine.nearest_neighbors(t, &[1.0, 0.0, 0.0], "openai", None, None);
    assert!(err.is_err());
}

#[test]
fn snapshots_survive_restart_and_serve_as_diff_baseline() {
    let dir = tempfile::TempDir::new().unwrap();
    let t = tenant();

    let baseline = {
        let engine = persistent_engine(dir.path());
        engine
            .register_node(t, "brands", "b-1", NodeType::Brand, "Acme", Properties::new())
            .unwrap();
        let id = engine
            .request_snapshot(t, "baseline", None, SnapshotFilter::default())
            .unwrap();
        engine.run_snapshot(t, id).unwrap();
        id
    };

    let engine = persistent_engine(dir.path());
    let snap = engine.get_snapshot(t, baseline).unwrap();
    assert_eq!(snap.status, SnapshotStatus::Complete);
    assert_eq!(snap.node_count, 1);
    assert!(snap.export().unwrap().is_some());

    engine
        .register_node(t, "brands", "b-2", NodeType::Brand, "Rival", Properties::new())
        .unwrap();
    let follow_up = engine
        .request_snapshot(t, "after", None, SnapshotFilter::default())
        .unwrap();
    engine.run_snapshot(t, follow_up).unwrap();
    let diff = engine.get_snapshot(t, follow_up).unwrap().diff.unwrap();
    assert_eq!(diff.previous, Some(baseline));
    assert_eq!(diff.added_nodes.len(), 1);
}

#[test]
fn pending_snapshot_stays_runnable_after_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let t = tenant();

    let id = {
        let engine = persistent_engine(dir.path());
        engine
            .register_node(t, "brands", "b-1", NodeType::Brand, "Acme", Properties::new())
            .unwrap();
        engine
            .request_snapshot(t, "requested-before-restart", None, SnapshotFilter::default())
            .unwrap()
    };

    let engine = persistent_engine(dir.path());
    assert_eq!(
        engine.get_snapshot(t, id).unwrap().status,
        SnapshotStatus::Pending
    );
    engine.run_snapshot(t, id).unwrap();
    assert_eq!(
        engine.get_snapshot(t, id).unwrap().status,
        SnapshotStatus::Complete
    );
}

#[test]
fn audit_log_survives_restart_and_keeps_appending() {
    let dir = tempfile::TempDir::new().unwrap();
    let t = tenant();

    let before = {
        let engine = persistent_engine(dir.path());
        engine
            .register_node(t, "brands", "b-1", NodeType::Brand, "Acme", Properties::new())
            .unwrap();
        engine.audit_entries(t).len()
    };
    assert!(before > 0);

    let engine = persistent_engine(dir.path());
    let reloaded = engine.audit_entries(t);
    assert_eq!(reloaded.len(), before);

    engine
        .register_node(t, "brands", "b-2", NodeType::Brand, "Rival", Properties::new())
        .unwrap();
    let after = engine.audit_entries(t);
    assert_eq!(after.len(), before + 1);
    // Sequence numbering continued past the reloaded entries.
    assert!(after.last().unwrap().seq > reloaded.last().unwrap().seq);
}
