//! ACID-durable record store backed by redb.
//!
//! One table per record kind (nodes, edges, embeddings, snapshots, audit),
//! keyed by raw id and holding JSON-encoded records. All writes go through
//! transactions; reads use MVCC snapshots.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub const NODES: TableDefinition<u64, &[u8]> = TableDefinition::new("nodes");
pub const EDGES: TableDefinition<u64, &[u8]> = TableDefinition::new("edges");
pub const EMBEDDINGS: TableDefinition<u64, &[u8]> = TableDefinition::new("embeddings");
pub const SNAPSHOTS: TableDefinition<u64, &[u8]> = TableDefinition::new("snapshots");
pub const AUDIT: TableDefinition<u64, &[u8]> = TableDefinition::new("audit");

/// ACID-durable store using redb.
pub struct DurableStore {
    db: Arc<Database>,
}

impl DurableStore {
    /// Open or create a durable store in the given directory.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let db_path = data_dir.join("omnigraph.redb");
        let db = Database::create(&db_path).map_err(|e| StoreError::Redb {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Serialize and store a record with full ACID guarantees.
    pub fn put_record<T: Serialize>(
        &self,
        table: TableDefinition<u64, &[u8]>,
        id: u64,
        record: &T,
    ) -> StoreResult<()> {
        let bytes = encode(record)?;
        let txn = self.db.begin_write().map_err(|e| StoreError::Redb {
            message: format!("begin_write failed: {e}"),
        })?;
        {
            let mut t = txn.open_table(table).map_err(|e| StoreError::Redb {
                message: format!("open_table failed: {e}"),
            })?;
            t.insert(id, bytes.as_slice()).map_err(|e| StoreError::Redb {
                message: format!("insert failed: {e}"),
            })?;
        }
        txn.commit().map_err(|e| StoreError::Redb {
            message: format!("commit failed: {e}"),
        })?;
        Ok(())
    }

    /// Delete a record. Returns whether it existed.
    pub fn remove_record(
        &self,
        table: TableDefinition<u64, &[u8]>,
        id: u64,
    ) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Redb {
            message: format!("begin_write failed: {e}"),
        })?;
        let existed = {
            let mut t = txn.open_table(table).map_err(|e| StoreError::Redb {
                message: format!("open_table failed: {e}"),
            })?;
            t.remove(id)
                .map_err(|e| StoreError::Redb {
                    message: format!("remove failed: {e}"),
                })?
                .is_some()
        };
        txn.commit().map_err(|e| StoreError::Redb {
            message: format!("commit failed: {e}"),
        })?;
        Ok(existed)
    }

    /// Load and decode every record in a table, in ascending id order.
    ///
    /// Returns an empty vec if the table has never been written.
    pub fn load_all<T: DeserializeOwned>(
        &self,
        table: TableDefinition<u64, &[u8]>,
    ) -> StoreResult<Vec<(u64, T)>> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Redb {
            message: format!("begin_read failed: {e}"),
        })?;
        let t = match txn.open_table(table) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Redb {
                    message: format!("open_table failed: {e}"),
                });
            }
        };
        let mut out = Vec::new();
        let iter = t.iter().map_err(|e| StoreError::Redb {
            message: format!("iter failed: {e}"),
        })?;
        for entry in iter {
            let (key, value) = entry.map_err(|e| StoreError::Redb {
                message: format!("scan failed: {e}"),
            })?;
            out.push((key.value(), decode(value.value())?));
        }
        Ok(out)
    }
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore").finish()
    }
}

// Records hold open `serde_json::Value` property bags, which only survive a
// round trip through a self-describing format; bincode cannot decode them.
fn encode<T: Serialize>(record: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| StoreError::Serialization {
        message: format!("failed to encode record: {e}"),
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization {
        message: format!("failed to decode record: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn put_load_remove() {
        let dir = TempDir::new().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();

        store.put_record(NODES, 1, &"alpha".to_string()).unwrap();
        store.put_record(NODES, 2, &"beta".to_string()).unwrap();

        let all: Vec<(u64, String)> = store.load_all(NODES).unwrap();
        assert_eq!(all, vec![(1, "alpha".into()), (2, "beta".into())]);

        assert!(store.remove_record(NODES, 1).unwrap());
        assert!(!store.remove_record(NODES, 1).unwrap());
        let all: Vec<(u64, String)> = store.load_all(NODES).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn load_missing_table_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();
        let all: Vec<(u64, String)> = store.load_all(AUDIT).unwrap();
        assert!(all.is_empty());
    }

    #[test]
    fn overwrite_record() {
        let dir = TempDir::new().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();

        store.put_record(EDGES, 7, &1u32).unwrap();
        store.put_record(EDGES, 7, &2u32).unwrap();
        let all: Vec<(u64, u32)> = store.load_all(EDGES).unwrap();
        assert_eq!(all, vec![(7, 2)]);
    }

    #[test]
    fn persistence_across_reopens() {
        let dir = TempDir::new().unwrap();
        {
            let store = DurableStore::open(dir.path()).unwrap();
            store.put_record(SNAPSHOTS, 3, &"kept".to_string()).unwrap();
        }
        let store = DurableStore::open(dir.path()).unwrap();
        let all: Vec<(u64, String)> = store.load_all(SNAPSHOTS).unwrap();
        assert_eq!(all, vec![(3, "kept".into())]);
    }
}
