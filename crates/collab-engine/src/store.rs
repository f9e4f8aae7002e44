/// Persistence boundary for document records and operation logs
///
/// The engine only needs key-value get/put per document plus an append-only
/// operation log; durable backends implement this trait. Serialization of
/// writes is provided by the per-document lock in the manager, not here.
use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{DocumentId, DocumentRecord, DocumentSnapshot, Operation, Result};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Latest persisted record for the document, if any
    async fn load_document(&self, id: &DocumentId) -> Result<Option<DocumentRecord>>;

    /// Overwrite the per-document record. Last write wins.
    async fn save_document(&self, record: &DocumentRecord) -> Result<()>;

    /// Append one applied operation to the document's log
    async fn append_operation(&self, id: &DocumentId, op: &Operation) -> Result<()>;

    /// Full operation log for the document, in applied order
    async fn load_operations(&self, id: &DocumentId) -> Result<Vec<Operation>>;

    /// Persist a point-in-time snapshot
    async fn save_snapshot(&self, snapshot: &DocumentSnapshot) -> Result<()>;
}

/// In-memory store used by the server default and by tests
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<DocumentId, DocumentRecord>>,
    operations: RwLock<HashMap<DocumentId, Vec<Operation>>>,
    snapshots: RwLock<Vec<DocumentSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn snapshots_for(&self, id: &DocumentId) -> Vec<DocumentSnapshot> {
        self.snapshots
            .read()
            .iter()
            .filter(|s| &s.document_id == id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load_document(&self, id: &DocumentId) -> Result<Option<DocumentRecord>> {
        Ok(self.documents.read().get(id).cloned())
    }

    async fn save_document(&self, record: &DocumentRecord) -> Result<()> {
        self.documents
            .write()
            .insert(record.document_id.clone(), record.clone());
        Ok(())
    }

    async fn append_operation(&self, id: &DocumentId, op: &Operation) -> Result<()> {
        self.operations
            .write()
            .entry(id.clone())
            .or_default()
            .push(op.clone());
        Ok(())
    }

    async fn load_operations(&self, id: &DocumentId) -> Result<Vec<Operation>> {
        Ok(self.operations.read().get(id).cloned().unwrap_or_default())
    }

    async fn save_snapshot(&self, snapshot: &DocumentSnapshot) -> Result<()> {
        self.snapshots.write().push(snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OperationKind, UserId};

    #[tokio::test]
    async fn round_trips_document_records() {
        let store = MemoryStore::new();
        let id = DocumentId::from("doc");

        assert!(store.load_document(&id).await.unwrap().is_none());

        let record = DocumentRecord {
            document_id: id.clone(),
            content: "hello".to_string(),
            version: 3,
            last_modified: chrono::Utc::now(),
        };
        store.save_document(&record).await.unwrap();

        let loaded = store.load_document(&id).await.unwrap().unwrap();
        assert_eq!(loaded.content, "hello");
        assert_eq!(loaded.version, 3);
    }

    #[tokio::test]
    async fn operation_log_is_append_only_per_document() {
        let store = MemoryStore::new();
        let a = DocumentId::from("a");
        let b = DocumentId::from("b");

        for i in 0..3 {
            let op = Operation::new(
                UserId::new(),
                i,
                OperationKind::Insert {
                    position: 0,
                    content: "x".to_string(),
                },
            );
            store.append_operation(&a, &op).await.unwrap();
        }

        assert_eq!(store.load_operations(&a).await.unwrap().len(), 3);
        assert!(store.load_operations(&b).await.unwrap().is_empty());
    }
}
