use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::document::DocumentId;
use crate::error::{Error, Result};
use crate::store::CollectionHandle;
use crate::transaction::{TransactionId, now_ms};

/// How long tombstones are retained before they expire, regardless of the
/// owning transaction's outcome. They are a disaster-recovery trail, not a
/// working-set structure.
pub const RETENTION_DAYS: i64 = 30;

const RETENTION_MS: i64 = RETENTION_DAYS * 24 * 60 * 60 * 1000;

/// A pre-removal snapshot of one document, keyed by
/// (transaction, source collection, source document).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecycleEntry {
    #[serde(rename = "_id")]
    pub entry_id: DocumentId,
    pub tid: TransactionId,
    #[serde(rename = "srcCollection")]
    pub src_collection: String,
    #[serde(rename = "srcId")]
    pub src_id: DocumentId,
    /// Full pre-removal content, reserved fields stripped.
    pub data: Value,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

/// Tombstone collection recording documents removed under a transaction,
/// so cancellation can reinsert them.
pub struct RecycleStore {
    handle: Arc<dyn CollectionHandle>,
}

impl RecycleStore {
    pub fn new(handle: Arc<dyn CollectionHandle>) -> Self {
        Self { handle }
    }

    /// Record a document about to be removed. One tombstone per document
    /// per transaction; a duplicate key is an error.
    pub fn create(
        &self,
        tid: TransactionId,
        src_collection: &str,
        src_id: DocumentId,
        data: Value,
    ) -> Result<()> {
        let key = json!({"tid": tid, "srcCollection": src_collection, "srcId": src_id});
        if self.handle.find_one(&key)?.is_some() {
            return Err(Error::DuplicateTombstone {
                tid,
                src_collection: src_collection.to_string(),
                src_id,
            });
        }
        self.handle.insert(json!({
            "tid": tid,
            "srcCollection": src_collection,
            "srcId": src_id,
            "data": data,
            "createdAt": now_ms(),
        }))?;
        Ok(())
    }

    /// All tombstones belonging to a transaction, used by Cancel's replay
    /// pass.
    pub fn find(&self, tid: TransactionId) -> Result<Vec<RecycleEntry>> {
        self.handle
            .find_many(&json!({"tid": tid}))?
            .iter()
            .map(|doc| Ok(serde_json::from_value(doc.clone())?))
            .collect()
    }

    /// Delete a tombstone after its document has been restored.
    pub fn remove(&self, entry: &RecycleEntry) -> Result<()> {
        self.handle.delete_many(&json!({"_id": entry.entry_id}))?;
        Ok(())
    }

    /// Drop tombstones past the retention horizon. Stores with native TTL
    /// indexes do this server-side; this sweep is for stores without one.
    pub fn purge_expired(&self) -> Result<u64> {
        self.handle
            .delete_many(&json!({"createdAt": {"$lte": now_ms() - RETENTION_MS}}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCollection;

    fn store() -> RecycleStore {
        RecycleStore::new(Arc::new(MemoryCollection::new()))
    }

    #[test]
    fn create_and_find_by_transaction() {
        let recycle = store();
        recycle.create(1, "person", 10, json!({"_id": 10, "name": "Misery"})).unwrap();
        recycle.create(1, "wallet", 3, json!({"_id": 3, "money": 100})).unwrap();
        recycle.create(2, "person", 11, json!({"_id": 11})).unwrap();

        let entries = recycle.find(1).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.src_collection == "person" && e.src_id == 10));
        assert!(entries.iter().any(|e| e.src_collection == "wallet" && e.src_id == 3));
    }

    #[test]
    fn duplicate_key_rejected() {
        let recycle = store();
        recycle.create(1, "person", 10, json!({"_id": 10})).unwrap();
        let err = recycle.create(1, "person", 10, json!({"_id": 10})).unwrap_err();
        assert!(matches!(err, Error::DuplicateTombstone { .. }));
        // Same document under another transaction is a distinct key.
        recycle.create(2, "person", 10, json!({"_id": 10})).unwrap();
    }

    #[test]
    fn remove_deletes_single_entry() {
        let recycle = store();
        recycle.create(1, "person", 10, json!({"_id": 10})).unwrap();
        recycle.create(1, "person", 11, json!({"_id": 11})).unwrap();

        let entries = recycle.find(1).unwrap();
        recycle.remove(&entries[0]).unwrap();
        assert_eq!(recycle.find(1).unwrap().len(), 1);
    }

    #[test]
    fn purge_ignores_fresh_entries() {
        let recycle = store();
        recycle.create(1, "person", 10, json!({"_id": 10})).unwrap();
        assert_eq!(recycle.purge_expired().unwrap(), 0);
        assert_eq!(recycle.find(1).unwrap().len(), 1);
    }
}
