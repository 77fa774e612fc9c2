use std::sync::Arc;

use serde_json::{Value, json};

use crate::coordinator::TransactionCoordinator;
use crate::document::{self, doc_id};
use crate::error::{Error, Result};
use crate::store::CollectionHandle;
use crate::transaction::TransactionId;

/// Transactional view of one bound collection.
///
/// Every write first acquires the per-document lock through the
/// coordinator, then performs the actual mutation. Returned documents are
/// stripped of lock metadata; callers never see the reserved fields.
/// Reads go straight to the store and take no locks.
pub struct TxCollection {
    name: String,
    handle: Arc<dyn CollectionHandle>,
    coordinator: Arc<TransactionCoordinator>,
}

impl TxCollection {
    pub(crate) fn new(
        name: &str,
        handle: Arc<dyn CollectionHandle>,
        coordinator: Arc<TransactionCoordinator>,
    ) -> Self {
        Self {
            name: name.to_string(),
            handle,
            coordinator,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a document under the transaction. The stored document is
    /// born locked, with its backup set to explicit null so Cancel knows
    /// to delete rather than restore it.
    pub fn insert(&self, tid: TransactionId, doc: Value) -> Result<Value> {
        document::require_object(&doc)?;
        self.coordinator.lock(tid, &self.name, None)?;

        let mut stored = doc;
        if let Some(obj) = stored.as_object_mut() {
            obj.insert("_tx".to_string(), json!(tid));
            obj.insert("_backup".to_string(), Value::Null);
        }
        let id = self.handle.insert(stored)?;

        let mut view = self
            .handle
            .find_one(&json!({"_id": id}))?
            .ok_or(Error::ResourceBusy)?;
        document::strip_reserved(&mut view);
        Ok(view)
    }

    /// Lock the first document matching `filter` and apply `update` to it.
    /// Returns the post-update document. A filter matching nothing reports
    /// `ResourceBusy`, the same as a foreign lock.
    pub fn update_one(&self, tid: TransactionId, filter: &Value, update: &Value) -> Result<Value> {
        let locked = self.lock_matching(tid, filter)?;
        let id = doc_id(&locked)?;
        let updated = self
            .handle
            .find_one_and_update(&json!({"_id": id, "_tx": tid}), update)?
            .ok_or(Error::ResourceBusy)?;
        Ok(document::snapshot_of(&updated))
    }

    /// Lock every document currently matching `filter`, then apply
    /// `update` to all of them in one bulk write scoped to this
    /// transaction's locks, so it can only touch documents the
    /// transaction owns. Any match held by another transaction fails the
    /// whole call with `ResourceBusy`. Returns the number of documents
    /// updated.
    pub fn update_many(&self, tid: TransactionId, filter: &Value, update: &Value) -> Result<u64> {
        self.coordinator.lock(tid, &self.name, None)?;
        for doc in self.handle.find_many(filter)? {
            let id = doc_id(&doc)?;
            self.coordinator
                .lock(tid, &self.name, Some(&json!({"_id": id})))?;
        }
        self.handle
            .update_many(&json!({"$and": [filter, {"_tx": tid}]}), update)
    }

    /// Write back a full document by its `_id`, preserving the lock
    /// metadata already on the stored copy. The document must exist.
    pub fn save(&self, tid: TransactionId, doc: &Value) -> Result<Value> {
        let id = doc_id(doc)?;
        let locked = self.lock_matching(tid, &json!({"_id": id}))?;

        let mut replacement = document::snapshot_of(doc);
        if let (Some(obj), Some(stored)) = (replacement.as_object_mut(), locked.as_object()) {
            for key in ["_tx", "_backup"] {
                if let Some(v) = stored.get(key) {
                    obj.insert(key.to_string(), v.clone());
                }
            }
        }
        if !self
            .handle
            .replace_one(&json!({"_id": id, "_tx": tid}), replacement)?
        {
            return Err(Error::ResourceBusy);
        }
        Ok(document::snapshot_of(doc))
    }

    /// Lock and remove the first document matching `filter`. The document
    /// goes to the recycle store first, so Cancel can reinsert it; only
    /// then is it deleted. Returns the removed document's last content.
    pub fn remove_one(&self, tid: TransactionId, filter: &Value) -> Result<Value> {
        let locked = self.lock_matching(tid, filter)?;
        let id = doc_id(&locked)?;
        let view = document::snapshot_of(&locked);
        self.coordinator
            .recycle()
            .create(tid, &self.name, id, view.clone())?;
        self.handle.delete_many(&json!({"_id": id, "_tx": tid}))?;
        Ok(view)
    }

    /// Read one document, lock-free. Reserved fields are stripped.
    pub fn find_one(&self, filter: &Value) -> Result<Option<Value>> {
        Ok(self
            .handle
            .find_one(filter)?
            .map(|doc| document::snapshot_of(&doc)))
    }

    /// Read all matching documents, lock-free.
    pub fn find_many(&self, filter: &Value) -> Result<Vec<Value>> {
        Ok(self
            .handle
            .find_many(filter)?
            .iter()
            .map(document::snapshot_of)
            .collect())
    }

    /// Lock the first match and return the raw stored document (reserved
    /// fields included). An absent document reports the same way as a
    /// contended one; the caller cannot tell them apart.
    fn lock_matching(&self, tid: TransactionId, filter: &Value) -> Result<Value> {
        let view = self
            .coordinator
            .lock(tid, &self.name, Some(filter))?
            .ok_or(Error::ResourceBusy)?;
        let id = doc_id(&view)?;
        self.handle
            .find_one(&json!({"_id": id}))?
            .ok_or(Error::ResourceBusy)
    }
}
