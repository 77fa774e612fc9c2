use std::collections::BTreeMap;
use std::sync::RwLock;

use serde_json::Value;

use crate::document::{DocumentId, ID_FIELD};
use crate::error::{Error, Result};
use crate::query::Query;
use crate::update;

/// Write access to one collection of the host document store.
///
/// The coordinator never issues a multi-document atomic operation: every
/// guarantee it provides is built from `find_one_and_update`, which MUST
/// match and mutate a single document as one atomic compare-and-set. The
/// remaining methods have ordinary read/bulk semantics.
pub trait CollectionHandle: Send + Sync {
    /// First document matching `filter`, if any.
    fn find_one(&self, filter: &Value) -> Result<Option<Value>>;

    /// All documents matching `filter`.
    fn find_many(&self, filter: &Value) -> Result<Vec<Value>>;

    /// Atomically mutate the first document matching `filter` and return
    /// the post-update document. `Ok(None)` when nothing matched.
    fn find_one_and_update(&self, filter: &Value, update: &Value) -> Result<Option<Value>>;

    /// Mutate every document matching `filter`. Returns the count.
    /// Need not be atomic across documents.
    fn update_many(&self, filter: &Value, update: &Value) -> Result<u64>;

    /// Insert a document. A caller-supplied `_id` is honored (tombstone
    /// replay reinserts documents under their original ids); otherwise the
    /// store assigns the next id. Returns the document's id.
    fn insert(&self, doc: Value) -> Result<DocumentId>;

    /// Replace the full content of the first document matching `filter`,
    /// preserving its `_id`. Returns whether a document was replaced.
    fn replace_one(&self, filter: &Value, doc: Value) -> Result<bool>;

    /// Delete every document matching `filter`. Returns the count.
    fn delete_many(&self, filter: &Value) -> Result<u64>;
}

// ---------------------------------------------------------------------------
// In-memory reference implementation
// ---------------------------------------------------------------------------

struct Documents {
    docs: BTreeMap<DocumentId, Value>,
    next_id: DocumentId,
}

/// In-memory collection backing the test suite. The whole map sits behind
/// one `RwLock`, so `find_one_and_update` is trivially a single
/// compare-and-set, the same contract a remote store provides per
/// document.
pub struct MemoryCollection {
    inner: RwLock<Documents>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Documents {
                docs: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn first_match(docs: &BTreeMap<DocumentId, Value>, query: &Query) -> Option<DocumentId> {
        docs.iter()
            .find(|(_, doc)| query.matches(doc))
            .map(|(&id, _)| id)
    }
}

impl Default for MemoryCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionHandle for MemoryCollection {
    fn find_one(&self, filter: &Value) -> Result<Option<Value>> {
        let query = Query::parse(filter)?;
        let inner = self.inner.read().unwrap();
        Ok(inner
            .docs
            .values()
            .find(|doc| query.matches(doc))
            .cloned())
    }

    fn find_many(&self, filter: &Value) -> Result<Vec<Value>> {
        let query = Query::parse(filter)?;
        let inner = self.inner.read().unwrap();
        Ok(inner
            .docs
            .values()
            .filter(|doc| query.matches(doc))
            .cloned()
            .collect())
    }

    fn find_one_and_update(&self, filter: &Value, update: &Value) -> Result<Option<Value>> {
        let query = Query::parse(filter)?;
        let mut inner = self.inner.write().unwrap();
        let Some(id) = Self::first_match(&inner.docs, &query) else {
            return Ok(None);
        };
        let mut doc = inner.docs[&id].clone();
        update::apply_update(&mut doc, update)?;
        inner.docs.insert(id, doc.clone());
        Ok(Some(doc))
    }

    fn update_many(&self, filter: &Value, update: &Value) -> Result<u64> {
        let query = Query::parse(filter)?;
        let mut inner = self.inner.write().unwrap();
        let ids: Vec<DocumentId> = inner
            .docs
            .iter()
            .filter(|(_, doc)| query.matches(doc))
            .map(|(&id, _)| id)
            .collect();
        for &id in &ids {
            let mut doc = inner.docs[&id].clone();
            update::apply_update(&mut doc, update)?;
            inner.docs.insert(id, doc);
        }
        Ok(ids.len() as u64)
    }

    fn insert(&self, mut doc: Value) -> Result<DocumentId> {
        if !doc.is_object() {
            return Err(Error::NotAnObject);
        }
        let mut inner = self.inner.write().unwrap();
        let id = match doc.get(ID_FIELD).and_then(|v| v.as_u64()) {
            Some(id) => id,
            None => {
                let id = inner.next_id;
                doc.as_object_mut()
                    .unwrap()
                    .insert(ID_FIELD.to_string(), Value::Number(id.into()));
                id
            }
        };
        inner.next_id = inner.next_id.max(id + 1);
        inner.docs.insert(id, doc);
        Ok(id)
    }

    fn replace_one(&self, filter: &Value, mut doc: Value) -> Result<bool> {
        if !doc.is_object() {
            return Err(Error::NotAnObject);
        }
        let query = Query::parse(filter)?;
        let mut inner = self.inner.write().unwrap();
        let Some(id) = Self::first_match(&inner.docs, &query) else {
            return Ok(false);
        };
        doc.as_object_mut()
            .unwrap()
            .insert(ID_FIELD.to_string(), Value::Number(id.into()));
        inner.docs.insert(id, doc);
        Ok(true)
    }

    fn delete_many(&self, filter: &Value) -> Result<u64> {
        let query = Query::parse(filter)?;
        let mut inner = self.inner.write().unwrap();
        let ids: Vec<DocumentId> = inner
            .docs
            .iter()
            .filter(|(_, doc)| query.matches(doc))
            .map(|(&id, _)| id)
            .collect();
        for id in &ids {
            inner.docs.remove(id);
        }
        Ok(ids.len() as u64)
    }
}
