use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

pub type DocumentId = u64;

/// Reserved field: id of the transaction currently holding the document.
pub const LOCK_FIELD: &str = "_tx";

/// Reserved field: rollback snapshot with tri-state semantics.
/// Absent = locked but never backed up; explicit JSON null = created by
/// the owning transaction; object = full pre-image of the document.
pub const BACKUP_FIELD: &str = "_backup";

/// Primary key injected by the store on insert.
pub const ID_FIELD: &str = "_id";

/// Extract the `_id` of a stored document.
pub fn doc_id(doc: &Value) -> Result<DocumentId> {
    doc.get(ID_FIELD)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| Error::InvalidQuery("document has no _id".into()))
}

pub fn require_object(doc: &Value) -> Result<&Map<String, Value>> {
    doc.as_object().ok_or(Error::NotAnObject)
}

/// Remove the lock tag and backup snapshot from a document view.
/// Callers of the transactional API never observe lock metadata.
pub fn strip_reserved(doc: &mut Value) {
    if let Some(obj) = doc.as_object_mut() {
        obj.remove(LOCK_FIELD);
        obj.remove(BACKUP_FIELD);
    }
}

/// Clone a document with reserved fields removed, for snapshots and
/// tombstone payloads.
pub fn snapshot_of(doc: &Value) -> Value {
    let mut copy = doc.clone();
    strip_reserved(&mut copy);
    copy
}

// ---------------------------------------------------------------------------
// Dot-notation field paths
// ---------------------------------------------------------------------------

/// Resolve a field path like "profile.nickname", cloning the value.
/// Missing segments yield `Value::Null`.
pub(crate) fn resolve_field(doc: &Value, path: &str) -> Value {
    let mut current = doc;
    for part in path.split('.') {
        match current {
            Value::Object(map) => match map.get(part) {
                Some(v) => current = v,
                None => return Value::Null,
            },
            _ => return Value::Null,
        }
    }
    current.clone()
}

/// Resolve a field path by reference. `None` when any segment is missing,
/// which is distinct from an explicit null value; `$exists` and the
/// backup sentinel both depend on that distinction.
pub(crate) fn resolve_field_ref<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Set a field path, creating intermediate objects as needed.
pub(crate) fn set_field(doc: &mut Value, path: &str, value: Value) {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = doc;
    for (i, part) in parts.iter().enumerate() {
        if i == parts.len() - 1 {
            if let Value::Object(map) = current {
                map.insert(part.to_string(), value);
            }
            return;
        }
        if let Value::Object(map) = current {
            if !map.contains_key(*part) || !map[*part].is_object() {
                map.insert(part.to_string(), json!({}));
            }
            current = map.get_mut(*part).unwrap();
        } else {
            return;
        }
    }
}

/// Remove a field path. Missing paths are a no-op.
pub(crate) fn remove_field(doc: &mut Value, path: &str) {
    let parts: Vec<&str> = path.split('.').collect();
    if parts.len() == 1 {
        if let Value::Object(map) = doc {
            map.remove(path);
        }
        return;
    }
    let mut current = &mut *doc;
    for part in &parts[..parts.len() - 1] {
        match current {
            Value::Object(map) => match map.get_mut(*part) {
                Some(v) => current = v,
                None => return,
            },
            _ => return,
        }
    }
    if let Value::Object(map) = current {
        map.remove(parts[parts.len() - 1]);
    }
}
