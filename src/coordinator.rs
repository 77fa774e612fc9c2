use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::collection::TxCollection;
use crate::document::{self, BACKUP_FIELD, doc_id};
use crate::error::{Error, Result};
use crate::hooks::TransactionObserver;
use crate::recycle::RecycleStore;
use crate::store::CollectionHandle;
use crate::transaction::{TransactionFailure, TransactionId, TransactionRecord, TxState, now_ms};

/// Timeout after which the recovery sweep considers a transaction
/// abandoned.
pub const DEFAULT_CURE_TIMEOUT: Duration = Duration::from_secs(60);

/// Owns transaction records and drives every state transition.
///
/// The coordinator assumes nothing of the host store beyond per-document
/// atomic conditional updates (`CollectionHandle::find_one_and_update`).
/// Both terminal algorithms operate only on documents still tagged with
/// the transaction id, so a crashed commit or cancel can simply be called
/// again; already-cleaned documents no longer match and are skipped.
pub struct TransactionCoordinator {
    /// Collection persisting the transaction records themselves.
    transactions: Arc<dyn CollectionHandle>,
    recycle: RecycleStore,
    collections: RwLock<HashMap<String, Arc<dyn CollectionHandle>>>,
    observers: RwLock<Vec<Arc<dyn TransactionObserver>>>,
}

impl TransactionCoordinator {
    pub fn new(
        transactions: Arc<dyn CollectionHandle>,
        recycle: Arc<dyn CollectionHandle>,
    ) -> Self {
        Self {
            transactions,
            recycle: RecycleStore::new(recycle),
            collections: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register a collection so Commit and Cancel can operate on it by
    /// name. Every collection written under a transaction must be bound
    /// before the first write.
    pub fn bind_collection(&self, name: &str, handle: Arc<dyn CollectionHandle>) {
        self.collections
            .write()
            .unwrap()
            .insert(name.to_string(), handle);
    }

    /// Register a lifecycle observer.
    pub fn observe(&self, observer: Arc<dyn TransactionObserver>) {
        self.observers.write().unwrap().push(observer);
    }

    /// Transactional write surface for a bound collection.
    pub fn collection(self: &Arc<Self>, name: &str) -> Result<TxCollection> {
        let handle = self.handle(name)?;
        Ok(TxCollection::new(name, handle, Arc::clone(self)))
    }

    pub(crate) fn handle(&self, name: &str) -> Result<Arc<dyn CollectionHandle>> {
        self.collections
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::CollectionNotBound(name.to_string()))
    }

    pub(crate) fn recycle(&self) -> &RecycleStore {
        &self.recycle
    }

    fn notify(&self, f: impl Fn(&dyn TransactionObserver)) {
        for observer in self.observers.read().unwrap().iter() {
            f(observer.as_ref());
        }
    }

    /// Atomic state transition: match on id AND the allowed source states,
    /// apply `extra` on top of the state change. Zero matches means the
    /// transaction is not in an acceptable state (or does not exist).
    fn transition(
        &self,
        id: TransactionId,
        from: &[TxState],
        to: TxState,
        extra: Option<Value>,
    ) -> Result<Option<TransactionRecord>> {
        let allowed: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
        let mut update = json!({"$set": {"state": to.as_str()}});
        if let Some(Value::Object(ops)) = extra {
            for (op, fields) in ops {
                if op == "$set" {
                    for (k, v) in fields.as_object().cloned().unwrap_or_default() {
                        update["$set"][k] = v;
                    }
                } else {
                    update[op] = fields;
                }
            }
        }
        let doc = self.transactions.find_one_and_update(
            &json!({"_id": id, "state": {"$in": allowed}}),
            &update,
        )?;
        doc.map(|d| TransactionRecord::from_doc(&d)).transpose()
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Create a transaction record in `initialized` state and return its
    /// id. `mark` and `memo` are free-form caller labels for observability.
    pub fn initialize(&self, mark: Option<&str>, memo: Option<Value>) -> Result<TransactionId> {
        let mut doc = json!({
            "state": TxState::Initialized.as_str(),
            "collections": [],
            "initializedAt": now_ms(),
        });
        if let Some(mark) = mark {
            doc["mark"] = json!(mark);
        }
        if let Some(memo) = memo {
            doc["memo"] = memo;
        }
        let id = self.transactions.insert(doc)?;
        debug!(tid = id, "transaction initialized");

        let record = self.fetch(id)?;
        self.notify(|o| o.transaction_initialized(&record));
        Ok(id)
    }

    /// Register `collection` as touched and move the transaction to
    /// `pending`, in one conditional update. Idempotent per collection;
    /// fails with `TransactionNotValid` once the transaction has started
    /// resolving.
    pub fn pend(&self, id: TransactionId, collection: &str) -> Result<()> {
        let record = self
            .transition(
                id,
                &[TxState::Initialized, TxState::Pending],
                TxState::Pending,
                Some(json!({"$addToSet": {"collections": collection}})),
            )?
            .ok_or(Error::TransactionNotValid(id))?;
        debug!(tid = id, collection, "transaction pended");
        self.notify(|o| o.transaction_pended(&record, collection));
        Ok(())
    }

    /// Make the transaction's writes permanent.
    ///
    /// Re-entrant from `committed`, so the recovery sweep can resume a
    /// commit that crashed mid-cleanup: the per-collection unlock filters
    /// on the lock tag and already-cleaned documents no longer match.
    pub fn commit(&self, id: TransactionId) -> Result<()> {
        let mut record = self
            .transition(
                id,
                &[TxState::Pending, TxState::Initialized, TxState::Committed],
                TxState::Committed,
                None,
            )?
            .ok_or(Error::TransactionCannotCommit(id))?;

        // Strip locks and backups; the writes themselves are already in
        // place, no backup is examined.
        for name in &record.collections {
            let handle = self.handle(name)?;
            let cleaned = handle.update_many(
                &json!({"_tx": id}),
                &json!({"$unset": {"_tx": 1, "_backup": 1}}),
            )?;
            debug!(tid = id, collection = name.as_str(), cleaned, "commit unlocked");
        }

        let cost = now_ms() - record.initialized_at;
        self.transactions.find_one_and_update(
            &json!({"_id": id}),
            &json!({"$set": {"state": TxState::Finished.as_str(), "cost": cost}}),
        )?;
        debug!(tid = id, cost, "transaction finished");

        record.state = TxState::Finished;
        record.cost = Some(cost);
        self.notify(|o| o.transaction_committed(&record, cost));
        Ok(())
    }

    /// Undo every write made under the transaction.
    ///
    /// Restoration runs in two passes. Pass 1 replays tombstones:
    /// documents removed under the transaction are reinserted with a fresh
    /// lock tag and no backup, so pass 2 treats them as "locked, never
    /// changed" and merely unlocks them. Pass 2 walks every touched
    /// collection and resolves each still-tagged document by the backup
    /// sentinel: object = restore pre-image, absent = unlock only,
    /// explicit null = the document was created here, delete it.
    ///
    /// Re-entrant from `rollback`; the first captured error wins.
    pub fn cancel(&self, id: TransactionId, failure: TransactionFailure) -> Result<()> {
        let mut record = self
            .transition(
                id,
                &[TxState::Initialized, TxState::Pending, TxState::Rollback],
                TxState::Rollback,
                None,
            )?
            .ok_or_else(|| Error::TransactionCannotCancel {
                id,
                reason: failure.message.clone(),
            })?;

        // Pass 1: bring removed documents back before the unlock pass.
        for entry in self.recycle.find(id)? {
            let handle = self.handle(&entry.src_collection)?;
            if handle.find_one(&json!({"_id": entry.src_id}))?.is_none() {
                let mut doc = entry.data.clone();
                if let Some(obj) = doc.as_object_mut() {
                    obj.insert("_tx".to_string(), json!(id));
                }
                handle.insert(doc)?;
                debug!(
                    tid = id,
                    collection = entry.src_collection.as_str(),
                    doc = entry.src_id,
                    "tombstone replayed"
                );
            }
            self.recycle.remove(&entry)?;
        }

        // Pass 2: per-collection restore of every still-tagged document.
        for name in &record.collections {
            let handle = self.handle(name)?;
            for doc in handle.find_many(&json!({"_tx": id}))? {
                let did = doc_id(&doc)?;
                let selector = json!({"_id": did, "_tx": id});
                match doc.get(BACKUP_FIELD) {
                    Some(Value::Null) => {
                        // Created under this transaction.
                        handle.delete_many(&selector)?;
                        debug!(tid = id, collection = name.as_str(), doc = did, "creation undone");
                    }
                    Some(backup) => {
                        // Modified; rewrite from the pre-image.
                        handle.replace_one(&selector, backup.clone())?;
                        debug!(tid = id, collection = name.as_str(), doc = did, "pre-image restored");
                    }
                    None => {
                        // Locked but never changed; only unlock.
                        handle.update_many(
                            &selector,
                            &json!({"$unset": {"_tx": 1, "_backup": 1}}),
                        )?;
                        debug!(tid = id, collection = name.as_str(), doc = did, "lock released");
                    }
                }
            }
        }

        let cost = now_ms() - record.initialized_at;
        let mut set = json!({"state": TxState::Cancelled.as_str(), "cost": cost});
        if record.error.is_none() {
            set["error"] = serde_json::to_value(&failure)?;
            record.error = Some(failure.clone());
        }
        self.transactions
            .find_one_and_update(&json!({"_id": id}), &json!({"$set": set}))?;
        debug!(tid = id, cost, reason = failure.message.as_str(), "transaction cancelled");

        record.state = TxState::Cancelled;
        record.cost = Some(cost);
        self.notify(|o| o.transaction_cancelled(&record, cost, &failure));
        Ok(())
    }

    /// Run `f` under a fresh transaction: commit on success, cancel and
    /// re-raise on failure. The only supported way to drive a transaction
    /// end to end; direct Initialize/Commit/Cancel is for recovery
    /// callers.
    pub fn run<T>(
        &self,
        mark: Option<&str>,
        memo: Option<Value>,
        f: impl FnOnce(TransactionId) -> Result<T>,
    ) -> Result<T> {
        let tid = self.initialize(mark, memo)?;
        match f(tid) {
            Ok(value) => {
                self.commit(tid)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(cancel_err) = self.cancel(tid, TransactionFailure::capture(&err)) {
                    // The caller gets the original failure; the record stays
                    // for the recovery sweep.
                    warn!(tid, error = %cancel_err, "cancel failed after aborted transaction");
                }
                Err(err)
            }
        }
    }

    /// Recovery sweep: resolve transactions stuck past `timeout`.
    ///
    /// A transaction found in `committed` crashed between commit and
    /// cleanup and is committed again (idempotently); anything else still
    /// unresolved is cancelled with a synthetic failure. Operates purely
    /// on persisted state, safe to run from any process at any time.
    pub fn cure(&self, timeout: Duration) -> Result<Vec<TransactionRecord>> {
        let cutoff = now_ms() - timeout.as_millis() as i64;
        let stuck = self.transactions.find_many(&json!({
            "initializedAt": {"$lte": cutoff},
            "state": {"$nin": [TxState::Finished.as_str(), TxState::Cancelled.as_str()]},
        }))?;

        let mut cured = Vec::with_capacity(stuck.len());
        for doc in &stuck {
            let record = TransactionRecord::from_doc(doc)?;
            warn!(tid = record.id, state = %record.state, "curing abandoned transaction");
            let resolution = if record.state == TxState::Committed {
                self.commit(record.id)
            } else {
                self.cancel(record.id, TransactionFailure::unprocessed())
            };
            match resolution {
                Ok(()) => cured.push(record),
                // Leave it for the next sweep; both algorithms resume from
                // persisted state.
                Err(err) => warn!(tid = record.id, error = %err, "cure attempt failed"),
            }
        }

        self.notify(|o| o.transactions_cured(&cured));
        Ok(cured)
    }

    // -----------------------------------------------------------------------
    // Document lock protocol
    // -----------------------------------------------------------------------

    /// Acquire the per-document lock for `tid` on the first document of
    /// `collection` matching `filter`.
    ///
    /// Registers the collection as touched (pend), then issues one
    /// compare-and-set: match `filter` AND (tag == tid OR tag absent), set
    /// the tag. Two transactions racing for one document are linearized by
    /// the store; exactly one succeeds, the other gets `ResourceBusy`.
    /// On first touch the pre-image is snapshotted into the backup field,
    /// never to be overwritten again within this transaction.
    ///
    /// `None` as filter registers collection-level participation only
    /// (the create path) and returns `Ok(None)`.
    pub fn lock(
        &self,
        tid: TransactionId,
        collection: &str,
        filter: Option<&Value>,
    ) -> Result<Option<Value>> {
        self.pend(tid, collection)?;
        let Some(filter) = filter else {
            return Ok(None);
        };

        let handle = self.handle(collection)?;
        let locked = handle
            .find_one_and_update(
                &json!({"$and": [
                    filter,
                    {"$or": [{"_tx": tid}, {"_tx": {"$exists": false}}]},
                ]}),
                &json!({"$set": {"_tx": tid}}),
            )?
            .ok_or(Error::ResourceBusy)?;
        let did = doc_id(&locked)?;
        debug!(tid, collection, doc = did, "document locked");

        // First touch: preserve the pre-image. The acquisition above only
        // set the tag, so backup presence still reflects the state before
        // this call.
        if locked.get(BACKUP_FIELD).is_none() {
            let snapshot = document::snapshot_of(&locked);
            handle.find_one_and_update(
                &json!({"_id": did}),
                &json!({"$set": {"_backup": snapshot}}),
            )?;
        }

        let mut view = locked;
        document::strip_reserved(&mut view);
        self.notify(|o| o.lock_acquired(tid, collection, &view));
        Ok(Some(view))
    }

    fn fetch(&self, id: TransactionId) -> Result<TransactionRecord> {
        let doc = self
            .transactions
            .find_one(&json!({"_id": id}))?
            .ok_or(Error::TransactionNotValid(id))?;
        TransactionRecord::from_doc(&doc)
    }

    /// Current state of a transaction record, mainly for diagnostics and
    /// tests.
    pub fn inspect(&self, id: TransactionId) -> Result<TransactionRecord> {
        self.fetch(id)
    }

    /// Drop recycle tombstones past the retention horizon.
    pub fn purge_expired_tombstones(&self) -> Result<u64> {
        self.recycle.purge_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCollection;

    struct Fixture {
        coordinator: Arc<TransactionCoordinator>,
        transactions: Arc<MemoryCollection>,
        users: Arc<MemoryCollection>,
    }

    fn fixture() -> Fixture {
        let transactions = Arc::new(MemoryCollection::new());
        let recycle = Arc::new(MemoryCollection::new());
        let users = Arc::new(MemoryCollection::new());
        let coordinator = Arc::new(TransactionCoordinator::new(
            Arc::clone(&transactions) as Arc<dyn CollectionHandle>,
            recycle as Arc<dyn CollectionHandle>,
        ));
        coordinator.bind_collection("users", Arc::clone(&users) as Arc<dyn CollectionHandle>);
        Fixture {
            coordinator,
            transactions,
            users,
        }
    }

    #[test]
    fn initialize_creates_initialized_record() {
        let fx = fixture();
        let tid = fx.coordinator.initialize(Some("signup"), None).unwrap();
        let record = fx.coordinator.inspect(tid).unwrap();
        assert_eq!(record.state, TxState::Initialized);
        assert_eq!(record.mark.as_deref(), Some("signup"));
        assert!(record.collections.is_empty());
        assert!(record.cost.is_none());
    }

    #[test]
    fn pend_is_idempotent_per_collection() {
        let fx = fixture();
        let tid = fx.coordinator.initialize(None, None).unwrap();
        fx.coordinator.pend(tid, "users").unwrap();
        fx.coordinator.pend(tid, "users").unwrap();
        let record = fx.coordinator.inspect(tid).unwrap();
        assert_eq!(record.state, TxState::Pending);
        assert_eq!(record.collections, vec!["users".to_string()]);
    }

    #[test]
    fn pend_after_resolution_is_rejected() {
        let fx = fixture();
        let tid = fx.coordinator.initialize(None, None).unwrap();
        fx.coordinator.commit(tid).unwrap();
        let err = fx.coordinator.pend(tid, "users").unwrap_err();
        assert!(matches!(err, Error::TransactionNotValid(id) if id == tid));
    }

    #[test]
    fn commit_clears_lock_metadata_and_finishes() {
        let fx = fixture();
        let id = fx.users.insert(json!({"name": "A"})).unwrap();
        let tid = fx.coordinator.initialize(None, None).unwrap();
        fx.coordinator
            .lock(tid, "users", Some(&json!({"_id": id})))
            .unwrap();
        fx.users
            .find_one_and_update(&json!({"_id": id}), &json!({"$set": {"name": "B"}}))
            .unwrap();
        fx.coordinator.commit(tid).unwrap();

        let stored = fx.users.find_one(&json!({"_id": id})).unwrap().unwrap();
        assert_eq!(stored["name"], "B");
        assert!(stored.get("_tx").is_none());
        assert!(stored.get("_backup").is_none());

        let record = fx.coordinator.inspect(tid).unwrap();
        assert_eq!(record.state, TxState::Finished);
        assert!(record.cost.is_some());
    }

    #[test]
    fn commit_rejects_cancelled_transaction() {
        let fx = fixture();
        let tid = fx.coordinator.initialize(None, None).unwrap();
        fx.coordinator
            .cancel(tid, TransactionFailure::new("Error", "caller", "abort"))
            .unwrap();
        let err = fx.coordinator.commit(tid).unwrap_err();
        assert!(matches!(err, Error::TransactionCannotCommit(id) if id == tid));
    }

    #[test]
    fn cancel_restores_pre_image_exactly() {
        let fx = fixture();
        let id = fx
            .users
            .insert(json!({"name": "A", "tags": [1, 2]}))
            .unwrap();
        let before = fx.users.find_one(&json!({"_id": id})).unwrap().unwrap();

        let tid = fx.coordinator.initialize(None, None).unwrap();
        fx.coordinator
            .lock(tid, "users", Some(&json!({"_id": id})))
            .unwrap();
        fx.users
            .find_one_and_update(
                &json!({"_id": id}),
                &json!({"$set": {"name": "B"}, "$push": {"tags": 3}}),
            )
            .unwrap();
        fx.coordinator
            .cancel(tid, TransactionFailure::new("Error", "caller", "abort"))
            .unwrap();

        let after = fx.users.find_one(&json!({"_id": id})).unwrap().unwrap();
        assert_eq!(after, before);

        let record = fx.coordinator.inspect(tid).unwrap();
        assert_eq!(record.state, TxState::Cancelled);
        assert_eq!(record.error.as_ref().unwrap().message, "abort");
    }

    #[test]
    fn cancel_unlocks_untouched_documents() {
        let fx = fixture();
        let id = fx.users.insert(json!({"name": "A"})).unwrap();
        // Lock tag present, no backup: the "locked, never changed" case.
        fx.users
            .find_one_and_update(&json!({"_id": id}), &json!({"$set": {"_tx": 42}}))
            .unwrap();
        let tid = fx.coordinator.initialize(None, None).unwrap();
        fx.transactions
            .find_one_and_update(
                &json!({"_id": tid}),
                &json!({"$set": {"collections": ["users"], "state": "pending"}}),
            )
            .unwrap();
        // Retag under the transaction being cancelled.
        fx.users
            .find_one_and_update(&json!({"_id": id}), &json!({"$set": {"_tx": tid}}))
            .unwrap();
        fx.coordinator
            .cancel(tid, TransactionFailure::unprocessed())
            .unwrap();

        let stored = fx.users.find_one(&json!({"_id": id})).unwrap().unwrap();
        assert_eq!(stored, json!({"_id": id, "name": "A"}));
    }

    #[test]
    fn first_cancellation_reason_wins() {
        let fx = fixture();
        let tid = fx.coordinator.initialize(None, None).unwrap();
        fx.coordinator
            .cancel(tid, TransactionFailure::new("Error", "caller", "first"))
            .unwrap();
        // Simulate a crash that left the record mid-rollback, then resolve
        // it again with a different reason.
        fx.transactions
            .find_one_and_update(&json!({"_id": tid}), &json!({"$set": {"state": "rollback"}}))
            .unwrap();
        fx.coordinator
            .cancel(tid, TransactionFailure::new("Error", "cure", "second"))
            .unwrap();
        let record = fx.coordinator.inspect(tid).unwrap();
        assert_eq!(record.error.unwrap().message, "first");
    }

    #[test]
    fn lock_contention_yields_resource_busy() {
        let fx = fixture();
        let id = fx.users.insert(json!({"name": "A"})).unwrap();
        let a = fx.coordinator.initialize(None, None).unwrap();
        let b = fx.coordinator.initialize(None, None).unwrap();

        fx.coordinator
            .lock(a, "users", Some(&json!({"_id": id})))
            .unwrap();
        let err = fx
            .coordinator
            .lock(b, "users", Some(&json!({"_id": id})))
            .unwrap_err();
        assert!(matches!(err, Error::ResourceBusy));

        // Reacquisition by the holder succeeds.
        let again = fx
            .coordinator
            .lock(a, "users", Some(&json!({"_id": id})))
            .unwrap();
        assert!(again.is_some());
    }

    #[test]
    fn first_snapshot_wins_within_a_transaction() {
        let fx = fixture();
        let id = fx.users.insert(json!({"name": "A"})).unwrap();
        let tid = fx.coordinator.initialize(None, None).unwrap();
        fx.coordinator
            .lock(tid, "users", Some(&json!({"_id": id})))
            .unwrap();
        fx.users
            .find_one_and_update(&json!({"_id": id}), &json!({"$set": {"name": "B"}}))
            .unwrap();
        fx.coordinator
            .lock(tid, "users", Some(&json!({"_id": id})))
            .unwrap();
        let stored = fx.users.find_one(&json!({"_id": id})).unwrap().unwrap();
        assert_eq!(stored["_backup"], json!({"_id": id, "name": "A"}));
    }

    #[test]
    fn lock_strips_reserved_fields_from_view() {
        let fx = fixture();
        let id = fx.users.insert(json!({"name": "A"})).unwrap();
        let tid = fx.coordinator.initialize(None, None).unwrap();
        let view = fx
            .coordinator
            .lock(tid, "users", Some(&json!({"_id": id})))
            .unwrap()
            .unwrap();
        assert_eq!(view, json!({"_id": id, "name": "A"}));
    }

    #[test]
    fn run_commits_on_success() {
        let fx = fixture();
        let id = fx.users.insert(json!({"name": "A"})).unwrap();
        let coordinator = Arc::clone(&fx.coordinator);
        let out = coordinator
            .run(None, None, |tid| {
                coordinator.lock(tid, "users", Some(&json!({"_id": id})))?;
                fx.users
                    .find_one_and_update(&json!({"_id": id}), &json!({"$set": {"name": "B"}}))?;
                Ok(17)
            })
            .unwrap();
        assert_eq!(out, 17);
        let stored = fx.users.find_one(&json!({"_id": id})).unwrap().unwrap();
        assert_eq!(stored, json!({"_id": id, "name": "B"}));
    }

    #[test]
    fn run_cancels_and_returns_original_error() {
        let fx = fixture();
        let id = fx.users.insert(json!({"name": "A"})).unwrap();
        let coordinator = Arc::clone(&fx.coordinator);
        let err = coordinator
            .run(None, None, |tid| -> Result<()> {
                coordinator.lock(tid, "users", Some(&json!({"_id": id})))?;
                fx.users
                    .find_one_and_update(&json!({"_id": id}), &json!({"$set": {"name": "B"}}))?;
                Err(Error::Aborted("validation failed".into()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Aborted(_)));

        let stored = fx.users.find_one(&json!({"_id": id})).unwrap().unwrap();
        assert_eq!(stored, json!({"_id": id, "name": "A"}));
    }

    #[test]
    fn cure_cancels_abandoned_and_resumes_committed() {
        let fx = fixture();

        // Abandoned mid-flight: should be cancelled.
        let doc_id = fx.users.insert(json!({"name": "A"})).unwrap();
        let stale = fx.coordinator.initialize(None, None).unwrap();
        fx.coordinator
            .lock(stale, "users", Some(&json!({"_id": doc_id})))
            .unwrap();

        // Crashed between the committed transition and cleanup: should be
        // committed to completion.
        let other_id = fx.users.insert(json!({"name": "C"})).unwrap();
        let crashed = fx.coordinator.initialize(None, None).unwrap();
        fx.coordinator
            .lock(crashed, "users", Some(&json!({"_id": other_id})))
            .unwrap();
        fx.transactions
            .find_one_and_update(
                &json!({"_id": crashed}),
                &json!({"$set": {"state": "committed"}}),
            )
            .unwrap();

        // Fresh transaction: must be left alone.
        let fresh = fx.coordinator.initialize(None, None).unwrap();

        // Age the first two past the timeout.
        for tid in [stale, crashed] {
            fx.transactions
                .find_one_and_update(
                    &json!({"_id": tid}),
                    &json!({"$set": {"initializedAt": now_ms() - 120_000}}),
                )
                .unwrap();
        }

        let cured = fx.coordinator.cure(DEFAULT_CURE_TIMEOUT).unwrap();
        assert_eq!(cured.len(), 2);

        let stale_rec = fx.coordinator.inspect(stale).unwrap();
        assert_eq!(stale_rec.state, TxState::Cancelled);
        assert_eq!(stale_rec.error.unwrap().message, "Cancel unprocessed.");

        assert_eq!(
            fx.coordinator.inspect(crashed).unwrap().state,
            TxState::Finished
        );
        assert_eq!(
            fx.coordinator.inspect(fresh).unwrap().state,
            TxState::Initialized
        );

        // Both documents end up unlocked; the stale one kept its content.
        let a = fx.users.find_one(&json!({"_id": doc_id})).unwrap().unwrap();
        assert_eq!(a, json!({"_id": doc_id, "name": "A"}));
        let c = fx.users.find_one(&json!({"_id": other_id})).unwrap().unwrap();
        assert_eq!(c, json!({"_id": other_id, "name": "C"}));
    }

    #[test]
    fn unbound_collection_is_an_error() {
        let fx = fixture();
        let tid = fx.coordinator.initialize(None, None).unwrap();
        let err = fx
            .coordinator
            .lock(tid, "ghosts", Some(&json!({"_id": 1})))
            .unwrap_err();
        assert!(matches!(err, Error::CollectionNotBound(_)));
    }

    struct Recorder {
        events: std::sync::Mutex<Vec<String>>,
    }

    impl TransactionObserver for Recorder {
        fn transaction_initialized(&self, record: &TransactionRecord) {
            self.events
                .lock()
                .unwrap()
                .push(format!("init:{}", record.id));
        }

        fn transaction_committed(&self, record: &TransactionRecord, _cost_ms: i64) {
            self.events
                .lock()
                .unwrap()
                .push(format!("commit:{}", record.id));
        }
    }

    #[test]
    fn observers_see_lifecycle_events() {
        let fx = fixture();
        let recorder = Arc::new(Recorder {
            events: std::sync::Mutex::new(Vec::new()),
        });
        fx.coordinator.observe(Arc::clone(&recorder) as Arc<dyn TransactionObserver>);

        let tid = fx.coordinator.initialize(None, None).unwrap();
        fx.coordinator.commit(tid).unwrap();

        let events = recorder.events.lock().unwrap();
        assert_eq!(*events, vec![format!("init:{tid}"), format!("commit:{tid}")]);
    }
}
