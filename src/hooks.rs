use serde_json::Value;

use crate::transaction::{TransactionFailure, TransactionId, TransactionRecord};

/// Event listener for transaction lifecycle notifications.
///
/// Every method has a no-op default, so implementors override only what
/// they care about. Observers are invoked synchronously right after the
/// corresponding state change has been persisted; they are fire-and-forget
/// and cannot veto or fail an operation.
pub trait TransactionObserver: Send + Sync {
    fn lock_acquired(&self, _tid: TransactionId, _collection: &str, _doc: &Value) {}

    fn transaction_initialized(&self, _record: &TransactionRecord) {}

    fn transaction_pended(&self, _record: &TransactionRecord, _collection: &str) {}

    fn transaction_committed(&self, _record: &TransactionRecord, _cost_ms: i64) {}

    fn transaction_cancelled(
        &self,
        _record: &TransactionRecord,
        _cost_ms: i64,
        _failure: &TransactionFailure,
    ) {
    }

    fn transactions_cured(&self, _records: &[TransactionRecord]) {}
}
