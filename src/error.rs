use thiserror::Error;

use crate::transaction::TransactionId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("resource is busy or not exists")]
    ResourceBusy,

    #[error("transaction [{0}] is not valid")]
    TransactionNotValid(TransactionId),

    #[error("transaction [{0}] cannot commit")]
    TransactionCannotCommit(TransactionId),

    #[error("transaction [{id}] cannot cancel. Cancel reason: {reason}")]
    TransactionCannotCancel { id: TransactionId, reason: String },

    #[error("collection [{0}] is not bound to the coordinator")]
    CollectionNotBound(String),

    #[error("tombstone already exists for document {src_id} of [{src_collection}] in transaction [{tid}]")]
    DuplicateTombstone {
        tid: TransactionId,
        src_collection: String,
        src_id: u64,
    },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("document must be a JSON object")]
    NotAnObject,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failure raised by caller code inside a transaction body. The
    /// coordinator cancels the transaction and re-raises this to the caller.
    #[error("transaction aborted: {0}")]
    Aborted(String),
}

pub type Result<T> = std::result::Result<T, Error>;
