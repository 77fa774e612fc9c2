use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::DocumentId;
use crate::error::{Error, Result};

/// Transactions are documents of the coordinator's own collection, so a
/// transaction id is a document id there.
pub type TransactionId = DocumentId;

/// Lifecycle of a transaction record.
///
/// ```text
/// initialized -> pending -> committed -> finished
///            \-> rollback -> cancelled
/// ```
///
/// Every transition is one atomic conditional update matching on the id
/// AND the set of allowed source states, so racing commit/cancel/pend
/// calls linearize on the store. `committed` and `rollback` re-enter
/// themselves, which is what makes Commit and Cancel resumable after a
/// crash mid-cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxState {
    Initialized,
    Pending,
    Committed,
    Finished,
    Rollback,
    Cancelled,
}

impl TxState {
    pub fn as_str(self) -> &'static str {
        match self {
            TxState::Initialized => "initialized",
            TxState::Pending => "pending",
            TxState::Committed => "committed",
            TxState::Finished => "finished",
            TxState::Rollback => "rollback",
            TxState::Cancelled => "cancelled",
        }
    }

    /// Terminal states are never left again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TxState::Finished | TxState::Cancelled)
    }
}

impl std::fmt::Display for TxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Captured failure stored on a cancelled transaction record.
/// Set at most once; the first cancellation reason wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionFailure {
    pub name: String,
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl TransactionFailure {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Capture a failure raised by caller code inside a transaction body.
    pub fn capture(err: &Error) -> Self {
        Self::new("Error", "caller", err.to_string())
    }

    /// Synthetic failure the recovery sweep attaches to abandoned
    /// transactions it cancels.
    pub fn unprocessed() -> Self {
        Self::new("Error", "cure", "Cancel unprocessed.")
    }
}

/// One transaction record, as persisted in the coordinator's collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    #[serde(rename = "_id")]
    pub id: TransactionId,
    pub state: TxState,
    /// Names of collections written under this transaction. Membership
    /// only; `$addToSet` keeps it duplicate-free.
    #[serde(default)]
    pub collections: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TransactionFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<Value>,
    /// Creation time, epoch milliseconds.
    #[serde(rename = "initializedAt")]
    pub initialized_at: i64,
    /// Milliseconds from initialization to resolution, set once at
    /// commit or cancel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<i64>,
}

impl TransactionRecord {
    pub fn from_doc(doc: &Value) -> Result<Self> {
        Ok(serde_json::from_value(doc.clone())?)
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
