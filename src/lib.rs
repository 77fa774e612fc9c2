pub mod collection;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod hooks;
pub mod query;
pub mod recycle;
pub mod store;
pub mod transaction;
pub mod update;
pub mod value;

pub use collection::TxCollection;
pub use coordinator::{DEFAULT_CURE_TIMEOUT, TransactionCoordinator};
pub use document::DocumentId;
pub use error::{Error, Result};
pub use hooks::TransactionObserver;
pub use store::{CollectionHandle, MemoryCollection};
pub use transaction::{TransactionFailure, TransactionId, TransactionRecord, TxState};
