//! Transaction ledger types and the asynchronous execution hand-off.

mod service;
pub use service::*;
mod transaction;
pub use transaction::{channel_id, NewTransaction, TransactionRecord, TxId, TxStatus};
