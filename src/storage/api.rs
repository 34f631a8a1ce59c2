//! Relay storage api.

use crate::{
    error::StorageError,
    transactions::{NewTransaction, TransactionRecord, TxId, TxStatus},
    types::{Delegation, Quota, QuotaSnapshot},
};
use alloy::primitives::Address;
use async_trait::async_trait;
use std::fmt::Debug;

/// Type alias for `Result<T, StorageError>`
pub type Result<T> = core::result::Result<T, StorageError>;

/// Storage API.
///
/// The quota/delegation/transaction store is the single shared mutable
/// resource of the relay; it is accessed exclusively through these
/// operations. Implementations must make [`create_transaction`] — payer
/// selection, debit, nonce assignment and insert — one linearizable unit:
/// two concurrent calls racing on the same quota row must not both succeed
/// when only one fits, and two calls must never observe the same "next"
/// relayer nonce.
///
/// [`create_transaction`]: StorageApi::create_transaction
#[async_trait]
pub trait StorageApi: Debug + Send + Sync {
    /// Idempotently creates the profile's quota with the default allowance,
    /// registering the profile if unseen, and returns it.
    async fn ensure_quota(&self, profile: Address) -> Result<Quota>;

    /// Reads the profile's own quota and every delegation granted to it
    /// (delegation id order) in one consistent snapshot, creating the quota
    /// if absent.
    async fn quota_snapshot(&self, profile: Address) -> Result<QuotaSnapshot>;

    /// Grants or refreshes the delegation from `approver` to `approved`.
    ///
    /// At most one delegation exists per ordered pair; re-approving replaces
    /// the allowance and keeps the usage counter.
    async fn upsert_delegation(
        &self,
        approver: Address,
        approved: Address,
        monthly_allowance: u64,
    ) -> Result<Delegation>;

    /// Atomically debits the resolved payer and inserts a `Pending` record
    /// with the next relayer nonce.
    ///
    /// Fails with [`StorageError::DuplicateAuthorization`] when the
    /// `(call_nonce, channel_id, signer)` triple was already relayed, and
    /// with a quota error when no payer has headroom. A partial failure
    /// leaves neither the debit nor the record behind.
    async fn create_transaction(&self, tx: NewTransaction) -> Result<TransactionRecord>;

    /// Moves a `Pending` record to a terminal state.
    async fn update_transaction_status(&self, id: TxId, status: TxStatus) -> Result<()>;

    /// Reads a single transaction record.
    async fn read_transaction(&self, id: TxId) -> Result<Option<TransactionRecord>>;

    /// Reads all transaction records for a profile, newest first.
    async fn read_transactions(&self, profile: Address) -> Result<Vec<TransactionRecord>>;

    /// Verifies the backend is reachable.
    async fn ping(&self) -> Result<()>;
}
