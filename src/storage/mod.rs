//! Relay storage

mod api;
pub use api::{Result, StorageApi};
mod memory;
pub use memory::InMemoryStorage;
mod pg;
pub use pg::PgStorage;

use crate::{
    transactions::{NewTransaction, TransactionRecord, TxId, TxStatus},
    types::{Delegation, Quota, QuotaSnapshot},
};
use alloy::primitives::Address;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

/// Relay storage interface.
#[derive(Debug, Clone)]
pub struct RelayStorage {
    inner: Arc<dyn StorageApi>,
}

impl RelayStorage {
    /// Create [`RelayStorage`] with an in-memory backend. Used for testing only.
    pub fn in_memory(default_allowance: u64) -> Self {
        Self { inner: Arc::new(InMemoryStorage::new(default_allowance)) }
    }

    /// Create [`RelayStorage`] with a PostgreSQL backend.
    pub fn pg(pool: PgPool, default_allowance: u64) -> Self {
        Self { inner: Arc::new(PgStorage::new(pool, default_allowance)) }
    }
}

#[async_trait]
impl StorageApi for RelayStorage {
    async fn ensure_quota(&self, profile: Address) -> Result<Quota> {
        self.inner.ensure_quota(profile).await
    }

    async fn quota_snapshot(&self, profile: Address) -> Result<QuotaSnapshot> {
        self.inner.quota_snapshot(profile).await
    }

    async fn upsert_delegation(
        &self,
        approver: Address,
        approved: Address,
        monthly_allowance: u64,
    ) -> Result<Delegation> {
        self.inner.upsert_delegation(approver, approved, monthly_allowance).await
    }

    async fn create_transaction(&self, tx: NewTransaction) -> Result<TransactionRecord> {
        self.inner.create_transaction(tx).await
    }

    async fn update_transaction_status(&self, id: TxId, status: TxStatus) -> Result<()> {
        self.inner.update_transaction_status(id, status).await
    }

    async fn read_transaction(&self, id: TxId) -> Result<Option<TransactionRecord>> {
        self.inner.read_transaction(id).await
    }

    async fn read_transactions(&self, profile: Address) -> Result<Vec<TransactionRecord>> {
        self.inner.read_transactions(profile).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}
