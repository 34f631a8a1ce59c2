//! Relay storage implementation in-memory. For testing only.

use super::{api::Result, StorageApi};
use crate::{
    error::{QuotaError, StorageError},
    nonce::next_relayer_nonce,
    quota::select_payer,
    transactions::{NewTransaction, TransactionRecord, TxId, TxStatus},
    types::{Delegation, DelegationWithApprover, Payer, Quota, QuotaSnapshot},
};
use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// [`StorageApi`] implementation in-memory. Used for testing.
///
/// A single mutex over the whole state stands in for the database's
/// serializable scope: every operation observes and mutates the ledger
/// atomically, which is exactly the isolation [`StorageApi`] demands of
/// `create_transaction`.
#[derive(Debug)]
pub struct InMemoryStorage {
    default_allowance: u64,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    quotas: HashMap<Address, Quota>,
    delegations: Vec<Delegation>,
    next_delegation_id: i64,
    txs: HashMap<TxId, TransactionRecord>,
}

impl InMemoryStorage {
    /// Creates an empty in-memory store.
    pub fn new(default_allowance: u64) -> Self {
        Self { default_allowance, inner: Mutex::new(Inner::default()) }
    }
}

impl Inner {
    fn ensure_quota(&mut self, profile: Address, default_allowance: u64) -> Quota {
        self.quotas
            .entry(profile)
            .or_insert_with(|| Quota {
                profile_address: profile,
                monthly_allowance: default_allowance,
                used: 0,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .clone()
    }

    /// Delegations granted to `profile`, paired with their approver quotas,
    /// in delegation id order.
    fn delegations_for(&mut self, profile: Address, default_allowance: u64) -> Vec<DelegationWithApprover> {
        let mut granted: Vec<Delegation> = self
            .delegations
            .iter()
            .filter(|d| d.approved_address == profile)
            .cloned()
            .collect();
        granted.sort_by_key(|d| d.id);

        granted
            .into_iter()
            .map(|delegation| {
                let approver_quota =
                    self.ensure_quota(delegation.approver_address, default_allowance);
                DelegationWithApprover { delegation, approver_quota }
            })
            .collect()
    }
}

#[async_trait]
impl StorageApi for InMemoryStorage {
    async fn ensure_quota(&self, profile: Address) -> Result<Quota> {
        Ok(self.inner.lock().await.ensure_quota(profile, self.default_allowance))
    }

    async fn quota_snapshot(&self, profile: Address) -> Result<QuotaSnapshot> {
        let mut inner = self.inner.lock().await;
        let own = inner.ensure_quota(profile, self.default_allowance);
        let delegations = inner.delegations_for(profile, self.default_allowance);
        Ok(QuotaSnapshot { own, delegations })
    }

    async fn upsert_delegation(
        &self,
        approver: Address,
        approved: Address,
        monthly_allowance: u64,
    ) -> Result<Delegation> {
        let mut inner = self.inner.lock().await;
        inner.ensure_quota(approver, self.default_allowance);
        inner.ensure_quota(approved, self.default_allowance);

        if let Some(existing) = inner
            .delegations
            .iter_mut()
            .find(|d| d.approver_address == approver && d.approved_address == approved)
        {
            existing.monthly_allowance = monthly_allowance;
            existing.updated_at = Utc::now();
            return Ok(existing.clone());
        }

        inner.next_delegation_id += 1;
        let delegation = Delegation {
            id: inner.next_delegation_id,
            approver_address: approver,
            approved_address: approved,
            monthly_allowance,
            used: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        inner.delegations.push(delegation.clone());
        Ok(delegation)
    }

    async fn create_transaction(&self, tx: NewTransaction) -> Result<TransactionRecord> {
        let mut inner = self.inner.lock().await;

        // Replay check first: a duplicate must fail before any debit.
        let replayed = inner.txs.values().any(|existing| {
            existing.call_nonce == tx.call_nonce
                && existing.channel_id == tx.channel_id
                && existing.signer_address == tx.signer_address
        });
        if replayed {
            return Err(StorageError::DuplicateAuthorization);
        }

        let own = inner.ensure_quota(tx.profile_address, self.default_allowance);
        let delegations = inner.delegations_for(tx.profile_address, self.default_allowance);
        let payer = select_payer(&own, &delegations, tx.estimated_gas)
            .ok_or(QuotaError::Exceeded { profile: tx.profile_address })?;

        match payer {
            Payer::OwnQuota { profile } => {
                let quota = inner.quotas.get_mut(&profile).expect("quota ensured above");
                quota.used += tx.estimated_gas;
                quota.updated_at = Utc::now();
            }
            Payer::Delegation { id } => {
                let delegation = inner
                    .delegations
                    .iter_mut()
                    .find(|d| d.id == id)
                    .expect("selected delegation exists");
                delegation.used += tx.estimated_gas;
                delegation.updated_at = Utc::now();
            }
        }

        let latest_pending = inner
            .txs
            .values()
            .filter(|t| t.relayer_address == tx.relayer_address && t.status == TxStatus::Pending)
            .map(|t| t.relayer_nonce)
            .max();
        let relayer_nonce = next_relayer_nonce(latest_pending, tx.relayer_nonce_fallback);

        let record = TransactionRecord {
            id: tx.id(),
            profile_address: tx.profile_address,
            call_nonce: tx.call_nonce,
            channel_id: tx.channel_id,
            signer_address: tx.signer_address,
            signature: tx.signature,
            call_data: tx.call_data,
            status: TxStatus::Pending,
            relayer_address: tx.relayer_address,
            relayer_nonce,
            estimated_gas: tx.estimated_gas,
            settled_hash: tx.settled_hash,
            payer,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        inner.txs.insert(record.id, record.clone());

        Ok(record)
    }

    async fn update_transaction_status(&self, id: TxId, status: TxStatus) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let record = inner.txs.get_mut(&id).ok_or(StorageError::TxNotFound(id))?;

        if record.status.is_final() {
            return Err(StorageError::AlreadySettled(id));
        }

        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn read_transaction(&self, id: TxId) -> Result<Option<TransactionRecord>> {
        Ok(self.inner.lock().await.txs.get(&id).cloned())
    }

    async fn read_transactions(&self, profile: Address) -> Result<Vec<TransactionRecord>> {
        let inner = self.inner.lock().await;
        let mut txs: Vec<TransactionRecord> =
            inner.txs.values().filter(|t| t.profile_address == profile).cloned().collect();
        txs.sort_by(|a, b| {
            b.created_at.cmp(&a.created_at).then(b.relayer_nonce.cmp(&a.relayer_nonce))
        });
        Ok(txs)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
