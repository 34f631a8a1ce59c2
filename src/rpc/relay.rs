//! Implementation of the `relay_` namespace.
//!
//! - `relay_call` authorizes a signed meta-transaction, debits the resolved
//!   payer and hands the broadcast off to the asynchronous executor.
//! - `relay_quota` reports the aggregate allowance view for a profile.
//! - `relay_approveQuota` grants a delegation of spending rights.

use crate::{
    chain::{
        approve_quota_digest, quota_status_digest, recover_signer, relay_call_digest,
        settlement_hash, ChainAdapter,
    },
    constants::TIMESTAMP_FRESHNESS_MS,
    error::{AuthError, QuotaError, RelayError, ToRpcResult},
    metrics::RelayMetrics,
    quota::available_quota,
    storage::{RelayStorage, StorageApi},
    transactions::{
        channel_id, ExecutionServiceHandle, NewTransaction, TransactionRecord, TxId, TxStatus,
        WorkItem,
    },
    types::{
        rpc::{
            ApproveQuotaParameters, Health, QuotaStatusParameters, QuotaStatusResponse,
            RelayCallParameters,
        },
        Delegation,
    },
    version::RELAY_VERSION,
};
use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use jsonrpsee::{
    core::{async_trait, RpcResult},
    proc_macros::rpc,
};
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// Relay `relay_` RPC namespace.
#[rpc(server, client, namespace = "relay")]
pub trait RelayApi {
    /// Checks the health of the relay and returns its version.
    #[method(name = "health")]
    async fn health(&self) -> RpcResult<Health>;

    /// Authorizes and relays a signed call for a profile. Returns the
    /// settlement hash identifying the eventual on-chain broadcast.
    #[method(name = "call")]
    async fn call(&self, parameters: RelayCallParameters) -> RpcResult<B256>;

    /// Lists a profile's transaction records, newest first.
    #[method(name = "listTransactions")]
    async fn list_transactions(&self, address: Address) -> RpcResult<Vec<TransactionRecord>>;

    /// Reports the aggregate quota view for a profile. The request is a
    /// self-signed attestation with a freshness-checked timestamp.
    #[method(name = "quota")]
    async fn quota(&self, parameters: QuotaStatusParameters) -> RpcResult<QuotaStatusResponse>;

    /// Grants or refreshes a delegation of quota from an approver to an
    /// approved profile.
    #[method(name = "approveQuota")]
    async fn approve_quota(&self, parameters: ApproveQuotaParameters) -> RpcResult<Delegation>;

    /// The current lifecycle state of a transaction record.
    #[method(name = "transactionStatus")]
    async fn transaction_status(&self, id: TxId) -> RpcResult<TxStatus>;
}

/// Implementation of the `relay_` namespace.
#[derive(Debug, Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

#[derive(Debug)]
struct RelayInner {
    storage: RelayStorage,
    adapter: Arc<dyn ChainAdapter>,
    executor: ExecutionServiceHandle,
    relayer: Address,
}

impl Relay {
    /// Create a new relay module.
    pub fn new(
        storage: RelayStorage,
        adapter: Arc<dyn ChainAdapter>,
        executor: ExecutionServiceHandle,
        relayer: Address,
    ) -> Self {
        Self { inner: Arc::new(RelayInner { storage, adapter, executor, relayer }) }
    }

    /// Recovers the signer of `digest` and checks it may act for `profile`.
    ///
    /// Runs, and must pass, before any quota mutation or transaction insert.
    async fn authorize(
        &self,
        profile: Address,
        digest: B256,
        signature: &alloy::primitives::Bytes,
    ) -> Result<Address, RelayError> {
        let signer = recover_signer(digest, signature)?;
        if !self.inner.adapter.has_permission(profile, signer).await? {
            return Err(AuthError::Unauthorized { profile, signer }.into());
        }
        Ok(signer)
    }

    #[instrument(skip_all, fields(profile = %parameters.address))]
    async fn execute_relay_call(
        &self,
        parameters: RelayCallParameters,
    ) -> Result<B256, RelayError> {
        let RelayCallParameters { address, nonce, call_data, signature } = parameters;

        if call_data.is_empty() {
            return Err(RelayError::InvalidArgument("callData must not be empty"));
        }
        if signature.is_empty() {
            return Err(RelayError::InvalidArgument("signature must not be empty"));
        }

        let digest = relay_call_digest(address, nonce, &call_data);
        let signer = self.authorize(address, digest, &signature).await?;

        let estimated_gas =
            self.inner.adapter.estimate_gas(address, &call_data, &signature).await?;

        // The on-chain fallback for nonce assignment is read before the
        // atomic scope; no lock is held across this network call.
        let relayer_nonce_fallback =
            self.inner.adapter.transaction_count(self.inner.relayer).await?;

        let settled_hash = settlement_hash(address, nonce, &call_data, &signature);
        let record = self
            .inner
            .storage
            .create_transaction(NewTransaction {
                profile_address: address,
                call_nonce: nonce,
                channel_id: channel_id(nonce),
                signer_address: signer,
                signature,
                call_data,
                estimated_gas,
                relayer_address: self.inner.relayer,
                relayer_nonce_fallback,
                settled_hash,
            })
            .await?;

        debug!(
            tx_id = %record.id,
            relayer_nonce = record.relayer_nonce,
            estimated_gas,
            "relay call accepted"
        );
        RelayMetrics::default().accepted_calls.increment(1);
        self.inner.executor.enqueue(WorkItem { tx_id: record.id, payer: record.payer });

        Ok(record.settled_hash)
    }

    #[instrument(skip_all, fields(profile = %parameters.address))]
    async fn quota_status(
        &self,
        parameters: QuotaStatusParameters,
    ) -> Result<QuotaStatusResponse, RelayError> {
        let QuotaStatusParameters { address, timestamp, signature } = parameters;

        if signature.is_empty() {
            return Err(RelayError::InvalidArgument("signature must not be empty"));
        }
        check_freshness(timestamp, Utc::now())?;

        let digest = quota_status_digest(address, timestamp);
        self.authorize(address, digest, &signature).await?;

        let snapshot = self.inner.storage.quota_snapshot(address).await?;
        Ok(available_quota(&snapshot, Utc::now()))
    }

    #[instrument(skip_all, fields(approver = %parameters.approver, approved = %parameters.approved))]
    async fn grant_quota(
        &self,
        parameters: ApproveQuotaParameters,
    ) -> Result<Delegation, RelayError> {
        let ApproveQuotaParameters { approver, approved, monthly_allowance, timestamp, signature } =
            parameters;

        if signature.is_empty() {
            return Err(RelayError::InvalidArgument("signature must not be empty"));
        }
        if monthly_allowance == 0 {
            return Err(QuotaError::ZeroAllowance.into());
        }
        if approver == approved {
            return Err(QuotaError::SelfDelegation.into());
        }
        check_freshness(timestamp, Utc::now())?;

        let digest = approve_quota_digest(approver, approved, monthly_allowance, timestamp);
        self.authorize(approver, digest, &signature).await?;

        Ok(self.inner.storage.upsert_delegation(approver, approved, monthly_allowance).await?)
    }
}

#[async_trait]
impl RelayApiServer for Relay {
    async fn health(&self) -> RpcResult<Health> {
        self.inner
            .storage
            .ping()
            .await
            .inspect_err(|err| error!(%err, "storage unreachable in health check"))
            .map(|_| Health { status: "ok".to_string(), version: RELAY_VERSION.to_string() })
            .to_rpc_result()
    }

    async fn call(&self, parameters: RelayCallParameters) -> RpcResult<B256> {
        self.execute_relay_call(parameters)
            .await
            .inspect_err(|err| {
                RelayMetrics::default().rejected_calls.increment(1);
                error!(%err, "relay call rejected");
            })
            .to_rpc_result()
    }

    async fn list_transactions(&self, address: Address) -> RpcResult<Vec<TransactionRecord>> {
        self.inner.storage.read_transactions(address).await.to_rpc_result()
    }

    async fn quota(&self, parameters: QuotaStatusParameters) -> RpcResult<QuotaStatusResponse> {
        self.quota_status(parameters)
            .await
            .inspect_err(|err| error!(%err, "quota status rejected"))
            .to_rpc_result()
    }

    async fn approve_quota(&self, parameters: ApproveQuotaParameters) -> RpcResult<Delegation> {
        self.grant_quota(parameters)
            .await
            .inspect_err(|err| error!(%err, "quota approval rejected"))
            .to_rpc_result()
    }

    async fn transaction_status(&self, id: TxId) -> RpcResult<TxStatus> {
        self.inner
            .storage
            .read_transaction(id)
            .await
            .to_rpc_result()?
            .map(|record| record.status)
            .ok_or_else(|| crate::error::StorageError::TxNotFound(id).into())
    }
}

/// Rejects signed timestamps outside the accepted freshness window.
fn check_freshness(timestamp_ms: i64, now: DateTime<Utc>) -> Result<(), AuthError> {
    if (now.timestamp_millis() - timestamp_ms).abs() > TIMESTAMP_FRESHNESS_MS {
        return Err(AuthError::StaleTimestamp);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stale_timestamps_are_rejected() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let now_ms = now.timestamp_millis();

        assert!(check_freshness(now_ms, now).is_ok());
        assert!(check_freshness(now_ms - 4_999, now).is_ok());
        assert!(check_freshness(now_ms + 4_999, now).is_ok());
        // 6 seconds in the past: stale regardless of signature validity.
        assert!(matches!(
            check_freshness(now_ms - 6_000, now),
            Err(AuthError::StaleTimestamp)
        ));
        assert!(matches!(
            check_freshness(now_ms + 6_000, now),
            Err(AuthError::StaleTimestamp)
        ));
    }
}
