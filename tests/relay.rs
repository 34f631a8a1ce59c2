//! End-to-end tests for the relay orchestrator, driven against in-memory
//! storage and a mock chain adapter.

use alloy::{
    primitives::{Address, Bytes, B256, U256},
    signers::{local::PrivateKeySigner, SignerSync},
};
use async_trait::async_trait;
use quota_relay::{
    chain::{approve_quota_digest, quota_status_digest, relay_call_digest, ChainAdapter, Settlement},
    error::RelayError,
    rpc::{Relay, RelayApiServer},
    storage::{RelayStorage, StorageApi},
    transactions::{ExecutionService, TransactionRecord, TxStatus},
    types::Payer,
};
use std::{str::FromStr, sync::Arc, time::Duration};

/// Well-known test key.
const TEST_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

/// The relayer wallet address used across tests.
fn relayer() -> Address {
    Address::repeat_byte(0xee)
}

/// Chain adapter with scripted responses.
#[derive(Debug)]
struct MockAdapter {
    estimated_gas: u64,
    on_chain_nonce: u64,
    allow: bool,
    fail_estimation: bool,
    fail_broadcast: bool,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self {
            estimated_gas: 21_000,
            on_chain_nonce: 7,
            allow: true,
            fail_estimation: false,
            fail_broadcast: false,
        }
    }
}

#[async_trait]
impl ChainAdapter for MockAdapter {
    async fn has_permission(&self, _: Address, _: Address) -> Result<bool, RelayError> {
        Ok(self.allow)
    }

    async fn estimate_gas(
        &self,
        _: Address,
        _: &Bytes,
        _: &Bytes,
    ) -> Result<u64, RelayError> {
        if self.fail_estimation {
            return Err(RelayError::GasEstimationFailed);
        }
        Ok(self.estimated_gas)
    }

    async fn transaction_count(&self, _: Address) -> Result<u64, RelayError> {
        Ok(self.on_chain_nonce)
    }

    async fn broadcast(&self, record: &TransactionRecord) -> Result<Settlement, RelayError> {
        if self.fail_broadcast {
            return Err(RelayError::Upstream(eyre::eyre!("node down")));
        }
        Ok(Settlement { tx_hash: record.settled_hash, gas_used: record.estimated_gas - 1 })
    }
}

struct Env {
    relay: Relay,
    storage: RelayStorage,
    signer: PrivateKeySigner,
    // Unspawned executor keeps records Pending; hold it so enqueues buffer.
    _service: Option<ExecutionService>,
}

impl Env {
    fn new(default_allowance: u64, adapter: MockAdapter) -> Self {
        Self::build(default_allowance, adapter, false)
    }

    /// Like [`Env::new`], but actually runs the execution service so relayed
    /// calls settle.
    fn with_executor(default_allowance: u64, adapter: MockAdapter) -> Self {
        Self::build(default_allowance, adapter, true)
    }

    fn build(default_allowance: u64, adapter: MockAdapter, spawn: bool) -> Self {
        let storage = RelayStorage::in_memory(default_allowance);
        let adapter = Arc::new(adapter);
        let signer = PrivateKeySigner::from_str(TEST_KEY).unwrap();

        let (service, handle) = ExecutionService::new(storage.clone(), adapter.clone());
        let service = if spawn {
            tokio::spawn(service.run());
            None
        } else {
            Some(service)
        };

        let relay = Relay::new(storage.clone(), adapter, handle, relayer());
        Self { relay, storage, signer, _service: service }
    }

    fn profile(&self) -> Address {
        Address::repeat_byte(0x11)
    }

    fn signed_call(
        &self,
        profile: Address,
        nonce: U256,
    ) -> quota_relay::types::rpc::RelayCallParameters {
        let call_data = Bytes::from_static(b"\xde\xad\xbe\xef");
        let digest = relay_call_digest(profile, nonce, &call_data);
        let signature = self.signer.sign_hash_sync(&digest).unwrap();

        quota_relay::types::rpc::RelayCallParameters {
            address: profile,
            nonce,
            call_data,
            signature: Bytes::from(signature.as_bytes().to_vec()),
        }
    }

    fn signed_quota_request(
        &self,
        profile: Address,
        timestamp: i64,
    ) -> quota_relay::types::rpc::QuotaStatusParameters {
        let digest = quota_status_digest(profile, timestamp);
        let signature = self.signer.sign_hash_sync(&digest).unwrap();
        quota_relay::types::rpc::QuotaStatusParameters {
            address: profile,
            timestamp,
            signature: Bytes::from(signature.as_bytes().to_vec()),
        }
    }

    fn signed_approval(
        &self,
        approver: Address,
        approved: Address,
        allowance: u64,
        timestamp: i64,
    ) -> quota_relay::types::rpc::ApproveQuotaParameters {
        let digest = approve_quota_digest(approver, approved, allowance, timestamp);
        let signature = self.signer.sign_hash_sync(&digest).unwrap();
        quota_relay::types::rpc::ApproveQuotaParameters {
            approver,
            approved,
            monthly_allowance: allowance,
            timestamp,
            signature: Bytes::from(signature.as_bytes().to_vec()),
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[tokio::test]
async fn relay_call_debits_own_quota_and_records_pending() {
    let env = Env::new(650_000, MockAdapter::default());
    let profile = env.profile();

    let params = env.signed_call(profile, U256::from(1));
    let settled_hash = env.relay.call(params).await.unwrap();
    assert_ne!(settled_hash, B256::ZERO);

    let txs = env.relay.list_transactions(profile).await.unwrap();
    assert_eq!(txs.len(), 1);
    let record = &txs[0];
    assert_eq!(record.status, TxStatus::Pending);
    assert_eq!(record.settled_hash, settled_hash);
    assert_eq!(record.payer, Payer::OwnQuota { profile });
    assert_eq!(record.estimated_gas, 21_000);
    // No pending records existed, so the wallet's transaction count is used.
    assert_eq!(record.relayer_nonce, 7);

    let snapshot = env.storage.quota_snapshot(profile).await.unwrap();
    assert_eq!(snapshot.own.used, 21_000);
}

#[tokio::test]
async fn channel_comes_from_high_nonce_bits() {
    let env = Env::new(650_000, MockAdapter::default());
    let profile = env.profile();

    let nonce = (U256::from(2) << 128) | U256::from(1);
    env.relay.call(env.signed_call(profile, nonce)).await.unwrap();

    let txs = env.relay.list_transactions(profile).await.unwrap();
    assert_eq!(txs[0].channel_id, 2);
}

#[tokio::test]
async fn duplicate_authorization_is_rejected_once() {
    let env = Env::new(650_000, MockAdapter::default());
    let profile = env.profile();

    let params = env.signed_call(profile, U256::from(9));
    env.relay.call(params.clone()).await.unwrap();

    let err = env.relay.call(params).await.unwrap_err();
    assert!(err.message().contains("already used"), "unexpected error: {err:?}");

    // The replay debited nothing.
    let snapshot = env.storage.quota_snapshot(profile).await.unwrap();
    assert_eq!(snapshot.own.used, 21_000);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_calls_never_overshoot_the_allowance() {
    // 3 calls of 30k fit into 100k, the rest must fail.
    let env = Env::new(100_000, MockAdapter { estimated_gas: 30_000, ..Default::default() });
    let profile = env.profile();

    let mut handles = Vec::new();
    for i in 0..10u64 {
        let relay = env.relay.clone();
        let params = env.signed_call(profile, U256::from(i));
        handles.push(tokio::spawn(async move { relay.call(params).await }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            successes += 1;
        }
    }
    assert_eq!(successes, 3);

    let snapshot = env.storage.quota_snapshot(profile).await.unwrap();
    assert_eq!(snapshot.own.used, 90_000);
    assert!(snapshot.own.used <= snapshot.own.monthly_allowance);
}

#[tokio::test(flavor = "multi_thread")]
async fn relayer_nonces_are_gap_free_under_concurrency() {
    let env = Env::new(1_000_000, MockAdapter::default());
    let profile = env.profile();

    let mut handles = Vec::new();
    for i in 0..8u64 {
        let relay = env.relay.clone();
        let params = env.signed_call(profile, U256::from(i));
        handles.push(tokio::spawn(async move { relay.call(params).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let mut nonces: Vec<u64> = env
        .relay
        .list_transactions(profile)
        .await
        .unwrap()
        .iter()
        .map(|tx| tx.relayer_nonce)
        .collect();
    nonces.sort_unstable();

    // Strictly increasing, gap-free, starting at the wallet's count.
    assert_eq!(nonces, (7..15).collect::<Vec<_>>());
}

#[tokio::test]
async fn delegation_pays_when_own_quota_is_exhausted() {
    let env = Env::new(100_000, MockAdapter { estimated_gas: 100_000, ..Default::default() });
    let profile = env.profile();
    let approver = Address::repeat_byte(0x22);

    // Exhaust the profile's own quota.
    env.relay.call(env.signed_call(profile, U256::from(1))).await.unwrap();

    // Without a delegation the next call has no payer.
    let err = env.relay.call(env.signed_call(profile, U256::from(2))).await.unwrap_err();
    assert!(err.message().contains("quota exceeded"), "unexpected error: {err:?}");

    // Grant a delegation and retry.
    env.relay
        .approve_quota(env.signed_approval(approver, profile, 150_000, now_ms()))
        .await
        .unwrap();
    env.relay.call(env.signed_call(profile, U256::from(3))).await.unwrap();

    let snapshot = env.storage.quota_snapshot(profile).await.unwrap();
    assert_eq!(snapshot.own.used, 100_000);
    assert_eq!(snapshot.delegations.len(), 1);
    let entry = &snapshot.delegations[0];
    // The debit lands on the delegation row alone.
    assert_eq!(entry.delegation.used, 100_000);
    assert_eq!(entry.approver_quota.used, 0);

    let txs = env.relay.list_transactions(profile).await.unwrap();
    assert_eq!(txs[0].payer, Payer::Delegation { id: entry.delegation.id });
}

#[tokio::test]
async fn quota_status_aggregates_own_and_delegated() {
    let env = Env::new(100_000, MockAdapter { estimated_gas: 40_000, ..Default::default() });
    let profile = env.profile();
    let approver = Address::repeat_byte(0x22);

    env.relay.call(env.signed_call(profile, U256::from(1))).await.unwrap();
    env.relay
        .approve_quota(env.signed_approval(approver, profile, 50_000, now_ms()))
        .await
        .unwrap();

    let status = env.relay.quota(env.signed_quota_request(profile, now_ms())).await.unwrap();
    // Own allowance plus the delegation capped at the approver's headroom.
    assert_eq!(status.total, 100_000 + 50_000);
    assert_eq!(status.used, 40_000);
    assert_eq!(status.unit, "gas");

    let expected_reset = quota_relay::quota::next_reset_date(chrono::Utc::now());
    assert_eq!(status.reset_date, expected_reset);
}

#[tokio::test]
async fn stale_attestations_are_rejected_despite_valid_signatures() {
    let env = Env::new(650_000, MockAdapter::default());
    let profile = env.profile();

    let err = env
        .relay
        .quota(env.signed_quota_request(profile, now_ms() - 6_000))
        .await
        .unwrap_err();
    assert!(err.message().contains("stale"), "unexpected error: {err:?}");

    let approver = Address::repeat_byte(0x22);
    let err = env
        .relay
        .approve_quota(env.signed_approval(approver, profile, 50_000, now_ms() - 6_000))
        .await
        .unwrap_err();
    assert!(err.message().contains("stale"), "unexpected error: {err:?}");
}

#[tokio::test]
async fn unauthorized_signers_leave_no_trace() {
    let env = Env::new(650_000, MockAdapter { allow: false, ..Default::default() });
    let profile = env.profile();

    let err = env.relay.call(env.signed_call(profile, U256::from(1))).await.unwrap_err();
    assert!(err.message().contains("no execute permission"), "unexpected error: {err:?}");

    // Authorization failed before any side effect.
    assert!(env.relay.list_transactions(profile).await.unwrap().is_empty());
    let snapshot = env.storage.quota_snapshot(profile).await.unwrap();
    assert_eq!(snapshot.own.used, 0);
}

#[tokio::test]
async fn mangled_signatures_do_not_recover() {
    let env = Env::new(650_000, MockAdapter::default());
    let profile = env.profile();

    let mut params = env.signed_call(profile, U256::from(1));
    params.signature = Bytes::from_static(&[0xab; 12]);

    let err = env.relay.call(params).await.unwrap_err();
    assert!(err.message().contains("invalid signature"), "unexpected error: {err:?}");
}

#[tokio::test]
async fn empty_call_data_is_an_argument_error() {
    let env = Env::new(650_000, MockAdapter::default());
    let profile = env.profile();

    let mut params = env.signed_call(profile, U256::from(1));
    params.call_data = Bytes::new();

    let err = env.relay.call(params).await.unwrap_err();
    assert!(err.message().contains("invalid argument"), "unexpected error: {err:?}");
}

#[tokio::test]
async fn failed_estimation_surfaces_without_side_effects() {
    let env = Env::new(650_000, MockAdapter { fail_estimation: true, ..Default::default() });
    let profile = env.profile();

    let err = env.relay.call(env.signed_call(profile, U256::from(1))).await.unwrap_err();
    assert!(err.message().contains("gas estimation failed"), "unexpected error: {err:?}");
    assert!(env.relay.list_transactions(profile).await.unwrap().is_empty());
}

#[tokio::test]
async fn records_settle_exactly_once() {
    let env = Env::new(650_000, MockAdapter::default());
    let profile = env.profile();

    env.relay.call(env.signed_call(profile, U256::from(1))).await.unwrap();
    let id = env.relay.list_transactions(profile).await.unwrap()[0].id;

    env.storage
        .update_transaction_status(id, TxStatus::Confirmed { gas_used: 20_000 })
        .await
        .unwrap();
    assert_eq!(
        env.relay.transaction_status(id).await.unwrap(),
        TxStatus::Confirmed { gas_used: 20_000 }
    );

    // Terminal states are sticky.
    let err = env
        .storage
        .update_transaction_status(id, TxStatus::Failed { reason: "late".into() })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already settled"), "unexpected error: {err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn executor_confirms_broadcast_calls() {
    let env = Env::with_executor(650_000, MockAdapter::default());
    let profile = env.profile();

    env.relay.call(env.signed_call(profile, U256::from(1))).await.unwrap();
    let id = env.relay.list_transactions(profile).await.unwrap()[0].id;

    let mut status = TxStatus::Pending;
    for _ in 0..100 {
        status = env.relay.transaction_status(id).await.unwrap();
        if status.is_final() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, TxStatus::Confirmed { gas_used: 20_999 });
}

#[tokio::test(flavor = "multi_thread")]
async fn executor_records_broadcast_failures() {
    let env = Env::with_executor(650_000, MockAdapter { fail_broadcast: true, ..Default::default() });
    let profile = env.profile();

    env.relay.call(env.signed_call(profile, U256::from(1))).await.unwrap();
    let id = env.relay.list_transactions(profile).await.unwrap()[0].id;

    let mut status = TxStatus::Pending;
    for _ in 0..100 {
        status = env.relay.transaction_status(id).await.unwrap();
        if status.is_final() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, TxStatus::Failed { reason: "broadcast failed".to_string() });
}

#[tokio::test]
async fn transactions_list_newest_first() {
    let env = Env::new(650_000, MockAdapter::default());
    let profile = env.profile();

    for i in 0..3u64 {
        env.relay.call(env.signed_call(profile, U256::from(i))).await.unwrap();
    }

    let txs = env.relay.list_transactions(profile).await.unwrap();
    assert_eq!(txs.len(), 3);
    // Newest first: descending relayer nonces since they were assigned in order.
    assert!(txs.windows(2).all(|w| w[0].relayer_nonce > w[1].relayer_nonce));
}

#[tokio::test]
async fn health_reports_version() {
    let env = Env::new(650_000, MockAdapter::default());
    let health = env.relay.health().await.unwrap();
    assert_eq!(health.status, "ok");
    assert!(!health.version.is_empty());
}
