//! Boundary to the chain: signer recovery, permission checks, gas estimation
//! and broadcasting.
//!
//! The relay core treats everything here as an external primitive. Digest
//! construction and signature recovery are local crypto; the [`ChainAdapter`]
//! trait covers the operations that touch the network.

use crate::{
    error::{AuthError, RelayError},
    transactions::TransactionRecord,
};
use alloy::{
    network::TransactionBuilder,
    primitives::{keccak256, Address, Bytes, Signature, B256, U256},
    providers::{DynProvider, Provider},
    rpc::types::TransactionRequest,
    sol,
};
use async_trait::async_trait;
use std::fmt::Debug;

sol! {
    #[sol(rpc)]
    interface IProfileGate {
        /// Whether `signer` may execute calls on behalf of `profile`.
        function hasPermission(address profile, address signer) external view returns (bool);
    }
}

/// Digest signed by a profile's key to authorize a relayed call.
pub fn relay_call_digest(profile: Address, call_nonce: U256, call_data: &Bytes) -> B256 {
    let mut buf = [0u8; 20 + 32 + 32];
    buf[..20].copy_from_slice(profile.as_slice());
    buf[20..52].copy_from_slice(&call_nonce.to_be_bytes::<32>());
    buf[52..].copy_from_slice(keccak256(call_data).as_slice());
    keccak256(buf)
}

/// Digest signed to attest a quota status request.
pub fn quota_status_digest(profile: Address, timestamp: i64) -> B256 {
    let mut buf = [0u8; 20 + 8];
    buf[..20].copy_from_slice(profile.as_slice());
    buf[20..].copy_from_slice(&timestamp.to_be_bytes());
    keccak256(buf)
}

/// Digest signed by an approver to grant a delegation.
pub fn approve_quota_digest(
    approver: Address,
    approved: Address,
    monthly_allowance: u64,
    timestamp: i64,
) -> B256 {
    let mut buf = [0u8; 20 + 20 + 8 + 8];
    buf[..20].copy_from_slice(approver.as_slice());
    buf[20..40].copy_from_slice(approved.as_slice());
    buf[40..48].copy_from_slice(&monthly_allowance.to_be_bytes());
    buf[48..].copy_from_slice(&timestamp.to_be_bytes());
    keccak256(buf)
}

/// The identifier of the eventual on-chain broadcast for an authorization.
///
/// A pure function of the authorization itself, so it is known at creation
/// time, before the broadcast happens.
pub fn settlement_hash(
    profile: Address,
    call_nonce: U256,
    call_data: &Bytes,
    signature: &Bytes,
) -> B256 {
    let mut buf = Vec::with_capacity(20 + 32 + 32 + signature.len());
    buf.extend_from_slice(profile.as_slice());
    buf.extend_from_slice(&call_nonce.to_be_bytes::<32>());
    buf.extend_from_slice(keccak256(call_data).as_slice());
    buf.extend_from_slice(signature);
    keccak256(buf)
}

/// Recovers the signer address from a digest and signature.
pub fn recover_signer(digest: B256, signature: &Bytes) -> Result<Address, AuthError> {
    let signature =
        Signature::try_from(signature.as_ref()).map_err(|_| AuthError::SignatureInvalid)?;
    signature.recover_address_from_prehash(&digest).map_err(|_| AuthError::SignatureInvalid)
}

/// Outcome of a settled broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settlement {
    /// Hash of the on-chain transaction.
    pub tx_hash: B256,
    /// Gas actually consumed.
    pub gas_used: u64,
}

/// Network-facing operations consumed by the relay core.
#[async_trait]
pub trait ChainAdapter: Debug + Send + Sync {
    /// Whether `signer` may execute calls on behalf of `profile`.
    async fn has_permission(&self, profile: Address, signer: Address)
        -> Result<bool, RelayError>;

    /// Estimates gas for forwarding `call_data` to `profile`.
    async fn estimate_gas(
        &self,
        profile: Address,
        call_data: &Bytes,
        signature: &Bytes,
    ) -> Result<u64, RelayError>;

    /// The wallet's current on-chain transaction count, including pending.
    async fn transaction_count(&self, wallet: Address) -> Result<u64, RelayError>;

    /// Broadcasts the relayed call and waits for inclusion.
    async fn broadcast(&self, record: &TransactionRecord) -> Result<Settlement, RelayError>;
}

/// [`ChainAdapter`] backed by an alloy provider.
///
/// The provider is expected to carry the relayer wallet so broadcasts are
/// signed and sent from the funded operational account.
#[derive(Clone, Debug)]
pub struct ProviderAdapter {
    provider: DynProvider,
    gate: Address,
}

impl ProviderAdapter {
    /// Creates a new adapter using `gate` as the permission registry.
    pub fn new(provider: DynProvider, gate: Address) -> Self {
        Self { provider, gate }
    }
}

#[async_trait]
impl ChainAdapter for ProviderAdapter {
    async fn has_permission(
        &self,
        profile: Address,
        signer: Address,
    ) -> Result<bool, RelayError> {
        IProfileGate::new(self.gate, self.provider.clone())
            .hasPermission(profile, signer)
            .call()
            .await
            .map_err(|err| RelayError::Upstream(err.into()))
    }

    async fn estimate_gas(
        &self,
        profile: Address,
        call_data: &Bytes,
        _signature: &Bytes,
    ) -> Result<u64, RelayError> {
        let tx = TransactionRequest::default().with_to(profile).with_input(call_data.clone());
        self.provider.estimate_gas(tx).await.map_err(|_| RelayError::GasEstimationFailed)
    }

    async fn transaction_count(&self, wallet: Address) -> Result<u64, RelayError> {
        self.provider
            .get_transaction_count(wallet)
            .pending()
            .await
            .map_err(|err| RelayError::Upstream(err.into()))
    }

    async fn broadcast(&self, record: &TransactionRecord) -> Result<Settlement, RelayError> {
        let tx = TransactionRequest::default()
            .with_from(record.relayer_address)
            .with_to(record.profile_address)
            .with_input(record.call_data.clone())
            .with_nonce(record.relayer_nonce)
            .with_gas_limit(record.estimated_gas);

        let receipt = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|err| RelayError::Upstream(err.into()))?
            .get_receipt()
            .await
            .map_err(|err| RelayError::Upstream(err.into()))?;

        Ok(Settlement { tx_hash: receipt.transaction_hash, gas_used: receipt.gas_used })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settlement_hash_is_deterministic() {
        let profile = Address::repeat_byte(0xaa);
        let call_data = Bytes::from_static(b"\x01\x02");
        let signature = Bytes::from_static(&[0x33; 65]);

        let a = settlement_hash(profile, U256::from(1), &call_data, &signature);
        let b = settlement_hash(profile, U256::from(1), &call_data, &signature);
        assert_eq!(a, b);

        let c = settlement_hash(profile, U256::from(2), &call_data, &signature);
        assert_ne!(a, c);
    }

    #[test]
    fn garbage_signature_does_not_recover() {
        let digest = relay_call_digest(Address::ZERO, U256::ZERO, &Bytes::new());
        assert!(matches!(
            recover_signer(digest, &Bytes::from_static(&[0u8; 10])),
            Err(AuthError::SignatureInvalid)
        ));
    }
}
