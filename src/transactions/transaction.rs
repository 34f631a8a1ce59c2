use crate::{constants::CHANNEL_ID_SHIFT, types::Payer};
use alloy::primitives::{keccak256, wrap_fixed_bytes, Address, Bytes, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

wrap_fixed_bytes! {
    /// An id of a transaction record in the relay ledger.
    ///
    /// Derived from the relayed authorization, so a replayed authorization
    /// maps to the same id. This is different from the settlement hash, which
    /// identifies the eventual on-chain broadcast.
    pub struct TxId<32>;
}

impl TxId {
    /// Derives the ledger id for a relayed authorization.
    pub fn derive(profile: Address, call_nonce: U256, signer: Address) -> Self {
        let mut buf = [0u8; 20 + 32 + 20];
        buf[..20].copy_from_slice(profile.as_slice());
        buf[20..52].copy_from_slice(&call_nonce.to_be_bytes::<32>());
        buf[52..].copy_from_slice(signer.as_slice());
        Self(keccak256(buf))
    }
}

/// Extracts the logical channel id from a call nonce.
///
/// The high 128 bits of the nonce encode the channel, so independent nonce
/// streams can run per channel. The shifted value is truncated to 64 bits.
pub fn channel_id(call_nonce: U256) -> u64 {
    (call_nonce >> CHANNEL_ID_SHIFT).as_limbs()[0]
}

/// Lifecycle state of a relayed transaction.
///
/// Records are created `Pending` in the same atomic unit that debits the
/// payer. The asynchronous executor moves them to exactly one terminal state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TxStatus {
    /// Authorized and debited, not yet settled on-chain.
    Pending,
    /// Settled on-chain.
    #[serde(rename_all = "camelCase")]
    Confirmed {
        /// Gas actually consumed by the broadcast.
        gas_used: u64,
    },
    /// The broadcast failed.
    Failed {
        /// Coarse failure reason.
        reason: String,
    },
}

impl TxStatus {
    /// Whether the status is terminal.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Confirmed { .. } | Self::Failed { .. })
    }
}

/// A durable record of one relay attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// Ledger id of the record.
    pub id: TxId,
    /// The profile the call was executed for.
    pub profile_address: Address,
    /// The call nonce signed into the authorization.
    pub call_nonce: U256,
    /// Channel extracted from the high bits of the call nonce.
    pub channel_id: u64,
    /// The signer recovered from the authorization.
    pub signer_address: Address,
    /// The authorization signature.
    pub signature: Bytes,
    /// The relayed call payload.
    pub call_data: Bytes,
    /// Lifecycle state.
    pub status: TxStatus,
    /// The relayer wallet that broadcasts the call.
    pub relayer_address: Address,
    /// The relayer wallet nonce reserved for this record.
    pub relayer_nonce: u64,
    /// Gas estimate the payer was debited for.
    pub estimated_gas: u64,
    /// Identifier of the eventual on-chain broadcast.
    pub settled_hash: B256,
    /// The ledger row the estimate was debited from.
    pub payer: Payer,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Inputs for creating a `Pending` transaction record.
///
/// The payer and relayer nonce are resolved by storage inside the same atomic
/// unit as the insert; everything here is known beforehand.
#[derive(Clone, Debug)]
pub struct NewTransaction {
    /// The profile the call is executed for.
    pub profile_address: Address,
    /// The call nonce signed into the authorization.
    pub call_nonce: U256,
    /// Channel extracted from the call nonce.
    pub channel_id: u64,
    /// The signer recovered from the authorization.
    pub signer_address: Address,
    /// The authorization signature.
    pub signature: Bytes,
    /// The relayed call payload.
    pub call_data: Bytes,
    /// Gas estimate to debit the payer for.
    pub estimated_gas: u64,
    /// The relayer wallet that will broadcast the call.
    pub relayer_address: Address,
    /// The relayer wallet's on-chain transaction count, read before the
    /// atomic scope. Used for nonce assignment only when no `Pending` record
    /// exists for the relayer.
    pub relayer_nonce_fallback: u64,
    /// Precomputed settlement hash.
    pub settled_hash: B256,
}

impl NewTransaction {
    /// The ledger id this record will be created under.
    pub fn id(&self) -> TxId {
        TxId::derive(self.profile_address, self.call_nonce, self.signer_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_is_high_bits() {
        let nonce = (U256::from(2) << 128) | U256::from(1);
        assert_eq!(channel_id(nonce), 2);

        assert_eq!(channel_id(U256::from(7)), 0);
        assert_eq!(channel_id(U256::from(3) << 128), 3);
    }

    #[test]
    fn tx_id_depends_on_authorization() {
        let profile = Address::repeat_byte(1);
        let signer = Address::repeat_byte(2);

        let a = TxId::derive(profile, U256::from(1), signer);
        let b = TxId::derive(profile, U256::from(1), signer);
        let c = TxId::derive(profile, U256::from(2), signer);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
