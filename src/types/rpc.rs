//! RPC request and response types.

use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

/// Parameters for `relay_call`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayCallParameters {
    /// The profile the call is executed for.
    pub address: Address,
    /// The call nonce signed into the authorization. The high 128 bits encode
    /// the channel id.
    pub nonce: U256,
    /// ABI-encoded call payload to forward to the profile.
    pub call_data: Bytes,
    /// Signature over the relay call digest by a signer with execute
    /// permission for the profile.
    pub signature: Bytes,
}

/// Parameters for `relay_quota`.
///
/// A self-signed attestation: the timestamp is checked for freshness before
/// the signature is checked for permission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatusParameters {
    /// The profile to report on.
    pub address: Address,
    /// Signed unix timestamp in milliseconds.
    pub timestamp: i64,
    /// Signature over the attestation digest.
    pub signature: Bytes,
}

/// Response of `relay_quota`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatusResponse {
    /// Gas used this month: own usage plus usage of every delegation granted
    /// to the profile.
    pub used: u64,
    /// Unit of the reported figures.
    pub unit: String,
    /// Total spendable gas: the own allowance plus, for every delegation
    /// granted to the profile, the lesser of the delegation's allowance and
    /// the approver's remaining headroom.
    pub total: u64,
    /// First instant of the next month, in unix epoch milliseconds.
    pub reset_date: i64,
}

/// Parameters for `relay_approveQuota`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveQuotaParameters {
    /// The profile granting part of its allowance.
    pub approver: Address,
    /// The profile allowed to spend against the approver.
    pub approved: Address,
    /// Gas units the delegation may cover per month.
    pub monthly_allowance: u64,
    /// Signed unix timestamp in milliseconds.
    pub timestamp: i64,
    /// Signature over the approval digest by a signer with execute permission
    /// for the approver.
    pub signature: Bytes,
}

/// Relay health status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    /// Health status message.
    pub status: String,
    /// Relay version.
    pub version: String,
}
