use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row id of a [`Delegation`].
pub type DelegationId = i64;

/// A profile's own monthly gas allowance and usage counter.
///
/// Created lazily with a default allowance the first time a profile touches
/// the relay. `used` is monotonically non-decreasing within a period; the
/// monthly rollover is driven by an external process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    /// The profile this quota belongs to.
    pub profile_address: Address,
    /// Gas units the profile may spend per month.
    pub monthly_allowance: u64,
    /// Gas units already debited this month.
    pub used: u64,
    /// When the quota was created.
    pub created_at: DateTime<Utc>,
    /// When the quota was last debited.
    pub updated_at: DateTime<Utc>,
}

impl Quota {
    /// Whether debiting `estimated_gas` keeps `used` within the allowance.
    pub fn fits(&self, estimated_gas: u64) -> bool {
        self.used.saturating_add(estimated_gas) <= self.monthly_allowance
    }

    /// Remaining headroom of this quota.
    pub fn headroom(&self) -> u64 {
        self.monthly_allowance.saturating_sub(self.used)
    }
}

/// A grant allowing `approver_address` to cover gas spent by
/// `approved_address`, up to the delegation's own sub-allowance.
///
/// At most one active delegation exists per `(approver, approved)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    /// Row id, also the deterministic payer-selection order.
    pub id: DelegationId,
    /// The profile covering the gas.
    pub approver_address: Address,
    /// The profile allowed to spend against the approver.
    pub approved_address: Address,
    /// Gas units this delegation may cover per month.
    pub monthly_allowance: u64,
    /// Gas units already debited from this delegation this month.
    pub used: u64,
    /// When the delegation was granted.
    pub created_at: DateTime<Utc>,
    /// When the delegation was last debited or refreshed.
    pub updated_at: DateTime<Utc>,
}

impl Delegation {
    /// Whether this delegation can itself cover the estimated gas.
    ///
    /// The sub-allowance check is strict: a delegation whose debit would
    /// reach its allowance exactly is skipped during payer selection.
    pub fn can_cover(&self, estimated_gas: u64) -> bool {
        self.used.saturating_add(estimated_gas) < self.monthly_allowance
    }
}

/// A delegation granted to a profile, paired with the approver's own quota.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelegationWithApprover {
    /// The delegation row.
    pub delegation: Delegation,
    /// The approver's own quota, backing the delegation.
    pub approver_quota: Quota,
}

/// The ledger rows relevant to one profile's spending, read in one
/// consistent snapshot: its own quota and every delegation granted to it.
#[derive(Clone, Debug)]
pub struct QuotaSnapshot {
    /// The profile's own quota.
    pub own: Quota,
    /// Delegations granted to the profile, ordered by delegation id.
    pub delegations: Vec<DelegationWithApprover>,
}

/// The ledger row a relayed call is debited against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Payer {
    /// The profile's own quota pays.
    OwnQuota {
        /// The quota owner, always the requesting profile.
        profile: Address,
    },
    /// A delegation granted to the profile pays.
    Delegation {
        /// The delegation row id.
        id: DelegationId,
    },
}
