//! Quota resolution.
//!
//! Two intentionally different computations live here:
//!
//! - [`select_payer`] answers "who pays next" for a single call. It is pure;
//!   storage backends execute it inside their atomic scope so the headroom
//!   check and the debit cannot be split by a concurrent writer.
//! - [`available_quota`] answers "how much could this profile spend in
//!   total", an aggregate view used for status display only.

use crate::{
    constants::QUOTA_UNIT,
    types::{rpc::QuotaStatusResponse, DelegationWithApprover, Payer, Quota, QuotaSnapshot},
};
use chrono::{DateTime, Datelike, TimeZone, Utc};

/// Selects the ledger row that pays for a call estimated at `estimated_gas`.
///
/// The own quota pays whenever the debit fits its allowance. Otherwise
/// delegations granted to the profile are scanned in delegation id order; a
/// delegation is selected if it can itself cover the debit (strictly below
/// its sub-allowance) and its approver's own quota has headroom for it.
///
/// Returns `None` when no row can fund the call.
pub fn select_payer(
    own: &Quota,
    delegations: &[DelegationWithApprover],
    estimated_gas: u64,
) -> Option<Payer> {
    if own.fits(estimated_gas) {
        return Some(Payer::OwnQuota { profile: own.profile_address });
    }

    delegations
        .iter()
        .find(|entry| {
            entry.delegation.can_cover(estimated_gas)
                && entry.approver_quota.fits(estimated_gas)
        })
        .map(|entry| Payer::Delegation { id: entry.delegation.id })
}

/// Computes the aggregate quota view for status display.
///
/// `total` is the own allowance plus, per delegation granted to the profile,
/// the lesser of the delegation's allowance and the approver's remaining
/// headroom. A delegation whose approver is out of headroom contributes
/// nothing to `total`, but its `used` still counts: that gas was spent.
pub fn available_quota(snapshot: &QuotaSnapshot, now: DateTime<Utc>) -> QuotaStatusResponse {
    let mut total = snapshot.own.monthly_allowance;
    let mut used = snapshot.own.used;

    for DelegationWithApprover { delegation, approver_quota } in &snapshot.delegations {
        total += delegation.monthly_allowance.min(approver_quota.headroom());
        used += delegation.used;
    }

    QuotaStatusResponse {
        used,
        unit: QUOTA_UNIT.to_string(),
        total,
        reset_date: next_reset_date(now),
    }
}

/// The first instant of the month after `now`, in unix epoch milliseconds.
///
/// Quotas roll over monthly; the rollover itself is an external process, this
/// only reports when it happens.
pub fn next_reset_date(now: DateTime<Utc>) -> i64 {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };

    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .expect("first of month at midnight is unambiguous")
        .timestamp_millis()
}
