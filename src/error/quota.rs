use super::invalid_params;
use alloy::primitives::Address;
use thiserror::Error;

/// Errors related to quotas and delegations.
#[derive(Debug, Error)]
pub enum QuotaError {
    /// Neither the profile's own quota nor any delegation granted to it has
    /// headroom for the estimated gas.
    #[error("monthly gas quota exceeded for {profile}")]
    Exceeded {
        /// The profile whose call could not be funded.
        profile: Address,
    },
    /// A delegation allowance must be a positive amount of gas.
    #[error("delegation allowance must be non-zero")]
    ZeroAllowance,
    /// A profile cannot delegate spending rights to itself.
    #[error("cannot delegate quota to self")]
    SelfDelegation,
}

impl From<QuotaError> for jsonrpsee::types::error::ErrorObject<'static> {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::Exceeded { .. }
            | QuotaError::ZeroAllowance
            | QuotaError::SelfDelegation => invalid_params(err.to_string()),
        }
    }
}
