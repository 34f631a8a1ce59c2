use super::invalid_params;
use alloy::primitives::Address;
use thiserror::Error;

/// Errors related to relay authorization.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The signature could not be parsed or did not recover to any address.
    #[error("invalid signature")]
    SignatureInvalid,
    /// The recovered signer is not permitted to execute calls for the profile.
    #[error("signer {signer} has no execute permission for {profile}")]
    Unauthorized {
        /// The profile the call was made for.
        profile: Address,
        /// The signer recovered from the payload.
        signer: Address,
    },
    /// The signed timestamp is outside the accepted freshness window.
    #[error("signed timestamp is stale")]
    StaleTimestamp,
}

impl From<AuthError> for jsonrpsee::types::error::ErrorObject<'static> {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::SignatureInvalid
            | AuthError::Unauthorized { .. }
            | AuthError::StaleTimestamp => invalid_params(err.to_string()),
        }
    }
}
