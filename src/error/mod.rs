//! Relay error types.
use core::fmt;
use jsonrpsee::core::RpcResult;
use thiserror::Error;

mod auth;
pub use auth::AuthError;

mod quota;
pub use quota::QuotaError;

mod storage;
pub use storage::StorageError;

/// The overarching error type returned by the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A required input was missing or empty.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Errors related to authorization.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// Errors related to quotas and delegations.
    #[error(transparent)]
    Quota(#[from] QuotaError),
    /// Errors related to storage.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Gas estimation for the relayed call failed upstream.
    #[error("gas estimation failed")]
    GasEstimationFailed,
    /// An upstream chain read or broadcast failed.
    #[error("upstream unavailable")]
    Upstream(#[source] eyre::Error),
    /// An internal error occurred.
    #[error(transparent)]
    InternalError(#[from] eyre::Error),
}

impl RelayError {
    /// Wraps an arbitrary error as an internal relay error.
    pub fn internal<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        Self::InternalError(eyre::Error::new(err))
    }
}

impl From<RelayError> for jsonrpsee::types::error::ErrorObject<'static> {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::InvalidArgument(_) => invalid_params(err.to_string()),
            RelayError::Auth(inner) => inner.into(),
            RelayError::Quota(inner) => inner.into(),
            RelayError::Storage(inner) => inner.into(),
            // Internal details are logged at the call site and never leaked
            // across the RPC boundary.
            RelayError::GasEstimationFailed
            | RelayError::Upstream(_)
            | RelayError::InternalError(_) => internal_rpc(coarse_message(&err)),
        }
    }
}

/// The stable message surfaced to callers for internal failures.
fn coarse_message(err: &RelayError) -> &'static str {
    match err {
        RelayError::GasEstimationFailed => "gas estimation failed",
        RelayError::Upstream(_) => "upstream unavailable",
        _ => "internal error",
    }
}

/// A helper trait to provide an RPC error code.
pub trait ToRpcResult<Ok, Err>: Sized {
    /// Converts result to [`RpcResult`] by converting error variant to
    /// [`jsonrpsee::types::error::ErrorObject`]
    fn to_rpc_result(self) -> RpcResult<Ok>
    where
        Err: fmt::Display;
}

macro_rules! impl_error_helpers {
    ($err:ty) => {
        impl<Ok> ToRpcResult<Ok, $err> for Result<Ok, $err> {
            fn to_rpc_result(self) -> RpcResult<Ok> {
                self.map_err(|err| err.into())
            }
        }

        impl From<$err> for String {
            fn from(err: $err) -> Self {
                err.to_string()
            }
        }
    };
}

impl_error_helpers!(RelayError);
impl_error_helpers!(AuthError);
impl_error_helpers!(QuotaError);
impl_error_helpers!(StorageError);

/// Constructs an invalid params JSON‑RPC error.
fn invalid_params(msg: impl Into<String>) -> jsonrpsee::types::error::ErrorObject<'static> {
    rpc_err(jsonrpsee::types::error::INVALID_PARAMS_CODE, msg)
}

/// Constructs an internal JSON‑RPC error.
fn internal_rpc(msg: impl Into<String>) -> jsonrpsee::types::error::ErrorObject<'static> {
    rpc_err(jsonrpsee::types::error::INTERNAL_ERROR_CODE, msg)
}

/// Constructs a JSON‑RPC error with `code` and `message`.
fn rpc_err(code: i32, msg: impl Into<String>) -> jsonrpsee::types::error::ErrorObject<'static> {
    jsonrpsee::types::error::ErrorObject::owned::<()>(code, msg.into(), None)
}
