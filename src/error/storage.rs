use super::{internal_rpc, invalid_params};
use crate::{error::QuotaError, transactions::TxId};
use thiserror::Error;

/// Errors returned by [`RelayStorage`](crate::storage::RelayStorage).
#[derive(Debug, Error)]
pub enum StorageError {
    /// The `(call_nonce, channel_id, signer)` triple was already relayed.
    #[error("authorization was already used")]
    DuplicateAuthorization,
    /// No payer with headroom was found while debiting.
    #[error(transparent)]
    Quota(#[from] QuotaError),
    /// The transaction does not exist.
    #[error("unknown transaction {0}")]
    TxNotFound(TxId),
    /// The status transition is not allowed, only `Pending` records settle.
    #[error("transaction {0} is already settled")]
    AlreadySettled(TxId),
    /// The storage backend failed.
    #[error(transparent)]
    Backend(#[from] eyre::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return Self::DuplicateAuthorization;
            }
        }
        Self::Backend(err.into())
    }
}

impl From<StorageError> for jsonrpsee::types::error::ErrorObject<'static> {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateAuthorization
            | StorageError::TxNotFound(_)
            | StorageError::AlreadySettled(_) => invalid_params(err.to_string()),
            StorageError::Quota(inner) => inner.into(),
            // Raw driver errors are logged, not surfaced.
            StorageError::Backend(_) => internal_rpc("storage unavailable"),
        }
    }
}
