//! Domain registry and renewal error types.

use letsconsul_issuer::IssuanceError;
use letsconsul_store::StoreError;

/// Errors from materializing the declared domain set. A failed load
/// aborts the whole attempt and leaves previously-loaded records as they
/// were; the scheduler retries on its next tick.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("can't fetch '{key}' key")]
    MissingKey { key: String },

    #[error("can't fetch '{field}' key from '{name}' domain")]
    MissingField { name: String, field: &'static str },

    #[error("malformed value under '{key}': {reason}")]
    Malformed { key: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from renewing a single domain. Never escalated past that
/// domain's slot in the current tick.
#[derive(Debug, thiserror::Error)]
pub enum RenewError {
    #[error(transparent)]
    Issuance(#[from] IssuanceError),

    #[error("write-back failed: {0}")]
    Store(#[from] StoreError),
}
