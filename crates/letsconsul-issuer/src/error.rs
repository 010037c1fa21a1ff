//! Issuance boundary error type.

/// Errors from one issuance attempt. All of them are scoped to the domain
/// being renewed — the scheduler logs and retries on its next tick.
#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    #[error("no hostnames to issue for")]
    NoNames,

    #[error("can't bind challenge responder on '{address}': {reason}")]
    Bind { address: String, reason: String },

    #[error("invalid account handle: {0}")]
    Account(String),

    #[error("order failed: {0}")]
    Order(String),

    #[error("acme protocol error: {0}")]
    Protocol(#[from] instant_acme::Error),
}
