//! Store adapter error type.

/// Errors surfaced by the coordination-store adapter.
///
/// All variants are treated as transient by the callers: a failed read or
/// write is retried on the next tick, never escalated past it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Transport(String),

    #[error("store returned HTTP {status} for {operation}")]
    Api { operation: &'static str, status: u16 },

    #[error("invalid store response: {0}")]
    Decode(String),

    #[error("invalid store address '{0}'")]
    Address(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
