//! Client error types.

use thiserror::Error;

/// Errors talking to the orchestrator.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid orchestrator URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The orchestrator refused the fingerprint.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("unexpected response {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Whether retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::UnexpectedStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
