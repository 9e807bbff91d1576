//! Identity and compatibility fingerprint attached to every message.

use nodeshare_id::PartyName;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol version spoken by this build.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Compatibility tuple attached to every protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Config repository both parties were configured from.
    pub config_repo_url: String,

    /// Protocol version of the sender.
    pub version: String,

    /// Name of the sending party.
    pub party_name: PartyName,
}

impl Fingerprint {
    /// Fingerprint for this build's protocol version.
    pub fn new(config_repo_url: impl Into<String>, party_name: PartyName) -> Self {
        Self {
            config_repo_url: config_repo_url.into(),
            version: PROTOCOL_VERSION.to_string(),
            party_name,
        }
    }

    /// Check the fingerprint against the receiver's own view.
    pub fn verify(&self, config_repo_url: &str, version: &str) -> Result<(), HandshakeError> {
        if self.version != version {
            return Err(HandshakeError::VersionMismatch {
                expected: version.to_string(),
                actual: self.version.clone(),
            });
        }

        if self.config_repo_url != config_repo_url {
            return Err(HandshakeError::RepositoryMismatch {
                expected: config_repo_url.to_string(),
                actual: self.config_repo_url.clone(),
            });
        }

        Ok(())
    }
}

/// Messages that carry a fingerprint.
pub trait Fingerprinted {
    fn fingerprint(&self) -> &Fingerprint;
}

/// Reasons a fingerprint is not accepted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("protocol version mismatch: expected '{expected}', got '{actual}'")]
    VersionMismatch { expected: String, actual: String },

    #[error("config repository mismatch: expected '{expected}', got '{actual}'")]
    RepositoryMismatch { expected: String, actual: String },
}
