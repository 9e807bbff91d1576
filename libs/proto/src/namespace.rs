//! Namespace derivation and endpoint naming.

use sha2::{Digest, Sha256};

/// Prefix of every derived namespace.
pub const NAMESPACE_PREFIX: &str = "nodesharing-";

/// Number of hex characters of the digest kept in a namespace.
const NAMESPACE_HASH_LEN: usize = 8;

/// Endpoint names below the namespace.
pub mod endpoints {
    pub const DISCOVER: &str = "discover";
    pub const REPORT_WORKLOAD: &str = "reportWorkload";
    pub const RETURN_NODE: &str = "returnNode";
    pub const NODE_STATUS: &str = "nodeStatus";
    pub const RUN_STATUS: &str = "runStatus";
}

/// Derive the short namespace that scopes everything served for a config
/// repository.
///
/// The name is a fixed-length digest prefix of the repository URL, so it is
/// bounded in length, made of safe characters, and stable across restarts.
pub fn namespace_for(config_repo_url: &str) -> String {
    let digest = Sha256::digest(config_repo_url.as_bytes());
    let hex = hex::encode(digest);
    format!("{NAMESPACE_PREFIX}{}", &hex[..NAMESPACE_HASH_LEN])
}

/// Absolute path of an endpoint within a namespace.
pub fn endpoint_path(namespace: &str, endpoint: &str) -> String {
    format!("/{namespace}/{endpoint}")
}
