//! # nodeshare-proto
//!
//! Wire protocol between the orchestrator and the client parties that borrow
//! its nodes.
//!
//! Every message carries a [`Fingerprint`]: the config repository URL both
//! sides were configured from, the protocol version, and the sending party's
//! name. The fingerprint is used for compatibility and identification only.
//!
//! Messages (all JSON over HTTP POST, below `/{namespace}/`):
//!
//! | Endpoint | Request | Response |
//! |---|---|---|
//! | `discover` | [`DiscoverRequest`] | [`DiscoverResponse`] |
//! | `reportWorkload` | [`ReportWorkloadRequest`] | [`ReportWorkloadResponse`] |
//! | `returnNode` | [`ReturnNodeRequest`] | empty, `404` = already resolved |
//! | `nodeStatus` | [`NodeStatusRequest`] | [`NodeStatusResponse`] |
//! | `runStatus` | [`RunStatusRequest`] | [`RunStatusResponse`] |

mod fingerprint;
mod messages;
mod namespace;
mod party;

pub use fingerprint::{Fingerprint, Fingerprinted, HandshakeError, PROTOCOL_VERSION};
pub use messages::*;
pub use namespace::{endpoint_path, namespace_for, endpoints, NAMESPACE_PREFIX};
pub use party::{Party, PartyError};
