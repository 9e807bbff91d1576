//! Request and response payloads.

use nodeshare_id::{PartyName, ReservationId};
use serde::{Deserialize, Serialize};

use crate::fingerprint::{Fingerprint, Fingerprinted};

// =============================================================================
// Discover
// =============================================================================

/// First message of every exchange: the client announces its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverRequest {
    pub fingerprint: Fingerprint,
}

/// Orchestrator capability and version information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverResponse {
    /// Protocol version of the orchestrator.
    pub version: String,

    /// Base URL of the orchestrator as declared by the config repository.
    pub orchestrator_url: String,

    /// Label atoms served by active nodes, sorted.
    pub labels: Vec<String>,

    /// Last reconciliation error, if the pool is currently degraded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
}

// =============================================================================
// ReportWorkload
// =============================================================================

/// One queued demand item as seen by the reporting party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadItem {
    /// Identifier of the item in the reporting party's queue.
    pub id: ReservationId,

    /// Requested label expression.
    pub label: String,

    /// Party that submitted the item.
    pub owner: PartyName,
}

/// Ordered list of a party's currently queued demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportWorkloadRequest {
    pub fingerprint: Fingerprint,

    #[serde(default)]
    pub items: Vec<WorkloadItem>,
}

/// Acknowledgement of a workload report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportWorkloadResponse {
    /// Number of items recorded.
    pub accepted: usize,
}

// =============================================================================
// ReturnNode
// =============================================================================

/// Outcome of the work a returned node carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    Ok,
    Failed,
}

impl std::fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReturnStatus::Ok => write!(f, "ok"),
            ReturnStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Advisory notification that a node was released by a party.
///
/// The node name is carried verbatim: a name the orchestrator cannot parse
/// is simply a node it does not know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnNodeRequest {
    pub fingerprint: Fingerprint,
    pub node_name: String,
    pub status: ReturnStatus,
}

// =============================================================================
// Status queries
// =============================================================================

/// Node lookup result, encoded on the wire as its ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum NodeState {
    Found = 0,
    NotFound = 1,
}

/// Run lookup result, encoded on the wire as its ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RunState {
    Found = 0,
    NotFound = 1,
}

macro_rules! ordinal_state {
    ($ty:ident) => {
        impl From<$ty> for u8 {
            fn from(state: $ty) -> u8 {
                state as u8
            }
        }

        impl TryFrom<u8> for $ty {
            type Error = String;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    0 => Ok($ty::Found),
                    1 => Ok($ty::NotFound),
                    other => Err(format!(
                        "invalid {} ordinal {other}",
                        stringify!($ty)
                    )),
                }
            }
        }

        impl $ty {
            /// State for a lookup that did or did not find its target.
            pub fn from_found(found: bool) -> Self {
                if found {
                    $ty::Found
                } else {
                    $ty::NotFound
                }
            }
        }
    };
}

ordinal_state!(NodeState);
ordinal_state!(RunState);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatusRequest {
    pub fingerprint: Fingerprint,
    pub node_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatusResponse {
    pub state: NodeState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatusRequest {
    pub fingerprint: Fingerprint,
    pub run_id: ReservationId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatusResponse {
    pub state: RunState,
}

macro_rules! fingerprinted {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Fingerprinted for $ty {
                fn fingerprint(&self) -> &Fingerprint {
                    &self.fingerprint
                }
            }
        )*
    };
}

fingerprinted!(
    DiscoverRequest,
    ReportWorkloadRequest,
    ReturnNodeRequest,
    NodeStatusRequest,
    RunStatusRequest,
);

#[cfg(test)]
mod tests {
    use super::*;
    use nodeshare_id::NodeName;

    fn fingerprint() -> Fingerprint {
        Fingerprint::new(
            "https://git.acme.com/pool-config.git",
            PartyName::parse("jenkins1").unwrap(),
        )
    }

    #[test]
    fn test_state_ordinals_on_the_wire() {
        let found = serde_json::to_string(&NodeStatusResponse {
            state: NodeState::Found,
        })
        .unwrap();
        assert_eq!(found, r#"{"state":0}"#);

        let missing: RunStatusResponse = serde_json::from_str(r#"{"state":1}"#).unwrap();
        assert_eq!(missing.state, RunState::NotFound);

        assert!(serde_json::from_str::<RunStatusResponse>(r#"{"state":7}"#).is_err());
    }

    #[test]
    fn test_workload_preserves_order() {
        let request = ReportWorkloadRequest {
            fingerprint: fingerprint(),
            items: vec![
                WorkloadItem {
                    id: ReservationId::new(2),
                    label: "solaris11".to_string(),
                    owner: PartyName::parse("jenkins1").unwrap(),
                },
                WorkloadItem {
                    id: ReservationId::new(1),
                    label: "windows".to_string(),
                    owner: PartyName::parse("jenkins1").unwrap(),
                },
            ],
        };

        let json = serde_json::to_string(&request).unwrap();
        let parsed: ReportWorkloadRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.items[0].id, ReservationId::new(2));
        assert_eq!(parsed.items[1].label, "windows");
    }

    #[test]
    fn test_node_names_are_carried_verbatim() {
        let json = serde_json::json!({
            "fingerprint": fingerprint(),
            "node_name": "../../etc/passwd",
            "status": "ok",
        });
        let request: ReturnNodeRequest = serde_json::from_value(json).unwrap();
        assert_eq!(request.node_name, "../../etc/passwd");
        assert!(NodeName::parse(&request.node_name).is_err());
    }

    #[test]
    fn test_discover_response_omits_empty_diagnosis() {
        let response = DiscoverResponse {
            version: "0.1.0".to_string(),
            orchestrator_url: "https://dummy.test".to_string(),
            labels: vec!["solaris11".to_string()],
            diagnosis: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("diagnosis"));
    }
}
