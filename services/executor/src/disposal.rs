//! Giving borrowed nodes back.

use async_trait::async_trait;
use nodeshare_id::NodeName;
use nodeshare_proto::ReturnStatus;
use tracing::info;

use crate::client::{ReturnOutcome, Session};
use crate::error::ClientError;

/// Terminal state of a disposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposalState {
    /// Nothing is left to clean up.
    Purged,
}

/// Something that releases a borrowed resource.
///
/// A failed disposal is returned as an error and may be retried.
#[async_trait]
pub trait NodeDisposal: Send + Sync {
    async fn dispose(&self) -> Result<DisposalState, ClientError>;

    fn display_name(&self) -> String;
}

/// Returns a node to the orchestrator once the party is done with it.
#[derive(Debug, Clone)]
pub struct ReturnedNode {
    session: Session,
    node: NodeName,
    status: ReturnStatus,
}

impl ReturnedNode {
    pub fn new(session: Session, node: NodeName, status: ReturnStatus) -> Self {
        Self {
            session,
            node,
            status,
        }
    }

    pub fn node(&self) -> &NodeName {
        &self.node
    }
}

#[async_trait]
impl NodeDisposal for ReturnedNode {
    async fn dispose(&self) -> Result<DisposalState, ClientError> {
        match self.session.return_node(&self.node, self.status).await? {
            ReturnOutcome::Returned => {
                info!(node = %self.node, status = %self.status, "Node returned to orchestrator");
            }
            ReturnOutcome::AlreadyResolved => {
                info!(node = %self.node, "Node already gone from orchestrator");
            }
        }
        Ok(DisposalState::Purged)
    }

    fn display_name(&self) -> String {
        format!("Returning node {} to orchestrator", self.node)
    }
}
