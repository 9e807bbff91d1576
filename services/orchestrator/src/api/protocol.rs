//! Protocol endpoints used by client parties.
//!
//! All routes live below `/{namespace}/` and take JSON bodies verified by
//! [`Verified`].

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use nodeshare_id::NodeName;
use nodeshare_proto::{
    endpoints, DiscoverRequest, DiscoverResponse, NodeState, NodeStatusRequest,
    NodeStatusResponse, ReportWorkloadRequest, ReportWorkloadResponse, ReturnNodeRequest,
    RunState, RunStatusRequest, RunStatusResponse, PROTOCOL_VERSION,
};
use tracing::{debug, info, warn};

use crate::api::error::ApiError;
use crate::api::handshake::Verified;
use crate::pool::PoolView;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(&route(endpoints::DISCOVER), post(discover))
        .route(&route(endpoints::REPORT_WORKLOAD), post(report_workload))
        .route(&route(endpoints::RETURN_NODE), post(return_node))
        .route(&route(endpoints::NODE_STATUS), post(node_status))
        .route(&route(endpoints::RUN_STATUS), post(run_status))
}

fn route(endpoint: &str) -> String {
    format!("/{{namespace}}/{endpoint}")
}

/// Describe the pool to a party: version, base URL, served labels and the
/// last reconciliation error, if any.
async fn discover(
    State(state): State<AppState>,
    request: Verified<DiscoverRequest>,
) -> Json<DiscoverResponse> {
    debug!(party = %request.party.name(), "Discover");
    Json(DiscoverResponse {
        version: PROTOCOL_VERSION.to_string(),
        orchestrator_url: request.snapshot.orchestrator_url().to_string(),
        labels: request.view.inventory.served_labels(),
        diagnosis: state.pool().error().map(|e| e.to_string()),
    })
}

/// Replace the sender's reported demand. Every item must be owned by the
/// sender.
async fn report_workload(
    State(state): State<AppState>,
    request: Verified<ReportWorkloadRequest>,
) -> Result<Json<ReportWorkloadResponse>, ApiError> {
    let sender = request.party.name();
    if let Some(item) = request.payload.items.iter().find(|item| &item.owner != sender) {
        warn!(party = %sender, owner = %item.owner, "Workload item filed for another party");
        return Err(ApiError::bad_request(
            "owner_mismatch",
            format!(
                "item {} is owned by '{}', not by sender '{sender}'",
                item.id, item.owner
            ),
        ));
    }

    let accepted = state.ledger().report(sender, request.payload.items);
    Ok(Json(ReportWorkloadResponse { accepted }))
}

/// Whether `raw` names a node in the pool. Names that do not parse are
/// unknown, not malformed.
fn in_pool(view: &PoolView, raw: &str) -> bool {
    NodeName::parse(raw).is_ok_and(|name| view.inventory.contains(&name))
}

/// Acknowledge a party giving a node back. Availability is owned by the
/// reservation queue, so this only confirms the node still exists.
async fn return_node(request: Verified<ReturnNodeRequest>) -> Result<StatusCode, ApiError> {
    let node = &request.payload.node_name;
    if !in_pool(&request.view, node) {
        debug!(party = %request.party.name(), node = %node, "Returned node is not in the pool");
        return Err(ApiError::not_found(
            "node_not_found",
            format!("node '{node}' is not in the pool"),
        ));
    }

    info!(
        party = %request.party.name(),
        node = %node,
        status = %request.payload.status,
        "Node returned"
    );
    Ok(StatusCode::OK)
}

async fn node_status(request: Verified<NodeStatusRequest>) -> Json<NodeStatusResponse> {
    let found = in_pool(&request.view, &request.payload.node_name);
    Json(NodeStatusResponse {
        state: NodeState::from_found(found),
    })
}

async fn run_status(
    State(state): State<AppState>,
    request: Verified<RunStatusRequest>,
) -> Json<RunStatusResponse> {
    Json(RunStatusResponse {
        state: RunState::from_found(state.queue().is_live(request.payload.run_id)),
    })
}
