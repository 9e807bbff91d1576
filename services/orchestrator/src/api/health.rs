//! Liveness and readiness probes.
//!
//! `/readyz` answers 503 until the pool has loaded its first configuration.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::workload::DemandSummary;

const SERVICE: &str = "orchestrator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Degraded,
    Unavailable,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: Status,
    pub service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolHealth>,
}

impl HealthResponse {
    fn new(status: Status, pool: Option<PoolHealth>) -> Self {
        Self {
            status,
            service: SERVICE.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            pool,
        }
    }
}

/// What the pool looks like to a prober.
#[derive(Debug, Serialize, Deserialize)]
pub struct PoolHealth {
    pub status: Status,

    /// Namespace served for the config repository, if one is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Last reconciliation error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,

    pub nodes: usize,
    pub pending_reservations: usize,

    /// Demand most recently reported by the client parties.
    pub demand: DemandSummary,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse::new(Status::Ok, None))
}

/// A failing pass after activation degrades the pool but keeps the service
/// ready; the last good configuration stays in effect.
async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let pool = state.pool();
    let activated = pool.is_activated();
    let diagnosis = pool.error().map(|e| e.to_string());

    let status = match (activated, diagnosis.is_some()) {
        (false, _) => Status::Unavailable,
        (true, true) => Status::Degraded,
        (true, false) => Status::Ok,
    };
    let health = PoolHealth {
        status,
        namespace: state.namespace().map(str::to_string),
        diagnosis,
        nodes: pool.view().inventory.len(),
        pending_reservations: state.queue().pending().len(),
        demand: state.ledger().summary(),
    };

    let code = if activated {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(HealthResponse::new(status, Some(health))))
}

async fn livez() -> StatusCode {
    StatusCode::OK
}
