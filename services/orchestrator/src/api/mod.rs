//! HTTP API handlers and routing.

pub mod error;
mod handshake;
mod health;
mod protocol;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub use handshake::Verified;

/// Create the main API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .merge(health::routes())
        // Protocol endpoints, below the repository namespace
        .merge(protocol::routes())
        // Middleware
        .layer(TraceLayer::new_for_http())
        // Application state
        .with_state(state)
}
