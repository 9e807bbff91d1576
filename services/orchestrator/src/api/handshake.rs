//! Handshake verification for protocol requests.
//!
//! Every protocol message carries a fingerprint. [`Verified`] rejects the
//! request before the handler runs unless:
//! - the path namespace belongs to this orchestrator's config repository
//! - the pool has loaded a configuration
//! - the fingerprint names the same repository and protocol version
//! - the sending party is declared in the repository

use std::sync::Arc;

use axum::extract::{FromRequest, FromRequestParts, Path, Request};
use axum::Json;
use nodeshare_proto::{Fingerprinted, Party, PROTOCOL_VERSION};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::api::error::ApiError;
use crate::pool::PoolView;
use crate::snapshot::ConfigSnapshot;
use crate::state::AppState;

/// A protocol request whose fingerprint has been verified.
#[derive(Debug)]
pub struct Verified<T> {
    /// The declared party that sent the request.
    pub party: Party,

    /// Pool state the request was verified against.
    pub view: Arc<PoolView>,

    pub snapshot: Arc<ConfigSnapshot>,

    pub payload: T,
}

impl<T> FromRequest<AppState> for Verified<T>
where
    T: DeserializeOwned + Fingerprinted + Send,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = req.into_parts();

        let Path(namespace) = Path::<String>::from_request_parts(&mut parts, state)
            .await
            .map_err(|e| ApiError::not_found("unknown_namespace", e.body_text()))?;

        let (Some(expected), Some(repo)) = (state.namespace(), state.config_repo()) else {
            return Err(ApiError::service_unavailable(
                "pool_inactive",
                "orchestrator has no config repository",
            ));
        };
        if namespace != expected {
            return Err(ApiError::not_found(
                "unknown_namespace",
                format!("namespace '{namespace}' is not served here"),
            ));
        }

        let view = state.pool().view();
        let Some(snapshot) = view.snapshot.clone() else {
            return Err(ApiError::service_unavailable(
                "pool_inactive",
                "pool has not loaded a configuration yet",
            ));
        };

        let Json(payload) = Json::<T>::from_request(Request::from_parts(parts, body), state)
            .await
            .map_err(|e| ApiError::bad_request("invalid_payload", e.body_text()))?;

        let fingerprint = payload.fingerprint();
        if let Err(e) = fingerprint.verify(repo, PROTOCOL_VERSION) {
            warn!(party = %fingerprint.party_name, error = %e, "Handshake rejected");
            return Err(ApiError::conflict("handshake_rejected", e.to_string()));
        }

        let Some(party) = snapshot.party(&fingerprint.party_name).cloned() else {
            warn!(party = %fingerprint.party_name, "Request from undeclared party");
            return Err(ApiError::not_found(
                "unknown_party",
                format!(
                    "party '{}' is not declared in the config repository",
                    fingerprint.party_name
                ),
            ));
        };

        Ok(Self {
            party,
            view,
            snapshot,
            payload,
        })
    }
}
