//! HTTP client for the orchestrator protocol.
//!
//! [`OrchestratorClient`] only knows how to reach the orchestrator. Talking
//! protocol requires a [`Session`], which is obtained from a successful
//! [`discover`](OrchestratorClient::discover) handshake.

use nodeshare_id::{NodeName, PartyName, ReservationId};
use nodeshare_proto::{
    endpoints, namespace_for, DiscoverRequest, DiscoverResponse, Fingerprint, NodeState,
    NodeStatusRequest, NodeStatusResponse, ReportWorkloadRequest, ReportWorkloadResponse,
    ReturnNodeRequest, ReturnStatus, RunState, RunStatusRequest, RunStatusResponse, WorkloadItem,
    PROTOCOL_VERSION,
};
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::ClientError;

/// Client for a single orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    client: reqwest::Client,
    base: Url,
    config_repo: String,
    party_name: PartyName,
}

impl OrchestratorClient {
    /// Create a new client.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()?;

        Ok(Self {
            client,
            base: base_url(&config.orchestrator_url)?,
            config_repo: config.config_repo.clone(),
            party_name: config.party_name.clone(),
        })
    }

    pub fn party_name(&self) -> &PartyName {
        &self.party_name
    }

    /// Namespace this client addresses on the orchestrator.
    pub fn namespace(&self) -> String {
        namespace_for(&self.config_repo)
    }

    fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(self.config_repo.clone(), self.party_name.clone())
    }

    fn endpoint(&self, endpoint: &str) -> Result<Url, ClientError> {
        let path = format!("{}/{endpoint}", self.namespace());
        self.base.join(&path).map_err(|e| ClientError::InvalidUrl {
            url: format!("{}{path}", self.base),
            reason: e.to_string(),
        })
    }

    async fn send<T: Serialize>(&self, endpoint: &str, body: &T) -> Result<Response, ClientError> {
        let url = self.endpoint(endpoint)?;
        debug!(%url, "Sending request to orchestrator");
        Ok(self.client.post(url).json(body).send().await?)
    }

    async fn call<T: Serialize, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<R, ClientError> {
        let response = check(endpoint, self.send(endpoint, body).await?).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Perform the handshake and open a session.
    ///
    /// Fails if the orchestrator rejects the fingerprint or reports a
    /// different protocol version.
    pub async fn discover(&self) -> Result<Session, ClientError> {
        let discovery: DiscoverResponse = self
            .call(
                endpoints::DISCOVER,
                &DiscoverRequest {
                    fingerprint: self.fingerprint(),
                },
            )
            .await?;

        if discovery.version != PROTOCOL_VERSION {
            return Err(ClientError::HandshakeRejected(format!(
                "orchestrator speaks protocol {}, this party speaks {PROTOCOL_VERSION}",
                discovery.version
            )));
        }

        if let Some(diagnosis) = &discovery.diagnosis {
            info!(%diagnosis, "Orchestrator pool is degraded");
        }
        debug!(labels = discovery.labels.len(), "Discovered orchestrator");

        Ok(Session {
            client: self.clone(),
            discovery,
        })
    }
}

/// Outcome of returning a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnOutcome {
    /// The orchestrator acknowledged the return.
    Returned,

    /// The orchestrator no longer knows the node; nothing is left to return.
    AlreadyResolved,
}

/// A handshaken connection to the orchestrator.
#[derive(Debug, Clone)]
pub struct Session {
    client: OrchestratorClient,
    discovery: DiscoverResponse,
}

impl Session {
    /// The discover response that opened this session.
    pub fn discovery(&self) -> &DiscoverResponse {
        &self.discovery
    }

    /// Label atoms the orchestrator served at discovery time.
    pub fn labels(&self) -> &[String] {
        &self.discovery.labels
    }

    /// Report the party's currently queued demand. Replaces any earlier report.
    pub async fn report_workload(&self, items: Vec<WorkloadItem>) -> Result<usize, ClientError> {
        let response: ReportWorkloadResponse = self
            .client
            .call(
                endpoints::REPORT_WORKLOAD,
                &ReportWorkloadRequest {
                    fingerprint: self.client.fingerprint(),
                    items,
                },
            )
            .await?;
        Ok(response.accepted)
    }

    /// Give a node back to the orchestrator.
    ///
    /// Only a `node_not_found` answer means the node is already gone; any
    /// other 404, such as an unknown party, is an error.
    pub async fn return_node(
        &self,
        node_name: &NodeName,
        status: ReturnStatus,
    ) -> Result<ReturnOutcome, ClientError> {
        let response = self
            .client
            .send(
                endpoints::RETURN_NODE,
                &ReturnNodeRequest {
                    fingerprint: self.client.fingerprint(),
                    node_name: node_name.to_string(),
                    status,
                },
            )
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            if problem_code(&body).as_deref() == Some(NODE_NOT_FOUND) {
                debug!(node = %node_name, "Orchestrator no longer knows the returned node");
                return Ok(ReturnOutcome::AlreadyResolved);
            }
            error!(endpoint = endpoints::RETURN_NODE, body = %body, "Orchestrator request failed");
            return Err(ClientError::UnexpectedStatus {
                status: StatusCode::NOT_FOUND.as_u16(),
                body,
            });
        }
        check(endpoints::RETURN_NODE, response).await?;
        Ok(ReturnOutcome::Returned)
    }

    pub async fn node_status(&self, node_name: &NodeName) -> Result<NodeState, ClientError> {
        let response: NodeStatusResponse = self
            .client
            .call(
                endpoints::NODE_STATUS,
                &NodeStatusRequest {
                    fingerprint: self.client.fingerprint(),
                    node_name: node_name.to_string(),
                },
            )
            .await?;
        Ok(response.state)
    }

    pub async fn run_status(&self, run_id: ReservationId) -> Result<RunState, ClientError> {
        let response: RunStatusResponse = self
            .client
            .call(
                endpoints::RUN_STATUS,
                &RunStatusRequest {
                    fingerprint: self.client.fingerprint(),
                    run_id,
                },
            )
            .await?;
        Ok(response.state)
    }
}

fn base_url(raw: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(raw).map_err(|e| ClientError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(ClientError::InvalidUrl {
            url: raw.to_string(),
            reason: "not a base URL".to_string(),
        });
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Problem code the orchestrator answers for a node it does not manage.
const NODE_NOT_FOUND: &str = "node_not_found";

fn problem_code(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|problem| problem["code"].as_str().map(str::to_string))
}

async fn check(endpoint: &str, response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    error!(endpoint, status = %status, body = %body, "Orchestrator request failed");

    if status == StatusCode::CONFLICT {
        let detail = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|problem| problem["detail"].as_str().map(str::to_string))
            .unwrap_or(body);
        return Err(ClientError::HandshakeRejected(detail));
    }

    Err(ClientError::UnexpectedStatus {
        status: status.as_u16(),
        body,
    })
}
