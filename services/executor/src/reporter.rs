//! Periodic workload reporting.
//!
//! The reporter keeps the orchestrator informed about what this party has
//! queued. A session is opened lazily and dropped after any failure so the
//! next tick performs a fresh handshake.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use nodeshare_proto::WorkloadItem;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::client::{OrchestratorClient, Session};
use crate::error::ClientError;

/// Source of the party's currently queued demand.
pub trait DemandSource: Send + Sync {
    /// Items currently waiting for a node, in queue order.
    fn queued(&self) -> Vec<WorkloadItem>;
}

/// Demand held in memory and replaced wholesale by its owner.
#[derive(Debug, Default)]
pub struct SharedDemand {
    items: Mutex<Vec<WorkloadItem>>,
}

impl SharedDemand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, items: Vec<WorkloadItem>) {
        *self.items.lock().unwrap_or_else(|e| e.into_inner()) = items;
    }
}

impl DemandSource for SharedDemand {
    fn queued(&self) -> Vec<WorkloadItem> {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Reports demand to the orchestrator on every tick.
pub struct WorkloadReporter {
    client: OrchestratorClient,
    source: Arc<dyn DemandSource>,
    interval: Duration,
}

impl WorkloadReporter {
    pub fn new(
        client: OrchestratorClient,
        source: Arc<dyn DemandSource>,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            source,
            interval,
        }
    }

    /// Send one report over an existing session.
    pub async fn report_once(&self, session: &Session) -> Result<usize, ClientError> {
        let items = self.source.queued();
        let count = items.len();
        let accepted = session.report_workload(items).await?;
        debug!(reported = count, accepted, "Workload reported");
        Ok(accepted)
    }

    /// Report over `session`, opening one first if needed. The session is
    /// left empty after a failure.
    async fn report_with(&self, session: &mut Option<Session>) -> Result<usize, ClientError> {
        let current = match session.take() {
            Some(current) => current,
            None => self.client.discover().await?,
        };
        let accepted = self.report_once(&current).await?;
        *session = Some(current);
        Ok(accepted)
    }

    /// Run until shutdown is signaled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            party = %self.client.party_name(),
            interval_secs = self.interval.as_secs(),
            "Starting workload reporter"
        );

        let mut session: Option<Session> = None;
        let mut consecutive_failures = 0u32;
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let result = self.report_with(&mut session).await;

                    match result {
                        Ok(_) => consecutive_failures = 0,
                        Err(e) => {
                            consecutive_failures += 1;
                            if consecutive_failures <= 3 && e.is_transient() {
                                warn!(error = %e, consecutive_failures, "Workload report failed");
                            } else {
                                error!(
                                    error = %e,
                                    consecutive_failures,
                                    "Workload report failed repeatedly"
                                );
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Workload reporter shutting down");
                        break;
                    }
                }
            }
        }
    }
}
