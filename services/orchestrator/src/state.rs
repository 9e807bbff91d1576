//! Application state shared across request handlers.

use std::sync::Arc;

use nodeshare_proto::namespace_for;

use crate::pool::Pool;
use crate::reconciler::Reconciler;
use crate::reservation::ReservationQueue;
use crate::workload::WorkloadLedger;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    reconciler: Arc<Reconciler>,
    queue: Arc<ReservationQueue>,
    ledger: Arc<WorkloadLedger>,
    namespace: Option<String>,
}

impl AppState {
    pub fn new(
        reconciler: Arc<Reconciler>,
        queue: Arc<ReservationQueue>,
        ledger: Arc<WorkloadLedger>,
    ) -> Self {
        let namespace = reconciler.config_repo().map(namespace_for);
        Self {
            inner: Arc::new(AppStateInner {
                reconciler,
                queue,
                ledger,
                namespace,
            }),
        }
    }

    pub fn pool(&self) -> &Arc<Pool> {
        self.inner.reconciler.pool()
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.inner.reconciler
    }

    pub fn queue(&self) -> &ReservationQueue {
        &self.inner.queue
    }

    pub fn ledger(&self) -> &WorkloadLedger {
        &self.inner.ledger
    }

    /// URL of the config repository this orchestrator serves, if configured.
    pub fn config_repo(&self) -> Option<&str> {
        self.inner.reconciler.config_repo()
    }

    /// Endpoint namespace derived from the config repository URL.
    pub fn namespace(&self) -> Option<&str> {
        self.inner.namespace.as_deref()
    }
}
