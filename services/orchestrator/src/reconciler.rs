//! Pool reconciliation.
//!
//! One pass:
//! 1. fetch the config repository and validate it into a snapshot
//! 2. diff the declared nodes against the applied inventory
//! 3. create, update or remove nodes through the engine
//! 4. publish the new snapshot and inventory
//!
//! A broken repository aborts the pass before anything is touched, and
//! the previous snapshot stays in effect. Busy nodes are never redefined or
//! removed: updates are deferred and removals are parked in
//! `PendingRemoval` until a later pass finds the node idle.

use std::sync::Arc;

use nodeshare_reconcile::{plan_changes, RemovalState};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::CONFIG_REPO_ENV;
use crate::engine::{EngineError, NodeEngine};
use crate::pool::{Inventory, ManagedNode, Pool};
use crate::repo::RepoFetcher;
use crate::snapshot::{ConfigError, ConfigSnapshot, NodeDefinition};

/// Errors of a reconciliation pass.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("repository not configured: set {}", CONFIG_REPO_ENV)]
    NotConfigured,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to fetch config repository: {0}")]
    Fetch(String),

    #[error("a reconciliation pass is already running")]
    InProgress,

    #[error("failed to apply {failed} node change(s), first: {first}")]
    Apply { failed: usize, first: String },
}

/// Summary of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,

    /// Updates skipped because the node was busy.
    pub deferred: usize,

    /// Undeclared nodes still waiting for their work to finish.
    pub pending_removal: usize,

    /// Pending-removal nodes declared again.
    pub reactivated: usize,

    /// Declared nodes found already running on the engine and taken over.
    pub adopted: usize,
}

/// Converges the engine towards the config repository.
pub struct Reconciler {
    pool: Arc<Pool>,
    engine: Arc<dyn NodeEngine>,
    fetcher: Arc<dyn RepoFetcher>,
    config_repo: Option<String>,

    /// Serializes passes.
    running: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        pool: Arc<Pool>,
        engine: Arc<dyn NodeEngine>,
        fetcher: Arc<dyn RepoFetcher>,
        config_repo: Option<String>,
    ) -> Self {
        Self {
            pool,
            engine,
            fetcher,
            config_repo,
            running: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub fn config_repo(&self) -> Option<&str> {
        self.config_repo.as_deref()
    }

    /// Run a pass now, waiting for any pass in flight to finish first.
    pub async fn run_once(&self) -> Result<PassReport, ReconcileError> {
        let _guard = self.running.lock().await;
        self.pass().await
    }

    /// Run a pass unless one is already in flight.
    pub async fn try_run(&self) -> Result<PassReport, ReconcileError> {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("Reconciliation pass already running, skipping");
            return Err(ReconcileError::InProgress);
        };
        self.pass().await
    }

    #[instrument(skip(self), fields(repo = self.config_repo.as_deref().unwrap_or("-")))]
    async fn pass(&self) -> Result<PassReport, ReconcileError> {
        let result = self.execute().await;
        match &result {
            Ok(report) => {
                info!(
                    created = report.created,
                    adopted = report.adopted,
                    updated = report.updated,
                    removed = report.removed,
                    deferred = report.deferred,
                    pending_removal = report.pending_removal,
                    "Reconciliation pass complete"
                );
                self.pool.set_error(None);
            }
            Err(e) => {
                warn!(error = %e, "Reconciliation pass failed");
                self.pool.set_error(Some(e.clone()));
            }
        }
        result
    }

    async fn execute(&self) -> Result<PassReport, ReconcileError> {
        let repo = self
            .config_repo
            .as_deref()
            .ok_or(ReconcileError::NotConfigured)?;

        let tree = self
            .fetcher
            .fetch(repo)
            .await
            .map_err(|e| ReconcileError::Fetch(e.to_string()))?;
        let snapshot = Arc::new(ConfigSnapshot::parse(&tree)?);

        let current = self.pool.view().inventory.clone();
        let (inventory, report, failures) = self.apply(&snapshot, current).await;
        self.pool.install(snapshot, inventory);

        match failures.first() {
            None => Ok(report),
            Some(first) => Err(ReconcileError::Apply {
                failed: failures.len(),
                first: first.clone(),
            }),
        }
    }

    /// Apply the diff between `snapshot` and `current`. Engine failures are
    /// collected, not fatal: the returned inventory mirrors what the engine
    /// actually holds.
    async fn apply(
        &self,
        snapshot: &ConfigSnapshot,
        current: Inventory,
    ) -> (Inventory, PassReport, Vec<String>) {
        let changes = plan_changes(snapshot.nodes(), current.nodes(), |node: &ManagedNode| {
            &node.definition
        });
        let mut next = current;
        let mut report = PassReport::default();
        let mut failures = Vec::new();

        for name in &changes.unchanged {
            report.unchanged += 1;
            if let Some(node) = next.get_mut(name) {
                if !node.is_active() {
                    info!(node = %name, "Node declared again, cancelling removal");
                    node.removal = node.removal.on_declared();
                    report.reactivated += 1;
                }
            }
        }

        for name in &changes.create {
            let Some(definition) = snapshot.node(name) else {
                continue;
            };
            match self.engine.create(name, definition).await {
                Ok(handle) => {
                    info!(
                        node = %name,
                        labels = %definition.labels,
                        hash = %definition.spec_hash(),
                        "Node created"
                    );
                    next.insert(ManagedNode {
                        name: name.clone(),
                        definition: definition.clone(),
                        handle,
                        removal: RemovalState::Active,
                    });
                    report.created += 1;
                }
                Err(EngineError::AlreadyExists(_)) => {
                    let Some((handle, applied)) = self.engine.existing(name) else {
                        warn!(node = %name, "Node vanished while being adopted");
                        failures.push(format!("adopt '{name}': node vanished"));
                        continue;
                    };
                    info!(
                        node = %name,
                        incarnation = handle.incarnation,
                        hash = %applied.spec_hash(),
                        "Adopting node already on the engine"
                    );
                    let mut node = ManagedNode {
                        name: name.clone(),
                        definition: applied,
                        handle,
                        removal: RemovalState::Active,
                    };
                    report.adopted += 1;
                    if node.definition != *definition {
                        self.redefine(&mut node, definition, &mut report, &mut failures)
                            .await;
                    }
                    next.insert(node);
                }
                Err(e) => {
                    warn!(node = %name, error = %e, "Failed to create node");
                    failures.push(format!("create '{name}': {e}"));
                }
            }
        }

        for name in &changes.update {
            let (Some(definition), Some(node)) = (snapshot.node(name), next.get_mut(name)) else {
                continue;
            };
            if !node.is_active() {
                info!(node = %name, "Node declared again, cancelling removal");
                node.removal = node.removal.on_declared();
                report.reactivated += 1;
            }
            self.redefine(node, definition, &mut report, &mut failures)
                .await;
        }

        for name in &changes.remove {
            let Some(node) = next.get_mut(name) else {
                continue;
            };

            let idle = self.engine.is_idle(name);
            if node.is_active() {
                info!(node = %name, "Node no longer declared, removing once idle");
            }
            let Some(state) = node.removal.on_undeclared(idle) else {
                // Out of service before the engine is asked, so a failed
                // removal is retried next pass without the node taking work.
                node.removal = RemovalState::PendingRemoval;
                let handle = node.handle.clone();
                match self.engine.remove(&handle).await {
                    Ok(()) | Err(EngineError::UnknownNode(_)) => {
                        info!(node = %name, "Node removed");
                        next.remove(name);
                        report.removed += 1;
                    }
                    Err(EngineError::Occupied { .. }) => {
                        report.pending_removal += 1;
                    }
                    Err(e) => {
                        warn!(node = %name, error = %e, "Failed to remove node");
                        failures.push(format!("remove '{name}': {e}"));
                        report.pending_removal += 1;
                    }
                }
                continue;
            };
            node.removal = state;
            report.pending_removal += 1;
        }

        (next, report, failures)
    }

    /// Apply `definition` to `node` unless it is busy, in which case the
    /// update is deferred to a later pass.
    async fn redefine(
        &self,
        node: &mut ManagedNode,
        definition: &NodeDefinition,
        report: &mut PassReport,
        failures: &mut Vec<String>,
    ) {
        let name = node.name.clone();
        if !self.engine.is_idle(&name) {
            debug!(node = %name, "Node busy, deferring update");
            report.deferred += 1;
            return;
        }

        match self.engine.update(&node.handle, definition).await {
            Ok(handle) => {
                info!(
                    node = %name,
                    labels = %definition.labels,
                    hash = %definition.spec_hash(),
                    "Node updated"
                );
                node.definition = definition.clone();
                node.handle = handle;
                report.updated += 1;
            }
            Err(EngineError::Occupied { .. }) => {
                debug!(node = %name, "Node became busy, deferring update");
                report.deferred += 1;
            }
            Err(e) => {
                warn!(node = %name, error = %e, "Failed to update node");
                failures.push(format!("update '{name}': {e}"));
            }
        }
    }
}
