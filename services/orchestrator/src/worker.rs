//! Background workers.
//!
//! Runs reconciliation and reservation maintenance on periodic intervals.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument};

use crate::engine::Executor;
use crate::pool::Pool;
use crate::reconciler::Reconciler;
use crate::reservation::ReservationQueue;

/// Runs a reconciliation pass on every tick.
pub struct ReconcileWorker {
    reconciler: Arc<Reconciler>,
    interval: Duration,
}

impl ReconcileWorker {
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
        }
    }

    /// Run until shutdown is signaled. The first pass runs immediately so
    /// the pool activates at startup.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting reconcile worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // Pass failures are logged and recorded on the pool by the pass itself.
                    if let Err(e) = self.reconciler.try_run().await {
                        debug!(error = %e, "Scheduled reconciliation did not complete");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Reconcile worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Binds queued reservations to idle nodes on every tick.
pub struct MaintenanceWorker {
    queue: Arc<ReservationQueue>,
    pool: Arc<Pool>,
    executor: Arc<dyn Executor>,
    interval: Duration,
}

impl MaintenanceWorker {
    pub fn new(
        queue: Arc<ReservationQueue>,
        pool: Arc<Pool>,
        executor: Arc<dyn Executor>,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            pool,
            executor,
            interval,
        }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Starting maintenance worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.maintain_once();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Maintenance worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run one maintenance cycle.
    pub fn maintain_once(&self) {
        if !self.pool.is_activated() {
            return;
        }

        let bindings = self.queue.maintain(&self.pool, self.executor.as_ref());
        let pruned = self.queue.prune_completed();
        if !bindings.is_empty() || pruned > 0 {
            debug!(bound = bindings.len(), pruned, "Maintenance cycle complete");
        }
    }
}
