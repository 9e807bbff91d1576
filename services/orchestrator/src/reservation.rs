//! Reservation queue and node matching.
//!
//! Demand is served first come, first served: every maintenance cycle walks
//! the pending reservations in submission order and binds each one to the
//! first idle, active node whose labels satisfy its expression. A
//! reservation that finds no node stays queued; later ones may still bind.
//! Maintenance never performs network I/O.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use nodeshare_id::{NodeName, ReservationId};
use nodeshare_proto::{Party, WorkloadItem};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::engine::{Binding, CompletionEvent, EngineError, Executor};
use crate::label::LabelExpr;
use crate::pool::{Inventory, ManagedNode, Pool};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("reservation {0} does not exist")]
    UnknownReservation(ReservationId),

    #[error("reservation {0} is not bound to a node")]
    NotBound(ReservationId),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// One unit of demand.
#[derive(Debug, Clone)]
pub struct DemandItem {
    pub id: ReservationId,
    pub owner: Party,
    pub label: LabelExpr,
}

impl DemandItem {
    /// Wire form used in workload reports.
    pub fn to_workload_item(&self) -> WorkloadItem {
        WorkloadItem {
            id: self.id,
            label: self.label.to_string(),
            owner: self.owner.name().clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReservationState {
    Pending,
    Bound { node: NodeName },
    Completed { node: NodeName },
}

impl ReservationState {
    /// Pending and bound reservations are still live.
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Completed { .. })
    }
}

#[derive(Debug)]
struct Entry {
    item: DemandItem,
    state: ReservationState,
}

/// FIFO queue of reservations.
#[derive(Debug)]
pub struct ReservationQueue {
    entries: Mutex<BTreeMap<ReservationId, Entry>>,
    next_id: AtomicU64,
}

impl ReservationQueue {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Queue demand for a node matching `label` on behalf of `owner`.
    pub fn enqueue(&self, owner: Party, label: LabelExpr) -> ReservationId {
        let id = ReservationId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        debug!(reservation = %id, owner = %owner.name(), label = %label, "Reservation queued");
        self.lock().insert(
            id,
            Entry {
                item: DemandItem { id, owner, label },
                state: ReservationState::Pending,
            },
        );
        id
    }

    /// Bind pending reservations to idle nodes.
    pub fn maintain(&self, pool: &Pool, executor: &dyn Executor) -> Vec<Binding> {
        let view = pool.view();
        let mut entries = self.lock();
        let mut bindings = Vec::new();

        for entry in entries.values_mut() {
            if entry.state != ReservationState::Pending {
                continue;
            }
            let Some(node) = select_node(&view.inventory, &entry.item.label, |name| {
                executor.is_idle(name)
            }) else {
                continue;
            };

            let binding = Binding {
                reservation: entry.item.id,
                node: node.name.clone(),
                owner: entry.item.owner.name().clone(),
            };
            match executor.submit(&binding) {
                Ok(()) => {
                    info!(reservation = %binding.reservation, node = %binding.node, owner = %binding.owner, "Reservation bound");
                    entry.state = ReservationState::Bound {
                        node: binding.node.clone(),
                    };
                    bindings.push(binding);
                }
                Err(EngineError::Occupied { .. }) => {
                    debug!(reservation = %binding.reservation, node = %binding.node, "Node taken, retrying next cycle");
                }
                Err(e) => {
                    warn!(reservation = %binding.reservation, node = %binding.node, error = %e, "Failed to submit reservation");
                }
            }
        }

        bindings
    }

    /// Finish a bound reservation and free its node.
    pub fn complete(
        &self,
        id: ReservationId,
        executor: &dyn Executor,
    ) -> Result<CompletionEvent, MatchError> {
        let mut entries = self.lock();
        let entry = entries
            .get_mut(&id)
            .ok_or(MatchError::UnknownReservation(id))?;
        let ReservationState::Bound { node } = &entry.state else {
            return Err(MatchError::NotBound(id));
        };

        let event = executor.complete(&Binding {
            reservation: id,
            node: node.clone(),
            owner: entry.item.owner.name().clone(),
        })?;
        info!(reservation = %id, node = %event.node, "Reservation completed");
        entry.state = ReservationState::Completed {
            node: event.node.clone(),
        };
        Ok(event)
    }

    pub fn state(&self, id: ReservationId) -> Option<ReservationState> {
        self.lock().get(&id).map(|entry| entry.state.clone())
    }

    /// Whether the reservation is still pending or running.
    pub fn is_live(&self, id: ReservationId) -> bool {
        self.lock()
            .get(&id)
            .is_some_and(|entry| entry.state.is_live())
    }

    /// Pending demand in submission order.
    pub fn pending(&self) -> Vec<DemandItem> {
        self.lock()
            .values()
            .filter(|entry| entry.state == ReservationState::Pending)
            .map(|entry| entry.item.clone())
            .collect()
    }

    /// Forget completed reservations.
    pub fn prune_completed(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.state.is_live());
        before - entries.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<ReservationId, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ReservationQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// First active, idle node (in name order) whose labels satisfy `label`.
pub fn select_node<'a>(
    inventory: &'a Inventory,
    label: &LabelExpr,
    is_idle: impl Fn(&NodeName) -> bool,
) -> Option<&'a ManagedNode> {
    if !label.is_specified() {
        return None;
    }
    inventory
        .iter()
        .filter(|node| node.is_active())
        .filter(|node| label.matches(&node.labels()))
        .find(|node| is_idle(&node.name))
}
