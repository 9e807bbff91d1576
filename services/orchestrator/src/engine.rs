//! Node engine and executor interfaces, plus an in-memory implementation.
//!
//! The engine owns node lifecycle (create, update, remove) and knows which
//! nodes are busy. The executor runs bound reservations on nodes. Both are
//! narrow seams so the reconciler and the matcher never depend on how nodes
//! are actually provisioned.
//!
//! [`LocalEngine`] implements both with single occupancy per node. It backs
//! the standalone binary and the test suites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use nodeshare_id::{NodeName, PartyName, ReservationId};
use thiserror::Error;
use tracing::{debug, info};

use crate::snapshot::NodeDefinition;

/// Errors returned by the engine or executor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("node '{0}' is not known to the engine")]
    UnknownNode(NodeName),

    #[error("node '{0}' already exists")]
    AlreadyExists(NodeName),

    #[error("node '{node}' is occupied by reservation {occupant}")]
    Occupied {
        node: NodeName,
        occupant: ReservationId,
    },

    #[error("node '{node}' is not running reservation {reservation}")]
    NotRunning {
        node: NodeName,
        reservation: ReservationId,
    },

    #[error("engine failure: {0}")]
    Failed(String),
}

/// Engine-side identity of a node. An in-place update keeps the
/// incarnation, a fresh create allocates a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandle {
    pub name: NodeName,
    pub incarnation: u64,
}

/// A reservation bound to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub reservation: ReservationId,
    pub node: NodeName,
    pub owner: PartyName,
}

/// Emitted when a bound reservation finishes and its node is freed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEvent {
    pub reservation: ReservationId,
    pub node: NodeName,
    pub owner: PartyName,
}

/// Occupancy query shared by the engine and the executor.
pub trait Occupancy: Send + Sync {
    /// `true` when no reservation runs on the node. Unknown nodes are idle.
    fn is_idle(&self, name: &NodeName) -> bool;
}

/// Node lifecycle operations.
#[async_trait]
pub trait NodeEngine: Occupancy {
    async fn create(
        &self,
        name: &NodeName,
        definition: &NodeDefinition,
    ) -> Result<NodeHandle, EngineError>;

    /// Apply a new definition in place. Must refuse busy nodes.
    async fn update(
        &self,
        handle: &NodeHandle,
        definition: &NodeDefinition,
    ) -> Result<NodeHandle, EngineError>;

    /// Tear the node down. Must refuse busy nodes.
    async fn remove(&self, handle: &NodeHandle) -> Result<(), EngineError>;

    /// Handle and applied definition of a node the engine already holds.
    fn existing(&self, name: &NodeName) -> Option<(NodeHandle, NodeDefinition)>;
}

/// Runs bound reservations.
pub trait Executor: Occupancy {
    /// Start running `binding`; the node stays busy until completion.
    fn submit(&self, binding: &Binding) -> Result<(), EngineError>;

    /// Finish `binding` and free its node.
    fn complete(&self, binding: &Binding) -> Result<CompletionEvent, EngineError>;
}

#[derive(Debug, Clone)]
struct LocalNode {
    handle: NodeHandle,
    definition: NodeDefinition,
    occupant: Option<ReservationId>,
}

/// In-memory engine and executor.
#[derive(Debug)]
pub struct LocalEngine {
    nodes: Mutex<HashMap<NodeName, LocalNode>>,

    /// Counter for generating incarnations.
    incarnations: AtomicU64,

    /// Whether lifecycle operations should "fail".
    failing: AtomicBool,
}

impl LocalEngine {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            incarnations: AtomicU64::new(1),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every create, update and remove fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn node_count(&self) -> usize {
        self.lock().len()
    }

    /// Whether the node exists and is online.
    pub fn is_online(&self, name: &NodeName) -> bool {
        self.lock().contains_key(name)
    }

    pub fn handle(&self, name: &NodeName) -> Option<NodeHandle> {
        self.lock().get(name).map(|node| node.handle.clone())
    }

    pub fn definition(&self, name: &NodeName) -> Option<NodeDefinition> {
        self.lock().get(name).map(|node| node.definition.clone())
    }

    pub fn occupant(&self, name: &NodeName) -> Option<ReservationId> {
        self.lock().get(name).and_then(|node| node.occupant)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<NodeName, LocalNode>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_failing(&self) -> Result<(), EngineError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EngineError::Failed(
                "local engine configured to fail".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Occupancy for LocalEngine {
    fn is_idle(&self, name: &NodeName) -> bool {
        self.lock()
            .get(name)
            .is_none_or(|node| node.occupant.is_none())
    }
}

#[async_trait]
impl NodeEngine for LocalEngine {
    async fn create(
        &self,
        name: &NodeName,
        definition: &NodeDefinition,
    ) -> Result<NodeHandle, EngineError> {
        self.check_failing()?;

        let mut nodes = self.lock();
        if nodes.contains_key(name) {
            return Err(EngineError::AlreadyExists(name.clone()));
        }

        let handle = NodeHandle {
            name: name.clone(),
            incarnation: self.incarnations.fetch_add(1, Ordering::SeqCst),
        };
        nodes.insert(
            name.clone(),
            LocalNode {
                handle: handle.clone(),
                definition: definition.clone(),
                occupant: None,
            },
        );

        info!(node = %name, incarnation = handle.incarnation, labels = %definition.labels, "[LOCAL] node online");
        Ok(handle)
    }

    async fn update(
        &self,
        handle: &NodeHandle,
        definition: &NodeDefinition,
    ) -> Result<NodeHandle, EngineError> {
        self.check_failing()?;

        let mut nodes = self.lock();
        let node = nodes
            .get_mut(&handle.name)
            .ok_or_else(|| EngineError::UnknownNode(handle.name.clone()))?;
        if let Some(occupant) = node.occupant {
            return Err(EngineError::Occupied {
                node: handle.name.clone(),
                occupant,
            });
        }

        node.definition = definition.clone();
        debug!(node = %handle.name, labels = %definition.labels, "[LOCAL] node updated");
        Ok(node.handle.clone())
    }

    async fn remove(&self, handle: &NodeHandle) -> Result<(), EngineError> {
        self.check_failing()?;

        let mut nodes = self.lock();
        let node = nodes
            .get(&handle.name)
            .ok_or_else(|| EngineError::UnknownNode(handle.name.clone()))?;
        if let Some(occupant) = node.occupant {
            return Err(EngineError::Occupied {
                node: handle.name.clone(),
                occupant,
            });
        }

        nodes.remove(&handle.name);
        info!(node = %handle.name, "[LOCAL] node removed");
        Ok(())
    }

    fn existing(&self, name: &NodeName) -> Option<(NodeHandle, NodeDefinition)> {
        self.lock()
            .get(name)
            .map(|node| (node.handle.clone(), node.definition.clone()))
    }
}

impl Executor for LocalEngine {
    fn submit(&self, binding: &Binding) -> Result<(), EngineError> {
        let mut nodes = self.lock();
        let node = nodes
            .get_mut(&binding.node)
            .ok_or_else(|| EngineError::UnknownNode(binding.node.clone()))?;
        if let Some(occupant) = node.occupant {
            return Err(EngineError::Occupied {
                node: binding.node.clone(),
                occupant,
            });
        }

        node.occupant = Some(binding.reservation);
        debug!(node = %binding.node, reservation = %binding.reservation, owner = %binding.owner, "[LOCAL] reservation started");
        Ok(())
    }

    fn complete(&self, binding: &Binding) -> Result<CompletionEvent, EngineError> {
        let mut nodes = self.lock();
        let node = nodes
            .get_mut(&binding.node)
            .ok_or_else(|| EngineError::UnknownNode(binding.node.clone()))?;
        if node.occupant != Some(binding.reservation) {
            return Err(EngineError::NotRunning {
                node: binding.node.clone(),
                reservation: binding.reservation,
            });
        }

        node.occupant = None;
        debug!(node = %binding.node, reservation = %binding.reservation, "[LOCAL] reservation finished");
        Ok(CompletionEvent {
            reservation: binding.reservation,
            node: binding.node.clone(),
            owner: binding.owner.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn definition(labels: &str) -> NodeDefinition {
        NodeDefinition {
            labels: labels.to_string(),
            description: None,
            launch: BTreeMap::new(),
        }
    }

    fn name(s: &str) -> NodeName {
        NodeName::parse(s).unwrap()
    }

    fn binding(node: &str, id: u64) -> Binding {
        Binding {
            reservation: ReservationId::new(id),
            node: name(node),
            owner: PartyName::parse("jenkins1").unwrap(),
        }
    }

    #[tokio::test]
    async fn test_create_update_keeps_incarnation() {
        let engine = LocalEngine::new();
        let handle = engine.create(&name("n1"), &definition("a")).await.unwrap();
        assert!(engine.is_online(&name("n1")));

        let updated = engine.update(&handle, &definition("b")).await.unwrap();
        assert_eq!(updated, handle);
        assert_eq!(engine.definition(&name("n1")).unwrap().labels, "b");

        engine.remove(&handle).await.unwrap();
        let recreated = engine.create(&name("n1"), &definition("b")).await.unwrap();
        assert_ne!(recreated.incarnation, handle.incarnation);
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let engine = LocalEngine::new();
        engine.create(&name("n1"), &definition("a")).await.unwrap();
        let err = engine.create(&name("n1"), &definition("a")).await.unwrap_err();
        assert_eq!(err, EngineError::AlreadyExists(name("n1")));
    }

    #[tokio::test]
    async fn test_existing_reports_applied_definition() {
        let engine = LocalEngine::new();
        assert!(engine.existing(&name("n1")).is_none());

        let handle = engine.create(&name("n1"), &definition("a")).await.unwrap();
        let (existing, applied) = engine.existing(&name("n1")).unwrap();
        assert_eq!(existing, handle);
        assert_eq!(applied, definition("a"));
    }

    #[tokio::test]
    async fn test_single_occupancy() {
        let engine = LocalEngine::new();
        let handle = engine.create(&name("n1"), &definition("a")).await.unwrap();

        engine.submit(&binding("n1", 1)).unwrap();
        assert!(!engine.is_idle(&name("n1")));
        assert!(matches!(
            engine.submit(&binding("n1", 2)),
            Err(EngineError::Occupied { .. })
        ));

        // Busy nodes refuse lifecycle changes.
        assert!(engine.update(&handle, &definition("b")).await.is_err());
        assert!(engine.remove(&handle).await.is_err());

        assert!(matches!(
            engine.complete(&binding("n1", 2)),
            Err(EngineError::NotRunning { .. })
        ));
        let event = engine.complete(&binding("n1", 1)).unwrap();
        assert_eq!(event.reservation, ReservationId::new(1));
        assert!(engine.is_idle(&name("n1")));
        engine.remove(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_engine() {
        let engine = LocalEngine::new();
        engine.set_failing(true);
        assert!(matches!(
            engine.create(&name("n1"), &definition("a")).await,
            Err(EngineError::Failed(_))
        ));
        assert_eq!(engine.node_count(), 0);
    }

    #[test]
    fn test_unknown_node_is_idle() {
        let engine = LocalEngine::new();
        assert!(engine.is_idle(&name("ghost")));
        assert!(matches!(
            engine.submit(&binding("ghost", 1)),
            Err(EngineError::UnknownNode(_))
        ));
    }
}
