//! Published pool state.
//!
//! Readers (protocol handlers, the matcher) take a consistent
//! [`PoolView`] with a single atomic load; the reconciler swaps in a new
//! view at the end of every pass. A view is never mutated after publication.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use nodeshare_id::NodeName;
use nodeshare_reconcile::RemovalState;

use crate::engine::NodeHandle;
use crate::reconciler::ReconcileError;
use crate::snapshot::{ConfigSnapshot, NodeDefinition};

/// A node the pool has materialized through the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedNode {
    pub name: NodeName,

    /// Definition currently applied on the engine.
    pub definition: NodeDefinition,

    pub handle: NodeHandle,

    pub removal: RemovalState,
}

impl ManagedNode {
    /// Label set used for matching: the declared atoms plus the node's own
    /// name.
    pub fn labels(&self) -> BTreeSet<&str> {
        self.definition
            .label_atoms()
            .chain(std::iter::once(self.name.as_str()))
            .collect()
    }

    pub fn is_active(&self) -> bool {
        self.removal.is_active()
    }
}

/// Nodes currently managed by the pool, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    nodes: BTreeMap<NodeName, ManagedNode>,
}

impl Inventory {
    pub fn get(&self, name: &NodeName) -> Option<&ManagedNode> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &NodeName) -> bool {
        self.nodes.contains_key(name)
    }

    /// Nodes in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ManagedNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every label an active node can satisfy, sorted.
    pub fn served_labels(&self) -> Vec<String> {
        self.nodes
            .values()
            .filter(|node| node.is_active())
            .flat_map(|node| node.labels())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub(crate) fn nodes(&self) -> &BTreeMap<NodeName, ManagedNode> {
        &self.nodes
    }

    pub(crate) fn get_mut(&mut self, name: &NodeName) -> Option<&mut ManagedNode> {
        self.nodes.get_mut(name)
    }

    pub(crate) fn insert(&mut self, node: ManagedNode) {
        self.nodes.insert(node.name.clone(), node);
    }

    pub(crate) fn remove(&mut self, name: &NodeName) -> Option<ManagedNode> {
        self.nodes.remove(name)
    }
}

/// Consistent snapshot of configuration and inventory.
#[derive(Debug, Clone, Default)]
pub struct PoolView {
    /// Last successfully loaded configuration.
    pub snapshot: Option<Arc<ConfigSnapshot>>,

    pub inventory: Inventory,
}

/// The shared pool.
#[derive(Debug, Default)]
pub struct Pool {
    view: ArcSwap<PoolView>,
    activated: AtomicBool,
    error: ArcSwapOption<ReconcileError>,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> Arc<PoolView> {
        self.view.load_full()
    }

    /// Last successfully loaded configuration, if any.
    pub fn config(&self) -> Option<Arc<ConfigSnapshot>> {
        self.view.load().snapshot.clone()
    }

    /// Whether a configuration has ever been loaded.
    pub fn is_activated(&self) -> bool {
        self.activated.load(Ordering::SeqCst)
    }

    /// Error of the most recent pass, cleared by the next clean pass.
    pub fn error(&self) -> Option<Arc<ReconcileError>> {
        self.error.load_full()
    }

    /// Publish the outcome of a pass that loaded `snapshot`.
    pub(crate) fn install(&self, snapshot: Arc<ConfigSnapshot>, inventory: Inventory) {
        self.view.store(Arc::new(PoolView {
            snapshot: Some(snapshot),
            inventory,
        }));
        self.activated.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_error(&self, error: Option<ReconcileError>) {
        self.error.store(error.map(Arc::new));
    }

    /// Forget everything. Nodes still held by the engine are adopted by the
    /// next pass.
    pub fn reset(&self) {
        self.view.store(Arc::new(PoolView::default()));
        self.activated.store(false, Ordering::SeqCst);
        self.error.store(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn managed(name: &str, labels: &str, removal: RemovalState) -> ManagedNode {
        let name = NodeName::parse(name).unwrap();
        ManagedNode {
            handle: NodeHandle {
                name: name.clone(),
                incarnation: 1,
            },
            name,
            definition: NodeDefinition {
                labels: labels.to_string(),
                description: None,
                launch: BTreeMap::new(),
            },
            removal,
        }
    }

    #[test]
    fn test_labels_include_node_name() {
        let node = managed("solaris1.acme.com", "solaris11 sparc", RemovalState::Active);
        let labels = node.labels();
        assert!(labels.contains("solaris11"));
        assert!(labels.contains("sparc"));
        assert!(labels.contains("solaris1.acme.com"));
        assert_eq!(labels.len(), 3);
    }

    #[test]
    fn test_served_labels_skip_pending_removal() {
        let mut inventory = Inventory::default();
        inventory.insert(managed("w1", "windows w2k12", RemovalState::Active));
        inventory.insert(managed("s1", "solaris11", RemovalState::PendingRemoval));

        assert_eq!(inventory.served_labels(), vec!["w1", "w2k12", "windows"]);
    }

    #[test]
    fn test_install_and_reset() {
        let pool = Pool::new();
        assert!(!pool.is_activated());
        assert!(pool.config().is_none());

        let snapshot = crate::snapshot::ConfigSnapshot::parse(&crate::repo::FileTree::from(
            nodeshare_testing::ConfigRepoFixture::dummy().into_files(),
        ))
        .unwrap();
        pool.install(Arc::new(snapshot), Inventory::default());
        assert!(pool.is_activated());
        assert!(pool.config().is_some());

        pool.set_error(Some(ReconcileError::NotConfigured));
        assert!(pool.error().is_some());

        pool.reset();
        assert!(!pool.is_activated());
        assert!(pool.error().is_none());
        assert!(pool.view().inventory.is_empty());
    }
}
