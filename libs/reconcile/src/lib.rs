//! Reconciliation loop primitives.
//!
//! This library provides helpers for implementing reconciliation loops
//! that converge live resources to a declared source of truth. Key concepts:
//!
//! - **Desired state**: What the pool should look like (from the config repository).
//! - **Applied state**: What has actually been requested from the execution engine.
//! - **Change set**: The minimal set of creates, updates and removals between the two.
//!
//! # Invariants
//!
//! - Diffing is deterministic given the same inputs (ordered by key)
//! - Unchanged entries are reported as such and never recreated
//! - Removal of a busy resource is deferred, never forced

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Digest of a resource definition.
///
/// Used to identify a node definition in logs and status output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecHash(String);

impl SpecHash {
    /// Hash a JSON value.
    ///
    /// `serde_json` keeps object keys sorted, so equal values with different
    /// insertion order hash the same.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let digest = Sha256::digest(json.to_string().as_bytes());
        Self(format!("sha256:{}", hex::encode(&digest[..16])))
    }

    /// Hash any serializable definition.
    ///
    /// Values that fail to serialize hash as `null`.
    pub fn of<T: Serialize>(value: &T) -> Self {
        let json = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        Self::from_json(&json)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Removal state of a managed resource.
///
/// A resource leaves the desired state while it may still be in use. It then
/// waits in `PendingRemoval` until it is observed idle on a later pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalState {
    /// Declared by the source of truth, eligible for new work.
    #[default]
    Active,

    /// No longer declared; removed as soon as it is idle.
    PendingRemoval,
}

impl RemovalState {
    /// Returns true if the resource may accept new work.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Transition for a resource that is no longer declared.
    ///
    /// Returns `None` when the resource should be removed now.
    pub fn on_undeclared(self, idle: bool) -> Option<Self> {
        if idle {
            None
        } else {
            Some(Self::PendingRemoval)
        }
    }

    /// Transition for a resource that is declared again.
    pub fn on_declared(self) -> Self {
        Self::Active
    }
}

/// Keys grouped by the action needed to converge applied to desired state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet<K> {
    /// Present only in the desired state.
    pub create: Vec<K>,

    /// Present in both, with a different definition.
    pub update: Vec<K>,

    /// Present in both, with an identical definition.
    pub unchanged: Vec<K>,

    /// Present only in the applied state.
    pub remove: Vec<K>,
}

impl<K> Default for ChangeSet<K> {
    fn default() -> Self {
        Self {
            create: Vec::new(),
            update: Vec::new(),
            unchanged: Vec::new(),
            remove: Vec::new(),
        }
    }
}

impl<K> ChangeSet<K> {
    /// Returns true if nothing needs to be created, updated or removed.
    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.remove.is_empty()
    }
}

/// Diff a desired map against an applied map.
///
/// `applied` may carry extra state per entry; `definition` projects the part
/// that is compared against the desired value.
pub fn plan_changes<K, D, A, F>(
    desired: &BTreeMap<K, D>,
    applied: &BTreeMap<K, A>,
    definition: F,
) -> ChangeSet<K>
where
    K: Ord + Clone,
    D: PartialEq,
    F: Fn(&A) -> &D,
{
    let mut changes = ChangeSet::default();

    for (key, wanted) in desired {
        match applied.get(key) {
            None => changes.create.push(key.clone()),
            Some(current) if definition(current) == wanted => {
                changes.unchanged.push(key.clone());
            }
            Some(_) => changes.update.push(key.clone()),
        }
    }

    changes.remove = applied
        .keys()
        .filter(|key| !desired.contains_key(*key))
        .cloned()
        .collect();

    changes
}

/// Default reconciliation interval.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Default interval between reservation maintenance cycles.
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_millis(500);
