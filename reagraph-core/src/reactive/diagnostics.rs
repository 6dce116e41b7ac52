//! Commit observers.
//!
//! Observers see every non-empty commit of a context: which actions were
//! dispatched and which atoms were written or recomputed, with their values
//! before and after. They run while the context is committing, before any
//! listener, and cannot write.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::atom::AtomValue;
use crate::graph::{AtomId, Value};

/// Unique identifier for a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) type Observer = Arc<dyn Fn(&Commit) + Send + Sync>;

/// One atom touched by a commit.
pub struct Patch {
    atom: AtomId,
    label: Arc<str>,
    previous: Option<Value>,
    next: Value,
    changed: bool,
}

impl Patch {
    pub(crate) fn new(
        atom: AtomId,
        label: Arc<str>,
        previous: Option<Value>,
        next: Value,
        changed: bool,
    ) -> Self {
        Self {
            atom,
            label,
            previous,
            next,
            changed,
        }
    }

    pub fn atom(&self) -> AtomId {
        self.atom
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the value differs from the committed one under the atom's
    /// equality policy.
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// The atom had no cached value before this commit.
    pub fn is_created(&self) -> bool {
        self.previous.is_none()
    }

    /// Value before the commit, if the atom was cached and holds a `T`.
    pub fn previous<T: AtomValue>(&self) -> Option<T> {
        self.previous.as_ref()?.downcast_ref::<T>().cloned()
    }

    /// Value after the commit, if the atom holds a `T`.
    pub fn next<T: AtomValue>(&self) -> Option<T> {
        self.next.downcast_ref::<T>().cloned()
    }
}

/// Everything a transaction committed.
pub struct Commit {
    transaction: u64,
    actions: Vec<Arc<str>>,
    patches: Vec<Patch>,
}

impl Commit {
    pub(crate) fn new(transaction: u64, actions: Vec<Arc<str>>, patches: Vec<Patch>) -> Self {
        Self {
            transaction,
            actions,
            patches,
        }
    }

    pub fn transaction(&self) -> u64 {
        self.transaction
    }

    /// Names of the dispatched actions, in dispatch order.
    pub fn actions(&self) -> impl Iterator<Item = &str> + '_ {
        self.actions.iter().map(|name| &**name)
    }

    /// Every atom the transaction staged, in the order it was first staged.
    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    /// Patches whose value actually changed.
    pub fn changed(&self) -> impl Iterator<Item = &Patch> + '_ {
        self.patches.iter().filter(|patch| patch.changed)
    }

    /// A commit with no dispatched action and no changed atom.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && !self.patches.iter().any(|patch| patch.changed)
    }

    pub fn patch(&self, atom: AtomId) -> Option<&Patch> {
        self.patches.iter().find(|patch| patch.atom == atom)
    }

    /// Serializable view of this commit without the values.
    pub fn summary(&self) -> CommitSummary {
        CommitSummary {
            transaction: self.transaction,
            actions: self.actions.iter().map(|name| name.to_string()).collect(),
            patches: self
                .patches
                .iter()
                .map(|patch| PatchSummary {
                    atom: patch.atom.raw(),
                    label: patch.label.to_string(),
                    changed: patch.changed,
                    created: patch.is_created(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSummary {
    pub atom: u64,
    pub label: String,
    pub changed: bool,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub transaction: u64,
    pub actions: Vec<String>,
    pub patches: Vec<PatchSummary>,
}

impl CommitSummary {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Observer that logs each commit through `tracing`.
///
/// Installed automatically when [`ContextConfig::log_commits`] is set.
///
/// [`ContextConfig::log_commits`]: crate::ContextConfig::log_commits
pub fn log_commit(commit: &Commit) {
    let actions: Vec<&str> = commit.actions().collect();
    info!(
        transaction = commit.transaction(),
        actions = ?actions,
        changed = commit.changed().count(),
        "commit"
    );
    for patch in commit.changed() {
        debug!(
            transaction = commit.transaction(),
            atom = patch.label(),
            created = patch.is_created(),
            "patched"
        );
    }
}
