//! Atom Cache
//!
//! The store is the only mutable state shared by a context. It maps each
//! atom id to its committed value, the dependencies recorded by its last
//! computation, the dependents that currently keep it mounted, and its
//! external listeners.
//!
//! # Mounting
//!
//! An entry is *mounted* while it has at least one listener or one mounted
//! dependent. Only mounted entries carry dependent edges, which is what the
//! scheduler walks when a write has to be pushed through the graph.
//! Unmounted entries are still cached, but they are revalidated lazily
//! against their dependency versions on the next read.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use super::node::{AtomId, Deps, NodeRef, Value};
use crate::reactive::ListenerId;

/// Erased listener callback.
pub(crate) type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// A cached atom.
pub(crate) struct Entry {
    pub(crate) node: NodeRef,
    pub(crate) value: Value,
    pub(crate) version: u64,
    pub(crate) deps: Deps,
    pub(crate) dependents: IndexSet<AtomId>,
    pub(crate) listeners: IndexMap<ListenerId, Listener>,
    /// Upstream atoms this entry is registered on as a dependent. Empty
    /// while unmounted. `deps` can be overwritten by a commit before the
    /// edges catch up, so unmounting always walks this set instead.
    linked: Vec<AtomId>,
}

impl Entry {
    fn new(node: NodeRef, value: Value, version: u64, deps: Deps) -> Self {
        Self {
            node,
            value,
            version,
            deps,
            dependents: IndexSet::new(),
            listeners: IndexMap::new(),
            linked: Vec::new(),
        }
    }

    pub(crate) fn is_mounted(&self) -> bool {
        !self.listeners.is_empty() || !self.dependents.is_empty()
    }

    fn dep_ids(&self) -> Vec<AtomId> {
        self.deps.iter().map(|(id, _)| *id).collect()
    }
}

/// The atom cache of one context.
#[derive(Default)]
pub(crate) struct Store {
    entries: HashMap<AtomId, Entry>,
}

impl Store {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, id: AtomId) -> Option<&Entry> {
        self.entries.get(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Remove every entry. The entries are handed back so that the caller
    /// can drop them after releasing the lock.
    pub(crate) fn drain(&mut self) -> Vec<Entry> {
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    /// Write a committed state into the cache.
    ///
    /// Dependent edges are left alone; the caller must
    /// [`relink`](Self::relink) every applied entry once the whole commit
    /// has been applied. The order of those calls does not matter.
    pub(crate) fn apply(&mut self, id: AtomId, node: NodeRef, value: Value, version: u64, deps: Deps) {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.value = value;
                entry.version = version;
                entry.deps = deps;
            }
            None => {
                self.entries.insert(id, Entry::new(node, value, version, deps));
            }
        }
    }

    /// Bring the dependent edges of a mounted entry in line with its current
    /// dependency list. Unmounted entries hold no edges and are skipped.
    pub(crate) fn relink(&mut self, id: AtomId) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        if !entry.is_mounted() {
            return;
        }
        let current = entry.dep_ids();
        if current == entry.linked {
            return;
        }
        let previous = std::mem::replace(&mut entry.linked, current.clone());

        // Link first so that a dependency shared by both lists never
        // transiently unmounts.
        for dep in current.iter().filter(|dep| !previous.contains(dep)) {
            self.link(*dep, id);
        }
        for dep in previous.iter().filter(|dep| !current.contains(dep)) {
            self.unlink(*dep, id);
        }
    }

    /// Register a newly mounted entry on each of its dependencies.
    fn mount(&mut self, id: AtomId) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        let deps = entry.dep_ids();
        entry.linked = deps.clone();
        for dep in deps {
            self.link(dep, id);
        }
    }

    /// Drop every edge a no longer mounted entry registered upstream.
    fn unmount(&mut self, id: AtomId) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        for dep in std::mem::take(&mut entry.linked) {
            self.unlink(dep, id);
        }
    }

    /// Add `dependent` to the dependents of `dep`, mounting `dep` (and its
    /// own dependencies) if it was not mounted yet.
    pub(crate) fn link(&mut self, dep: AtomId, dependent: AtomId) {
        let Some(entry) = self.entries.get_mut(&dep) else {
            return;
        };
        let was_mounted = entry.is_mounted();
        entry.dependents.insert(dependent);
        if !was_mounted {
            self.mount(dep);
        }
    }

    /// Remove `dependent` from the dependents of `dep`, unmounting `dep`
    /// when nothing keeps it mounted anymore.
    pub(crate) fn unlink(&mut self, dep: AtomId, dependent: AtomId) {
        let Some(entry) = self.entries.get_mut(&dep) else {
            return;
        };
        if entry.dependents.shift_remove(&dependent) && !entry.is_mounted() {
            self.unmount(dep);
        }
    }

    /// Register a listener. Returns `false` if the atom is not cached.
    pub(crate) fn add_listener(&mut self, id: AtomId, key: ListenerId, listener: Listener) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };
        let was_mounted = entry.is_mounted();
        entry.listeners.insert(key, listener);
        if !was_mounted {
            self.mount(id);
        }
        true
    }

    /// Remove a listener and hand it back. Returns `None` if it was not
    /// registered.
    pub(crate) fn remove_listener(&mut self, id: AtomId, key: ListenerId) -> Option<Listener> {
        let entry = self.entries.get_mut(&id)?;
        let listener = entry.listeners.shift_remove(&key)?;
        if !entry.is_mounted() {
            self.unmount(id);
        }
        Some(listener)
    }

    /// Snapshot of the listeners registered on an atom.
    pub(crate) fn listeners(&self, id: AtomId) -> Vec<Listener> {
        self.entries
            .get(&id)
            .map(|entry| entry.listeners.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Evict unmounted entries whose atom definition is referenced by
    /// nothing but this cache, and hand them back.
    ///
    /// Dropping an evicted entry may release the last handle to another atom
    /// captured by its computation, so callers repeat this (after dropping
    /// the previous batch) until it returns nothing.
    pub(crate) fn collect_garbage(&mut self) -> Vec<Entry> {
        let unreachable: Vec<AtomId> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_mounted() && Arc::strong_count(&entry.node) == 1)
            .map(|(id, _)| *id)
            .collect();
        unreachable
            .iter()
            .filter_map(|id| self.entries.remove(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::graph::node::{AtomKind, AtomNode};
    use crate::reactive::Spy;
    use smallvec::smallvec;

    struct Stub(AtomId);

    impl AtomNode for Stub {
        fn id(&self) -> AtomId {
            self.0
        }
        fn label(&self) -> Arc<str> {
            self.0.to_string().into()
        }
        fn kind(&self) -> AtomKind {
            AtomKind::Computed
        }
        fn compute(&self, _spy: &mut Spy<'_>) -> Result<Value, BoxError> {
            Ok(Arc::new(()))
        }
        fn equals(&self, _a: &Value, _b: &Value) -> bool {
            true
        }
    }

    fn insert(store: &mut Store, deps: &[AtomId]) -> (AtomId, NodeRef) {
        let id = AtomId::new();
        let node: NodeRef = Arc::new(Stub(id));
        let deps: Deps = deps.iter().map(|d| (*d, 0)).collect();
        store.apply(id, node.clone(), Arc::new(()), 0, deps);
        (id, node)
    }

    fn noop() -> Listener {
        Arc::new(|_: &Value| {})
    }

    #[test]
    fn listener_mounts_upstream_chain() {
        let mut store = Store::new();
        let (a, _a) = insert(&mut store, &[]);
        let (b, _b) = insert(&mut store, &[a]);
        let (c, _c) = insert(&mut store, &[b]);

        assert!(!store.get(a).unwrap().is_mounted());

        let key = ListenerId::new();
        assert!(store.add_listener(c, key, noop()));
        assert!(store.get(b).unwrap().dependents.contains(&c));
        assert!(store.get(a).unwrap().dependents.contains(&b));

        assert!(store.remove_listener(c, key).is_some());
        assert!(!store.get(a).unwrap().is_mounted());
        assert!(!store.get(b).unwrap().is_mounted());

        // Removing again is a no-op.
        assert!(store.remove_listener(c, key).is_none());
    }

    #[test]
    fn relink_moves_edges() {
        let mut store = Store::new();
        let (x, _x) = insert(&mut store, &[]);
        let (y, _y) = insert(&mut store, &[]);
        let (c, c_node) = insert(&mut store, &[x]);
        store.add_listener(c, ListenerId::new(), noop());
        assert!(store.get(x).unwrap().is_mounted());

        store.apply(c, c_node, Arc::new(()), 1, smallvec![(y, 0)]);
        store.relink(c);

        assert!(!store.get(x).unwrap().is_mounted());
        assert!(store.get(y).unwrap().dependents.contains(&c));
    }

    #[test]
    fn unmount_releases_edges_that_were_linked() {
        // m reads x, x reads p. One commit switches x to q and m off x.
        let mut store = Store::new();
        let (p, _p) = insert(&mut store, &[]);
        let (q, _q) = insert(&mut store, &[]);
        let (k, _k) = insert(&mut store, &[]);
        let (x, x_node) = insert(&mut store, &[p]);
        let (m, m_node) = insert(&mut store, &[x]);
        let key = ListenerId::new();
        store.add_listener(m, key, noop());
        assert!(store.get(p).unwrap().dependents.contains(&x));

        store.apply(m, m_node, Arc::new(()), 1, smallvec![(k, 0)]);
        store.apply(x, x_node, Arc::new(()), 1, smallvec![(q, 0)]);
        store.relink(m);
        store.relink(x);

        for id in [x, p, q] {
            let entry = store.get(id).unwrap();
            assert!(!entry.is_mounted());
            assert!(entry.linked.is_empty());
        }
        assert!(store.get(k).unwrap().dependents.contains(&m));

        store.remove_listener(m, key);
        assert!(!store.get(k).unwrap().is_mounted());
    }

    #[test]
    fn relink_order_does_not_matter() {
        let mut store = Store::new();
        let (p, _p) = insert(&mut store, &[]);
        let (q, _q) = insert(&mut store, &[]);
        let (x, x_node) = insert(&mut store, &[p]);
        let (m, m_node) = insert(&mut store, &[x]);
        let key = ListenerId::new();
        store.add_listener(m, key, noop());

        // Dependency relinked before its dependent this time.
        store.apply(x, x_node, Arc::new(()), 1, smallvec![(q, 0)]);
        store.apply(m, m_node, Arc::new(()), 1, smallvec![(x, 1), (p, 0)]);
        store.relink(x);
        store.relink(m);

        assert_eq!(store.get(p).unwrap().dependents.len(), 1);
        assert!(store.get(p).unwrap().dependents.contains(&m));
        assert!(store.get(q).unwrap().dependents.contains(&x));

        store.remove_listener(m, key);
        for id in [x, p, q] {
            assert!(!store.get(id).unwrap().is_mounted());
        }
    }

    #[test]
    fn garbage_collection_skips_reachable_and_mounted() {
        let mut store = Store::new();
        let (held, _held) = insert(&mut store, &[]);
        let (dropped, node) = insert(&mut store, &[]);
        drop(node);
        let (mounted, node) = insert(&mut store, &[]);
        store.add_listener(mounted, ListenerId::new(), noop());
        drop(node);

        assert_eq!(store.collect_garbage().len(), 1);
        assert!(store.get(dropped).is_none());
        assert!(store.get(held).is_some());
        assert!(store.get(mounted).is_some());
    }
}
