//! Transaction Engine
//!
//! A transaction is one atomic unit of work on a context: every write,
//! reducer and nested dispatch performed through it lands in a private set of
//! *drafts*. The store is only touched when the transaction commits, so a
//! failure anywhere leaves the context exactly as it was.
//!
//! # Versions
//!
//! Every cached value carries a version stamped from the context's clock.
//! A computed atom records the version of each dependency it read. To decide
//! whether the atom is stale, the engine *actualizes* each recorded
//! dependency (recursively) and compares versions; only a moved version
//! triggers recomputation. A value that compares equal under the atom's
//! equality policy keeps its old version, which stops the cascade right
//! there.
//!
//! # Propagation
//!
//! Once the caller's closure returns, the scheduler lists the mounted atoms
//! downstream of every written atom in topological order. Each one is
//! actualized; the finalized set guarantees it is validated at most once, so
//! a diamond recomputes its shared descendant a single time. If a
//! recomputation reads a dependency that is not final yet, that dependency is
//! actualized first. An atom reached again while it is still computing is a
//! cycle.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tracing::{trace, warn};

use super::action::Action;
use super::atom::{Atom, AtomValue};
use super::context::Context;
use super::diagnostics::{Commit, Patch};
use crate::error::{Error, Result};
use crate::graph::scheduler;
use crate::graph::store::Listener;
use crate::graph::{AtomId, AtomKind, Deps, NodeRef, Value};

/// Work queued to run after the transaction has settled.
pub(crate) type Deferred = Box<dyn FnOnce(&Context) + Send>;

/// Transaction-local state of one atom.
struct Draft {
    node: NodeRef,
    value: Value,
    version: u64,
    deps: Deps,
    /// Committed value and version when the transaction first touched the
    /// atom; `None` if the atom was not cached yet.
    previous: Option<(Value, u64)>,
}

impl Draft {
    fn changed(&self) -> bool {
        self.previous
            .as_ref()
            .map_or(true, |(_, version)| *version != self.version)
    }
}

struct Snapshot {
    value: Value,
    version: u64,
    deps: Deps,
}

/// Listeners of one changed atom and the value to hand them.
pub(crate) struct Notification {
    value: Value,
    listeners: Vec<Listener>,
}

impl Notification {
    pub(crate) fn deliver(self) {
        for listener in &self.listeners {
            listener(&self.value);
        }
    }
}

/// Result of committing a transaction.
pub(crate) struct Outcome {
    pub(crate) commit: Commit,
    pub(crate) notifications: Vec<Notification>,
    pub(crate) deferred: Vec<Deferred>,
}

/// Handle to a running transaction.
///
/// Handed to [`Context::transact`] closures and action handlers. Reads see
/// the transaction's own writes; nothing is visible outside until commit.
pub struct Transaction {
    ctx: Context,
    id: u64,
    drafts: IndexMap<AtomId, Draft>,
    written: IndexSet<AtomId>,
    finalized: HashSet<AtomId>,
    computing: IndexMap<AtomId, Arc<str>>,
    notify_order: Vec<AtomId>,
    actions: Vec<Arc<str>>,
    deferred: Vec<Deferred>,
}

impl Transaction {
    pub(crate) fn new(ctx: Context) -> Self {
        let id = ctx.next_transaction_id();
        Self {
            ctx,
            id,
            drafts: IndexMap::new(),
            written: IndexSet::new(),
            finalized: HashSet::new(),
            computing: IndexMap::new(),
            notify_order: Vec::new(),
            actions: Vec::new(),
            deferred: Vec::new(),
        }
    }

    /// Sequence number of this transaction within its context.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Read an atom as of this transaction.
    pub fn get<T: AtomValue>(&mut self, atom: &Atom<T>) -> Result<T> {
        let node = atom.node();
        let (value, _) = self.actualize(&node)?;
        downcast(&value, &node)
    }

    /// Write a primitive atom.
    pub fn set<T: AtomValue>(&mut self, atom: &Atom<T>, value: T) -> Result<()> {
        self.write(&atom.node(), Arc::new(value))
    }

    /// Write a value derived from the atom's current value.
    pub fn update<T: AtomValue>(&mut self, atom: &Atom<T>, f: impl FnOnce(&T) -> T) -> Result<()> {
        let current = self.get(atom)?;
        self.set(atom, f(&current))
    }

    /// Dispatch an action as part of this transaction.
    pub fn dispatch<A, P>(&mut self, action: &Action<A, P>, args: A) -> Result<()>
    where
        A: 'static,
        P: Send + Sync + 'static,
    {
        action.run(self, args)
    }

    /// Number of atoms written so far.
    pub fn written_len(&self) -> usize {
        self.written.len()
    }

    pub(crate) fn record_action(&mut self, name: Arc<str>) {
        self.actions.push(name);
    }

    pub(crate) fn defer(&mut self, work: Deferred) {
        self.deferred.push(work);
    }

    fn write(&mut self, node: &NodeRef, value: Value) -> Result<()> {
        if node.kind() == AtomKind::Computed {
            return Err(Error::ReadOnly {
                atom: node.label().to_string(),
            });
        }
        let (_, before) = self.actualize(node)?;
        let (_, after) = self.stage(node, value, Deps::new());
        if after != before {
            let id = node.id();
            self.written.insert(id);
            // Anything validated before this write may now be stale.
            self.finalized.clear();
            self.finalized.insert(id);
        }
        Ok(())
    }

    /// Bring `node` up to date within this transaction and return its value
    /// and version.
    pub(crate) fn actualize(&mut self, node: &NodeRef) -> Result<(Value, u64)> {
        let id = node.id();
        if self.finalized.contains(&id) {
            if let Some(current) = self.snapshot(id) {
                return Ok((current.value, current.version));
            }
        }
        if self.computing.contains_key(&id) {
            return Err(self.cycle(node));
        }
        let max_depth = self.ctx.config().max_depth;
        if self.computing.len() >= max_depth {
            let mut path: Vec<String> = self
                .computing
                .values()
                .map(|label| label.to_string())
                .collect();
            path.push(node.label().to_string());
            warn!(depth = max_depth, transaction = self.id, "dependency chain too deep");
            return Err(Error::DepthExceeded { depth: max_depth, path });
        }

        let result = match (node.kind(), self.snapshot(id)) {
            (AtomKind::Primitive, Some(current)) => (current.value, current.version),
            (AtomKind::Primitive, None) => {
                let mut spy = Spy::new(self, id);
                let initial = node
                    .compute(&mut spy)
                    .map_err(|err| Error::from_user(&node.label(), err))?;
                self.stage(node, initial, Deps::new())
            }
            (AtomKind::Computed, Some(current)) => {
                if self.is_stale(node, &current.deps)? {
                    self.recompute(node)?
                } else {
                    (current.value, current.version)
                }
            }
            (AtomKind::Computed, None) => self.recompute(node)?,
        };
        self.finalized.insert(id);
        Ok(result)
    }

    fn is_stale(&mut self, node: &NodeRef, deps: &Deps) -> Result<bool> {
        let id = node.id();
        self.computing.insert(id, node.label());
        let result = self.check_deps(deps);
        self.computing.shift_remove(&id);
        result
    }

    fn check_deps(&mut self, deps: &Deps) -> Result<bool> {
        for (dep, seen) in deps {
            let Some(dep_node) = self.lookup(*dep) else {
                return Ok(true);
            };
            let (_, version) = self.actualize(&dep_node)?;
            if version != *seen {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn recompute(&mut self, node: &NodeRef) -> Result<(Value, u64)> {
        let id = node.id();
        self.computing.insert(id, node.label());
        let mut spy = Spy::new(self, id);
        let result = node.compute(&mut spy);
        let deps = spy.deps;
        self.computing.shift_remove(&id);

        let value = result.map_err(|err| Error::from_user(&node.label(), err))?;
        trace!(atom = %node.label(), transaction = self.id, deps = deps.len(), "recomputed");
        Ok(self.stage(node, value, deps))
    }

    /// Put a value into the drafts, deciding its version.
    ///
    /// A value equal to the committed one restores the committed version;
    /// a value equal to the current draft keeps the draft's version;
    /// anything else gets a fresh version.
    fn stage(&mut self, node: &NodeRef, value: Value, deps: Deps) -> (Value, u64) {
        let id = node.id();
        let (previous, current) = match self.drafts.get(&id) {
            Some(draft) => (
                draft.previous.clone(),
                Some((draft.value.clone(), draft.version)),
            ),
            None => {
                let committed = self
                    .ctx
                    .store()
                    .get(id)
                    .map(|entry| (entry.value.clone(), entry.version));
                (committed.clone(), committed)
            }
        };

        let (value, version) = match (&previous, &current) {
            (Some((old, version)), _) if node.equals(old, &value) => (old.clone(), *version),
            (_, Some((old, version))) if node.equals(old, &value) => (old.clone(), *version),
            _ => (value, self.ctx.next_version()),
        };

        self.drafts.insert(
            id,
            Draft {
                node: node.clone(),
                value: value.clone(),
                version,
                deps,
                previous,
            },
        );
        (value, version)
    }

    fn snapshot(&self, id: AtomId) -> Option<Snapshot> {
        if let Some(draft) = self.drafts.get(&id) {
            return Some(Snapshot {
                value: draft.value.clone(),
                version: draft.version,
                deps: draft.deps.clone(),
            });
        }
        self.ctx.store().get(id).map(|entry| Snapshot {
            value: entry.value.clone(),
            version: entry.version,
            deps: entry.deps.clone(),
        })
    }

    fn lookup(&self, id: AtomId) -> Option<NodeRef> {
        if let Some(draft) = self.drafts.get(&id) {
            return Some(draft.node.clone());
        }
        self.ctx.store().get(id).map(|entry| entry.node.clone())
    }

    fn cycle(&self, node: &NodeRef) -> Error {
        let start = self.computing.get_index_of(&node.id()).unwrap_or(0);
        let mut path: Vec<String> = self
            .computing
            .values()
            .skip(start)
            .map(|label| label.to_string())
            .collect();
        path.push(node.label().to_string());
        warn!(path = ?path, transaction = self.id, "cyclic dependency");
        Error::CyclicDependency { path }
    }

    /// Revisit every mounted atom downstream of the written atoms.
    pub(crate) fn propagate(&mut self) -> Result<()> {
        let roots: Vec<AtomId> = self.written.iter().copied().collect();
        let order = scheduler::affected(&self.ctx.store(), &roots);
        trace!(transaction = self.id, roots = roots.len(), affected = order.len(), "propagating");

        for id in &order {
            if let Some(node) = self.lookup(*id) {
                self.actualize(&node)?;
            }
        }

        self.notify_order = roots;
        self.notify_order.extend(order);
        Ok(())
    }

    /// Apply the drafts to the store and collect what has to be announced.
    pub(crate) fn commit(self) -> Outcome {
        let Transaction {
            ctx,
            id,
            drafts,
            notify_order,
            actions,
            deferred,
            ..
        } = self;

        let mut patches = Vec::with_capacity(drafts.len());
        let mut changed = IndexSet::new();
        let mut notifications = Vec::new();
        {
            let mut store = ctx.store();
            let mut applied = Vec::with_capacity(drafts.len());
            for (atom, draft) in drafts {
                let is_changed = draft.changed();
                if is_changed {
                    changed.insert(atom);
                }
                trace!(atom = %draft.node.label(), transaction = id, changed = is_changed, "patch");
                patches.push(Patch::new(
                    atom,
                    draft.node.label(),
                    draft.previous.map(|(value, _)| value),
                    draft.value.clone(),
                    is_changed,
                ));
                store.apply(atom, draft.node, draft.value, draft.version, draft.deps);
                applied.push(atom);
            }
            for atom in applied {
                store.relink(atom);
            }

            let mut announced = HashSet::new();
            let ordered = notify_order
                .into_iter()
                .filter(|atom| changed.contains(atom))
                .chain(changed.iter().copied());
            for atom in ordered {
                if !announced.insert(atom) {
                    continue;
                }
                let listeners = store.listeners(atom);
                if listeners.is_empty() {
                    continue;
                }
                if let Some(entry) = store.get(atom) {
                    notifications.push(Notification {
                        value: entry.value.clone(),
                        listeners,
                    });
                }
            }
        }

        Outcome {
            commit: Commit::new(id, actions, patches),
            notifications,
            deferred,
        }
    }
}

/// Tracking read handle passed to computed atoms.
///
/// Every atom read through [`get`](Self::get) becomes a dependency of the
/// atom being computed.
pub struct Spy<'t> {
    tx: &'t mut Transaction,
    owner: AtomId,
    deps: Deps,
}

impl<'t> Spy<'t> {
    fn new(tx: &'t mut Transaction, owner: AtomId) -> Self {
        Self {
            tx,
            owner,
            deps: Deps::new(),
        }
    }

    /// Read an atom and record it as a dependency.
    pub fn get<T: AtomValue>(&mut self, atom: &Atom<T>) -> Result<T> {
        let node = atom.node();
        let (value, version) = self.tx.actualize(&node)?;
        let id = node.id();
        if !self.deps.iter().any(|(dep, _)| *dep == id) {
            self.deps.push((id, version));
        }
        downcast(&value, &node)
    }

    /// Read an atom without recording a dependency.
    pub fn peek<T: AtomValue>(&mut self, atom: &Atom<T>) -> Result<T> {
        self.tx.get(atom)
    }

    /// The atom being computed.
    pub fn owner(&self) -> AtomId {
        self.owner
    }

    /// Dependencies recorded so far in this computation.
    pub fn dependencies(&self) -> impl Iterator<Item = AtomId> + '_ {
        self.deps.iter().map(|(id, _)| *id)
    }
}

pub(crate) fn downcast<T: AtomValue>(value: &Value, node: &NodeRef) -> Result<T> {
    value
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| Error::TypeMismatch {
            atom: node.label().to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted<F>(counter: &Arc<AtomicUsize>, f: F) -> Atom<i32>
    where
        F: Fn(&mut Spy<'_>) -> Result<i32> + Send + Sync + 'static,
    {
        let counter = counter.clone();
        Atom::computed(move |spy| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(f(spy)?)
        })
    }

    #[test]
    fn reads_see_own_writes() {
        let ctx = Context::new();
        let a = Atom::new(1);
        let doubled = {
            let a = a.clone();
            Atom::computed(move |spy| Ok(spy.get(&a)? * 2))
        };

        ctx.transact(|tx| {
            assert_eq!(tx.get(&doubled)?, 2);
            tx.set(&a, 5)?;
            assert_eq!(tx.get(&doubled)?, 10);
            // Not committed yet.
            Ok(())
        })
        .unwrap();
        assert_eq!(ctx.get(&doubled).unwrap(), 10);
    }

    #[test]
    fn unchanged_dependencies_skip_recomputation() {
        let ctx = Context::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let a = Atom::new(1);
        let other = Atom::new(0);
        let derived = {
            let a = a.clone();
            counted(&runs, move |spy| spy.get(&a))
        };

        assert_eq!(ctx.get(&derived).unwrap(), 1);
        ctx.set(&other, 3).unwrap();
        assert_eq!(ctx.get(&derived).unwrap(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        ctx.set(&a, 2).unwrap();
        assert_eq!(ctx.get(&derived).unwrap(), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn writing_back_the_committed_value_is_not_a_change() {
        let ctx = Context::new();
        let a = Atom::new(1);
        let before = {
            ctx.get(&a).unwrap();
            ctx.store().get(a.id()).map(|entry| entry.version)
        };

        ctx.transact(|tx| {
            tx.set(&a, 7)?;
            tx.set(&a, 1)?;
            Ok(())
        })
        .unwrap();

        let after = ctx.store().get(a.id()).map(|entry| entry.version);
        assert_eq!(before, after);
    }

    #[test]
    fn peek_does_not_track() {
        let ctx = Context::new();
        let a = Atom::new(1);
        let b = Atom::new(10);
        let sum = {
            let (a, b) = (a.clone(), b.clone());
            Atom::computed(move |spy| Ok(spy.get(&a)? + spy.peek(&b)?))
        };

        assert_eq!(ctx.get(&sum).unwrap(), 11);
        assert_eq!(ctx.dependencies(&sum), vec![a.id()]);
    }

    #[test]
    fn writing_a_computed_atom_fails() {
        let ctx = Context::new();
        let derived = Atom::computed(|_spy| Ok(1));
        match ctx.transact(|tx| tx.set(&derived, 2)) {
            Err(Error::ReadOnly { .. }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let ctx = Context::new();
        let slot: Arc<parking_lot::Mutex<Option<Atom<i32>>>> = Arc::default();
        let looped = {
            let slot = slot.clone();
            Atom::<i32>::builder().name("looped").computed(move |spy| {
                let me = slot.lock().clone();
                match me {
                    Some(me) => Ok(spy.get(&me)? + 1),
                    None => Ok(0),
                }
            })
        };
        *slot.lock() = Some(looped.clone());

        match ctx.get(&looped) {
            Err(Error::CyclicDependency { path }) => assert_eq!(path, vec!["looped", "looped"]),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn written_len_counts_changed_atoms_once() {
        let ctx = Context::new();
        let a = Atom::new(1);
        let b = Atom::new(2);

        ctx.transact(|tx| {
            assert_eq!(tx.written_len(), 0);
            tx.set(&a, 1)?;
            assert_eq!(tx.written_len(), 0);
            tx.set(&a, 3)?;
            tx.set(&a, 4)?;
            tx.set(&b, 5)?;
            assert_eq!(tx.written_len(), 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn spy_reports_owner_and_dependencies() {
        let ctx = Context::new();
        let a = Atom::new(1);
        let b = Atom::new(2);
        let seen: Arc<parking_lot::Mutex<Vec<(AtomId, Vec<AtomId>)>>> = Arc::default();
        let sum = {
            let (a, b, seen) = (a.clone(), b.clone(), seen.clone());
            Atom::computed(move |spy| {
                let total = spy.get(&a)? + spy.get(&b)? + spy.peek(&a)?;
                seen.lock().push((spy.owner(), spy.dependencies().collect()));
                Ok(total)
            })
        };

        assert_eq!(ctx.get(&sum).unwrap(), 4);
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, sum.id());
        assert_eq!(seen[0].1, vec![a.id(), b.id()]);
    }

    #[test]
    fn deep_chain_reports_depth_not_cycle() {
        let ctx = Context::with_config(ContextConfig::default().with_max_depth(4));
        let root = Atom::new(0);
        let mut top = root.clone();
        for _ in 0..6 {
            let prev = top.clone();
            top = Atom::computed(move |spy| Ok(spy.get(&prev)? + 1));
        }

        match ctx.get(&top) {
            Err(Error::DepthExceeded { depth, path }) => {
                assert_eq!(depth, 4);
                assert_eq!(path.len(), 5);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
