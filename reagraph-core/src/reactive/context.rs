//! Reactive Context
//!
//! A context owns the cache of atom states and is the entry point for every
//! read, write, dispatch and subscription. Contexts are independent: the same
//! atoms can be evaluated in any number of them (one per test, one per
//! session, ...).
//!
//! # Phases
//!
//! A context runs at most one transaction at a time and moves through
//! [`Phase`]s while doing so:
//!
//! ```text
//! Idle -> Collecting -> Propagating -> Committing -> Settled -> Idle
//! ```
//!
//! Opening a transaction while the context is not idle fails with
//! [`Error::Reentrancy`]. Code running inside a transaction (computations,
//! handlers, reducers) must go through the [`Transaction`] or [`Spy`] it was
//! given instead. Listeners and observers run while `Committing`; they may
//! read and subscribe but not write. Effects run once the context is idle
//! again, so they are free to dispatch.
//!
//! [`Spy`]: super::Spy

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, warn};

use super::action::Action;
use super::atom::{Atom, AtomValue};
use super::diagnostics::{self, Commit, Observer, ObserverId};
use super::subscriber::{ListenerId, Subscription};
use super::transaction::{downcast, Transaction};
use crate::config::ContextConfig;
use crate::error::{Error, Result};
use crate::graph::store::{Listener, Store};
use crate::graph::{AtomId, AtomKind, Value};

/// Lifecycle phase of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No transaction is running.
    Idle,
    /// Writes and dispatches are being folded into the drafts.
    Collecting,
    /// Mounted dependents of the written atoms are being revalidated.
    Propagating,
    /// Drafts are applied; observers and listeners are being notified.
    Committing,
    /// The transaction is done and the context is about to become idle.
    Settled,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Collecting => "collecting",
            Phase::Propagating => "propagating",
            Phase::Committing => "committing",
            Phase::Settled => "settled",
        };
        f.write_str(name)
    }
}

pub(crate) struct ContextInner {
    config: ContextConfig,
    phase: Mutex<Phase>,
    pub(crate) store: Mutex<Store>,
    observers: RwLock<IndexMap<ObserverId, Observer>>,
    clock: AtomicU64,
    transactions: AtomicU64,
    disposed: AtomicBool,
}

/// Resets the phase to idle when dropped, including on early return.
struct PhaseGuard<'a> {
    inner: &'a ContextInner,
}

impl PhaseGuard<'_> {
    fn advance(&self, phase: Phase) {
        *self.inner.phase.lock() = phase;
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        *self.inner.phase.lock() = Phase::Idle;
    }
}

/// Handle to a reactive context. Cloning is cheap and shares the context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Create an empty context with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ContextConfig::default())
    }

    pub fn with_config(config: ContextConfig) -> Self {
        let log_commits = config.log_commits;
        let ctx = Self {
            inner: Arc::new(ContextInner {
                config,
                phase: Mutex::new(Phase::Idle),
                store: Mutex::new(Store::new()),
                observers: RwLock::new(IndexMap::new()),
                clock: AtomicU64::new(1),
                transactions: AtomicU64::new(1),
                disposed: AtomicBool::new(false),
            }),
        };
        if log_commits {
            ctx.observe(diagnostics::log_commit);
        }
        ctx
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    /// Label used in logs; `"context"` when none was configured.
    pub fn label(&self) -> &str {
        self.inner.config.label.as_deref().unwrap_or("context")
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        *self.inner.phase.lock()
    }

    pub(crate) fn store(&self) -> MutexGuard<'_, Store> {
        self.inner.store.lock()
    }

    pub(crate) fn next_version(&self) -> u64 {
        self.inner.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn next_transaction_id(&self) -> u64 {
        self.inner.transactions.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<ContextInner> {
        Arc::downgrade(&self.inner)
    }

    fn ensure_live(&self, target: &str) -> Result<()> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(Error::StaleRead {
                target: target.to_owned(),
                reason: "context has been disposed",
            });
        }
        Ok(())
    }

    /// Claim the context for a new top-level transaction.
    fn begin(&self, phase: Phase) -> Result<PhaseGuard<'_>> {
        let mut current = self.inner.phase.lock();
        if *current != Phase::Idle {
            let busy = *current;
            warn!(context = self.label(), phase = %busy, "rejected reentrant transaction");
            return Err(Error::Reentrancy { phase: busy });
        }
        *current = phase;
        Ok(PhaseGuard { inner: &self.inner })
    }

    /// Claim the context for a read. Reads are also allowed while
    /// committing so that listeners can look at other atoms.
    fn begin_read(&self) -> Result<Option<PhaseGuard<'_>>> {
        let mut current = self.inner.phase.lock();
        match *current {
            Phase::Idle => {
                *current = Phase::Propagating;
                Ok(Some(PhaseGuard { inner: &self.inner }))
            }
            Phase::Committing => Ok(None),
            phase => {
                warn!(context = self.label(), phase = %phase, "rejected read during transaction");
                Err(Error::Reentrancy { phase })
            }
        }
    }

    /// Read an atom's current committed value.
    ///
    /// Mounted atoms and cached primitives are served straight from the
    /// cache. Anything else is validated against its dependencies, and
    /// recomputed only if one of them moved.
    pub fn get<T: AtomValue>(&self, atom: &Atom<T>) -> Result<T> {
        self.ensure_live(atom.label())?;
        let _guard = self.begin_read()?;
        let node = atom.node();

        let cached = self
            .store()
            .get(atom.id())
            .filter(|entry| entry.is_mounted() || node.kind() == AtomKind::Primitive)
            .map(|entry| entry.value.clone());
        if let Some(value) = cached {
            return downcast(&value, &node);
        }

        let mut tx = Transaction::new(self.clone());
        let (value, _) = tx.actualize(&node)?;
        drop(tx.commit());
        downcast(&value, &node)
    }

    /// Run `f` as one transaction.
    ///
    /// Everything `f` writes or dispatches through the [`Transaction`] is
    /// committed together once it returns `Ok`, and listeners hear about it
    /// once. If `f` or any recomputation fails, nothing is committed.
    pub fn transact<R>(&self, f: impl FnOnce(&mut Transaction) -> Result<R>) -> Result<R> {
        self.ensure_live(self.label())?;
        let guard = self.begin(Phase::Collecting)?;
        let mut tx = Transaction::new(self.clone());
        let span = debug_span!("transaction", context = self.label(), id = tx.id()).entered();

        let output = match f(&mut tx).and_then(|output| {
            guard.advance(Phase::Propagating);
            tx.propagate().map(|()| output)
        }) {
            Ok(output) => output,
            Err(err) => {
                debug!(error = %err, "transaction aborted");
                return Err(err);
            }
        };

        guard.advance(Phase::Committing);
        let outcome = tx.commit();
        debug!(
            patches = outcome.commit.patches().len(),
            changed = outcome.commit.changed().count(),
            "committed"
        );
        if !outcome.commit.is_empty() {
            self.emit(&outcome.commit);
        }
        for notification in outcome.notifications {
            notification.deliver();
        }

        guard.advance(Phase::Settled);
        drop(guard);
        drop(span);

        for work in outcome.deferred {
            work(self);
        }
        Ok(output)
    }

    /// Write a primitive atom in its own transaction.
    pub fn set<T: AtomValue>(&self, atom: &Atom<T>, value: T) -> Result<()> {
        self.transact(|tx| tx.set(atom, value))
    }

    /// Write a value derived from the current one in its own transaction.
    pub fn update<T: AtomValue>(&self, atom: &Atom<T>, f: impl FnOnce(&T) -> T) -> Result<()> {
        self.transact(|tx| tx.update(atom, f))
    }

    /// Dispatch an action in its own transaction.
    pub fn dispatch<A, P>(&self, action: &Action<A, P>, args: A) -> Result<()>
    where
        A: 'static,
        P: Send + Sync + 'static,
    {
        self.transact(|tx| tx.dispatch(action, args))
    }

    /// Subscribe to an atom.
    ///
    /// The atom is computed now if it has never been read, and mounted
    /// together with its upstream dependencies. `callback` is invoked with
    /// the new value after every transaction that changes the atom; it is
    /// not invoked for the current value.
    pub fn subscribe<T, F>(&self, atom: &Atom<T>, callback: F) -> Result<Subscription>
    where
        T: AtomValue,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.ensure_live(atom.label())?;
        let _guard = self.begin_read()?;
        let node = atom.node();

        let mut tx = Transaction::new(self.clone());
        tx.actualize(&node)?;
        drop(tx.commit());

        let key = ListenerId::new();
        let listener: Listener = Arc::new(move |value: &Value| {
            if let Some(value) = value.downcast_ref::<T>() {
                callback(value);
            }
        });
        self.store().add_listener(atom.id(), key, listener);
        debug!(context = self.label(), atom = atom.label(), "subscribed");
        Ok(Subscription::new(self, atom.id(), key))
    }

    /// Register a read-only observer of every commit.
    pub fn observe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Commit) + Send + Sync + 'static,
    {
        let id = ObserverId::new();
        self.inner.observers.write().insert(id, Arc::new(observer));
        id
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn unobserve(&self, id: ObserverId) -> bool {
        self.inner.observers.write().shift_remove(&id).is_some()
    }

    fn emit(&self, commit: &Commit) {
        let observers: Vec<Observer> = self.inner.observers.read().values().cloned().collect();
        for observer in observers {
            observer(commit);
        }
    }

    /// Whether the atom is currently kept fresh by listeners or mounted
    /// dependents.
    pub fn is_mounted<T: AtomValue>(&self, atom: &Atom<T>) -> bool {
        self.store()
            .get(atom.id())
            .map_or(false, |entry| entry.is_mounted())
    }

    /// Dependencies recorded by the atom's last computation, in read order.
    pub fn dependencies<T: AtomValue>(&self, atom: &Atom<T>) -> Vec<AtomId> {
        self.store()
            .get(atom.id())
            .map(|entry| entry.deps.iter().map(|(id, _)| *id).collect())
            .unwrap_or_default()
    }

    /// Mounted atoms that depend on this atom.
    pub fn dependents<T: AtomValue>(&self, atom: &Atom<T>) -> Vec<AtomId> {
        self.store()
            .get(atom.id())
            .map(|entry| entry.dependents.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of cached atoms.
    pub fn cached_len(&self) -> usize {
        self.store().len()
    }

    /// Evict cache entries that are unmounted and whose atom is no longer
    /// referenced outside this context. Returns how many were evicted.
    pub fn collect_garbage(&self) -> usize {
        let mut count = 0;
        loop {
            // Dropped outside the lock: an evicted computation may own the
            // last handle to another atom or to a subscription.
            let evicted = self.store().collect_garbage();
            if evicted.is_empty() {
                break;
            }
            count += evicted.len();
        }
        debug!(context = self.label(), evicted = count, "collected garbage");
        count
    }

    /// Drop every cached value, listener and observer. Any later operation
    /// on this context fails with [`Error::StaleRead`].
    pub fn dispose(&self) -> Result<()> {
        let _guard = self.begin(Phase::Settled)?;
        self.inner.disposed.store(true, Ordering::Release);
        let entries = self.store().drain();
        let observers = std::mem::take(&mut *self.inner.observers.write());
        debug!(context = self.label(), entries = entries.len(), "disposed");
        drop(entries);
        drop(observers);
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("label", &self.label())
            .field("phase", &self.phase())
            .field("cached", &self.cached_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn context_starts_idle_and_empty() {
        let ctx = Context::new();
        assert_eq!(ctx.phase(), Phase::Idle);
        assert_eq!(ctx.cached_len(), 0);
        assert_eq!(ctx.label(), "context");
    }

    #[test]
    fn contexts_are_isolated() {
        let count = Atom::new(0);
        let first = Context::new();
        let second = Context::new();

        count.set(&first, 5).unwrap();
        assert_eq!(count.get(&first).unwrap(), 5);
        assert_eq!(count.get(&second).unwrap(), 0);
    }

    #[test]
    fn phase_returns_to_idle_after_failure() {
        let ctx = Context::new();
        let result: Result<()> = ctx.transact(|_tx| Err(Error::ReadOnly { atom: "x".into() }));
        assert!(result.is_err());
        assert_eq!(ctx.phase(), Phase::Idle);
    }

    #[test]
    fn phase_is_visible_inside_transaction() {
        let ctx = Context::new();
        let probe = ctx.clone();
        ctx.transact(|_tx| {
            assert_eq!(probe.phase(), Phase::Collecting);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn nested_top_level_transaction_is_rejected() {
        let ctx = Context::new();
        let inner = ctx.clone();
        let a = Atom::new(0);
        let result = ctx.transact(|_tx| inner.set(&a, 1));
        match result {
            Err(Error::Reentrancy { phase }) => assert_eq!(phase, Phase::Collecting),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(a.get(&ctx).unwrap(), 0);
    }

    #[test]
    fn observers_can_be_removed() {
        let ctx = Context::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let a = Atom::new(0);
        let id = {
            let seen = seen.clone();
            ctx.observe(move |_commit| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
        };

        a.set(&ctx, 1).unwrap();
        assert!(ctx.unobserve(id));
        assert!(!ctx.unobserve(id));
        a.set(&ctx, 2).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disposed_context_rejects_access() {
        let ctx = Context::with_config(ContextConfig::default().with_label("session"));
        let a = Atom::new(1);
        a.set(&ctx, 2).unwrap();
        ctx.dispose().unwrap();

        assert!(ctx.is_disposed());
        assert_eq!(ctx.cached_len(), 0);
        assert!(matches!(a.get(&ctx), Err(Error::StaleRead { .. })));
        assert!(matches!(a.set(&ctx, 3), Err(Error::StaleRead { .. })));
    }

    #[test]
    fn phase_display() {
        assert_eq!(Phase::Committing.to_string(), "committing");
        assert_eq!(
            serde_json::to_string(&Phase::Propagating).unwrap(),
            "\"propagating\""
        );
    }
}
