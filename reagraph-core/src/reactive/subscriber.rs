//! Subscription handles.
//!
//! A subscription registers a listener on one atom in one context. While it
//! is active the atom stays mounted, which keeps it (and everything it
//! depends on) eagerly up to date.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Weak;

use tracing::debug;

use super::context::{Context, ContextInner};
use crate::graph::AtomId;

/// Unique identifier for a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`Context::subscribe`].
///
/// Dropping the handle unsubscribes. It only holds a weak reference to the
/// context, so an outstanding subscription never keeps a context alive.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    ctx: Weak<ContextInner>,
    atom: AtomId,
    key: ListenerId,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(ctx: &Context, atom: AtomId, key: ListenerId) -> Self {
        Self {
            ctx: ctx.downgrade(),
            atom,
            key,
            active: AtomicBool::new(true),
        }
    }

    /// Remove the listener. Returns `true` the first time and `false` on
    /// every later call.
    ///
    /// If this was the atom's last listener and nothing else depends on it,
    /// the atom and any upstream atoms that were only mounted for its sake
    /// are unmounted.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        let Some(inner) = self.ctx.upgrade() else {
            return true;
        };
        let removed = inner.store.lock().remove_listener(self.atom, self.key);
        if removed.is_some() {
            debug!(atom = %self.atom, "unsubscribed");
        }
        drop(removed);
        true
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// The subscribed atom.
    pub fn atom(&self) -> AtomId {
        self.atom
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("atom", &self.atom)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Atom;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn listener_ids_are_unique() {
        let id1 = ListenerId::new();
        let id2 = ListenerId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let ctx = Context::new();
        let a = Atom::new(0);
        let sub = a.subscribe(&ctx, |_| {}).unwrap();

        assert!(sub.is_active());
        assert!(ctx.is_mounted(&a));
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(!sub.is_active());
        assert!(!ctx.is_mounted(&a));
    }

    #[test]
    fn drop_unsubscribes() {
        let ctx = Context::new();
        let a = Atom::new(0);
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = calls.clone();
            let _sub = a
                .subscribe(&ctx, move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            a.set(&ctx, 1).unwrap();
        }
        a.set(&ctx, 2).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!ctx.is_mounted(&a));
    }

    #[test]
    fn subscription_outlives_context() {
        let a = Atom::new(0);
        let sub = {
            let ctx = Context::new();
            a.subscribe(&ctx, |_| {}).unwrap()
        };
        assert!(sub.unsubscribe());
    }
}
