//! Reagraph Core
//!
//! A reactive state engine. Application state is modeled as a graph of
//! *atoms*:
//!
//! - Primitive atoms hold values that can be written
//! - Computed atoms derive their value from other atoms and are recomputed
//!   only when something they read has actually changed
//! - Actions are named entry points whose reducers and handler update atoms
//!   in one atomic transaction
//! - Subscribers are notified once per committed transaction, and never see
//!   a half-updated graph
//!
//! # Architecture
//!
//! - `reactive`: atoms, contexts, transactions, actions and subscriptions
//! - `graph`: the type-erased cache, dependency edges and the scheduler
//! - `config`: per-context settings
//!
//! # Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use reagraph_core::{action, atom, computed, create_context};
//!
//! let ctx = create_context();
//! let count = atom(0);
//! let doubled = computed({
//!     let count = count.clone();
//!     move |spy| Ok(spy.get(&count)? * 2)
//! });
//!
//! let increment = action::<()>("increment");
//! count.on(&increment, |n, _| n + 1);
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let _sub = doubled
//!     .subscribe(&ctx, {
//!         let seen = seen.clone();
//!         move |value| seen.lock().unwrap().push(*value)
//!     })
//!     .unwrap();
//!
//! // Three dispatches, one transaction, one notification.
//! ctx.transact(|tx| {
//!     for _ in 0..3 {
//!         tx.dispatch(&increment, ())?;
//!     }
//!     Ok(())
//! })
//! .unwrap();
//!
//! assert_eq!(*seen.lock().unwrap(), vec![6]);
//! ```

pub mod config;
mod error;
pub mod graph;
pub mod reactive;

pub use config::ContextConfig;
pub use error::{boxed, BoxError, Error, Result};
pub use graph::{AtomId, AtomKind};
pub use reactive::{
    Action, ActionId, Atom, AtomBuilder, AtomValue, Commit, CommitSummary, Context, ListenerId,
    ObserverId, Patch, PatchSummary, Phase, Spy, Subscription, Transaction,
};

/// Create an empty context with the default configuration.
pub fn create_context() -> Context {
    Context::new()
}

/// Create a primitive atom.
pub fn atom<T: AtomValue + PartialEq>(initial: T) -> Atom<T> {
    Atom::new(initial)
}

/// Create a computed atom.
pub fn computed<T, F>(compute: F) -> Atom<T>
where
    T: AtomValue + PartialEq,
    F: Fn(&mut Spy<'_>) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
{
    Atom::computed(compute)
}

/// Create an action whose payload is its argument.
pub fn action<P: Send + Sync + 'static>(name: &str) -> Action<P> {
    Action::new(name)
}
