//! Reactive Primitives
//!
//! This module implements the reactive state engine: atoms, contexts,
//! transactions, actions and subscriptions.
//!
//! # Concepts
//!
//! ## Atoms
//!
//! An [`Atom`] is a typed cell. Primitive atoms hold a value that can be
//! written; computed atoms derive their value from other atoms through a
//! [`Spy`], which records every atom read as a dependency.
//!
//! ## Contexts
//!
//! A [`Context`] holds the values of atoms. Nothing about an atom's state is
//! global: two contexts evaluating the same atoms never see each other's
//! writes.
//!
//! ## Transactions
//!
//! Every write happens inside a [`Transaction`]. Writes are staged as drafts,
//! mounted dependents are revalidated in topological order, and the result is
//! committed at once. Subscribers only ever observe committed, consistent
//! state.
//!
//! ## Actions
//!
//! An [`Action`] is a named entry point. Atoms bind reducers to it with
//! [`Atom::on`]; dispatching runs the reducers and the action's handler in one
//! transaction, then its effect hooks once the context is idle.
//!
//! # Implementation Notes
//!
//! There is no ambient tracking state. The transaction and the spy are passed
//! explicitly, so dependency tracking cannot leak between threads or
//! contexts.

mod action;
mod atom;
mod context;
mod diagnostics;
pub mod equality;
mod subscriber;
mod transaction;

pub use action::{Action, ActionId};
pub use atom::{Atom, AtomBuilder, AtomValue};
pub use context::{Context, Phase};
pub use diagnostics::{log_commit, Commit, CommitSummary, ObserverId, Patch, PatchSummary};
pub use subscriber::{ListenerId, Subscription};
pub use transaction::{Spy, Transaction};
