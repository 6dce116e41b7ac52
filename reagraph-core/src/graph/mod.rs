//! Dependency Graph
//!
//! This module holds the type-erased side of the engine: node identities,
//! the per-context cache of atom states, and the scheduler that orders
//! recomputation.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph where:
//!
//! - Nodes are atoms (primitive or computed)
//! - Edges are dependencies: if B read A during its last computation, B
//!   records `(A, version)` and, while B is mounted, A lists B as a dependent
//!
//! Dependencies are rebuilt on every recomputation, so the graph changes
//! shape as values change. Cycles are never stored: they are detected while
//! computing and reported as errors.
//!
//! # Design Decisions
//!
//! 1. Nodes are keyed by [`AtomId`] in a per-context arena instead of holding
//!    references to each other, so atoms can be defined once and evaluated in
//!    any number of independent contexts.
//!
//! 2. Forward edges (dependencies) always exist for cached computed atoms;
//!    reverse edges (dependents) only exist between mounted atoms, which keeps
//!    unobserved parts of the graph collectable.

mod node;
pub(crate) mod scheduler;
pub(crate) mod store;

pub use node::{AtomId, AtomKind, Deps, Value};
pub(crate) use node::{AtomNode, NodeRef};
