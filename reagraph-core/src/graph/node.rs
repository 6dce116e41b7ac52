//! Graph Nodes
//!
//! This module defines the type-erased view of an atom that the store and
//! the transaction engine work with. Typed handles live in
//! [`crate::reactive::Atom`]; everything below the public API only sees
//! [`AtomNode`] trait objects and [`Value`]s.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::BoxError;
use crate::reactive::Spy;

/// A cached atom value with its concrete type erased.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Dependencies recorded during one computation: the atom read and the
/// version it had at that moment, in read order.
pub type Deps = SmallVec<[(AtomId, u64); 4]>;

/// Unique identifier for an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AtomId(u64);

impl AtomId {
    /// Generate a new unique atom ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for AtomId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "atom#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomKind {
    /// A source node. Its value is set from outside the graph and it never
    /// has dependencies.
    Primitive,

    /// A derived node. Its value is a function of the atoms it read during
    /// its last computation.
    Computed,
}

/// Type-erased atom definition.
///
/// Implemented by the typed atom definition; the engine never needs to know
/// `T`.
pub(crate) trait AtomNode: Send + Sync {
    fn id(&self) -> AtomId;

    /// Display label: the atom's name, or its id when unnamed.
    fn label(&self) -> Arc<str>;

    fn kind(&self) -> AtomKind;

    /// Produce the atom's value. Primitive atoms return their initial value.
    fn compute(&self, spy: &mut Spy<'_>) -> Result<Value, BoxError>;

    /// Apply the atom's equality policy to two erased values.
    fn equals(&self, a: &Value, b: &Value) -> bool;
}

/// Shared handle to an erased atom definition.
pub(crate) type NodeRef = Arc<dyn AtomNode>;
