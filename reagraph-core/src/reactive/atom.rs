//! Atom Implementation
//!
//! An atom is the unit of reactive state. It is a *definition*: it holds an
//! identity, an optional name, an equality policy and either an initial
//! value (primitive atoms) or a computation (computed atoms). The actual
//! state lives in a [`Context`], so one atom can be evaluated in many
//! independent contexts.
//!
//! # Computed Atoms
//!
//! A computed atom's function receives a [`Spy`]. Every atom read through
//! [`Spy::get`] becomes a dependency for that run; the dependency list is
//! replaced on each recomputation, so branches that are no longer taken stop
//! triggering updates.
//!
//! ```rust
//! use reagraph_core::{Atom, Context};
//!
//! let ctx = Context::new();
//! let count = Atom::new(1);
//! let doubled = Atom::computed({
//!     let count = count.clone();
//!     move |spy| Ok(spy.get(&count)? * 2)
//! });
//!
//! count.set(&ctx, 5).unwrap();
//! assert_eq!(doubled.get(&ctx).unwrap(), 10);
//! ```

use std::fmt;
use std::sync::Arc;

use super::action::Action;
use super::context::Context;
use super::equality::{self, EqualsFn};
use super::subscriber::Subscription;
use super::transaction::Spy;
use crate::error::{BoxError, Result};
use crate::graph::{AtomId, AtomKind, AtomNode, NodeRef, Value};

/// Bound shared by every value an atom can hold.
pub trait AtomValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> AtomValue for T {}

type ComputeFn<T> = Box<dyn Fn(&mut Spy<'_>) -> Result<T, BoxError> + Send + Sync>;

enum Source<T> {
    Primitive(T),
    Computed(ComputeFn<T>),
}

pub(crate) struct AtomDef<T> {
    id: AtomId,
    name: Option<Arc<str>>,
    label: Arc<str>,
    source: Source<T>,
    equals: EqualsFn<T>,
}

impl<T: AtomValue> AtomNode for AtomDef<T> {
    fn id(&self) -> AtomId {
        self.id
    }

    fn label(&self) -> Arc<str> {
        self.label.clone()
    }

    fn kind(&self) -> AtomKind {
        match self.source {
            Source::Primitive(_) => AtomKind::Primitive,
            Source::Computed(_) => AtomKind::Computed,
        }
    }

    fn compute(&self, spy: &mut Spy<'_>) -> Result<Value, BoxError> {
        let value = match &self.source {
            Source::Primitive(initial) => initial.clone(),
            Source::Computed(compute) => compute(spy)?,
        };
        Ok(Arc::new(value))
    }

    fn equals(&self, a: &Value, b: &Value) -> bool {
        match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
            (Some(a), Some(b)) => (self.equals)(a, b),
            _ => false,
        }
    }
}

/// A reactive cell holding a primitive or derived value of type `T`.
///
/// Cloning an atom clones the handle; both clones refer to the same atom.
pub struct Atom<T> {
    def: Arc<AtomDef<T>>,
}

impl<T: AtomValue + PartialEq> Atom<T> {
    /// Create a primitive atom with the given initial value.
    pub fn new(initial: T) -> Self {
        Self::builder().primitive(initial)
    }

    /// Create a computed atom.
    ///
    /// The computation is not run until the atom is first read or
    /// subscribed to.
    pub fn computed<F>(compute: F) -> Self
    where
        F: Fn(&mut Spy<'_>) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Self::builder().computed(compute)
    }

    /// Start building an atom with the default (`PartialEq`) equality.
    pub fn builder() -> AtomBuilder<T> {
        AtomBuilder::new()
    }
}

impl<T: AtomValue> Atom<T> {
    /// Get the atom's unique ID.
    pub fn id(&self) -> AtomId {
        self.def.id
    }

    /// Get the atom's name, if it was given one.
    pub fn name(&self) -> Option<&str> {
        self.def.name.as_deref()
    }

    /// Name used in diagnostics and error messages.
    pub fn label(&self) -> &str {
        &self.def.label
    }

    pub fn kind(&self) -> AtomKind {
        self.def.kind()
    }

    pub fn is_computed(&self) -> bool {
        self.kind() == AtomKind::Computed
    }

    pub(crate) fn node(&self) -> NodeRef {
        self.def.clone()
    }

    /// Read the atom's current value in `ctx`.
    pub fn get(&self, ctx: &Context) -> Result<T> {
        ctx.get(self)
    }

    /// Write a new value in its own transaction.
    pub fn set(&self, ctx: &Context, value: T) -> Result<()> {
        ctx.set(self, value)
    }

    /// Write a value derived from the current one.
    pub fn update(&self, ctx: &Context, f: impl FnOnce(&T) -> T) -> Result<()> {
        ctx.update(self, f)
    }

    /// Subscribe to changes of this atom in `ctx`.
    pub fn subscribe<F>(&self, ctx: &Context, callback: F) -> Result<Subscription>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        ctx.subscribe(self, callback)
    }

    /// Bind a reducer: every time `action` is dispatched, this atom's state
    /// is replaced by `reducer(&state, &payload)` within the same
    /// transaction.
    ///
    /// Only primitive atoms can be reduced; dispatching an action bound to a
    /// computed atom fails with [`Error::ReadOnly`](crate::Error::ReadOnly).
    pub fn on<A, P, F>(&self, action: &Action<A, P>, reducer: F) -> &Self
    where
        A: 'static,
        P: Send + Sync + 'static,
        F: Fn(&T, &P) -> T + Send + Sync + 'static,
    {
        action.reduce(self, reducer);
        self
    }
}

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Self {
            def: Arc::clone(&self.def),
        }
    }
}

impl<T: AtomValue> fmt::Debug for Atom<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.def.id)
            .field("label", &self.def.label)
            .field("kind", &self.kind())
            .finish()
    }
}

/// Builder for atoms with a name or a custom equality policy.
///
/// ```rust
/// use std::sync::Arc;
/// use reagraph_core::{reactive::equality, Atom, AtomBuilder};
///
/// let total = Atom::<i64>::builder().name("total").primitive(0);
/// assert_eq!(total.name(), Some("total"));
///
/// let items = AtomBuilder::with_equality(equality::ptr_eq::<Vec<u8>>)
///     .name("items")
///     .primitive(Arc::new(Vec::new()));
/// assert_eq!(items.label(), "items");
/// ```
pub struct AtomBuilder<T> {
    name: Option<Arc<str>>,
    equals: EqualsFn<T>,
}

impl<T: AtomValue + PartialEq> AtomBuilder<T> {
    pub fn new() -> Self {
        Self {
            name: None,
            equals: Arc::new(equality::equals::<T>),
        }
    }
}

impl<T: AtomValue + PartialEq> Default for AtomBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: AtomValue> AtomBuilder<T> {
    /// Start a builder with a custom equality policy. `T` does not need to
    /// implement `PartialEq`.
    pub fn with_equality<F>(equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            name: None,
            equals: Arc::new(equals),
        }
    }

    /// Set a human-readable name. Names are for diagnostics only and need
    /// not be unique.
    pub fn name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replace the equality policy.
    pub fn equals<F>(mut self, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        self.equals = Arc::new(equals);
        self
    }

    pub fn primitive(self, initial: T) -> Atom<T> {
        self.build(Source::Primitive(initial))
    }

    pub fn computed<F>(self, compute: F) -> Atom<T>
    where
        F: Fn(&mut Spy<'_>) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        self.build(Source::Computed(Box::new(compute)))
    }

    fn build(self, source: Source<T>) -> Atom<T> {
        let id = AtomId::new();
        let label = self
            .name
            .clone()
            .unwrap_or_else(|| Arc::from(id.to_string()));
        Atom {
            def: Arc::new(AtomDef {
                id,
                name: self.name,
                label,
                source,
                equals: self.equals,
            }),
        }
    }
}
