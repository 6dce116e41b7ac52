//! Action Implementation
//!
//! An action is a named entry point and the only way external input enters
//! the graph. Dispatching an action:
//!
//! 1. builds a payload from the call arguments,
//! 2. opens a transaction, or joins the one already running when dispatched
//!    through a [`Transaction`],
//! 3. runs the reducers bound to it (in registration order), then its
//!    handler,
//! 4. queues its effect hooks to run once the transaction has committed and
//!    the context is idle again.
//!
//! Reducers and handlers are part of the transaction: if either fails,
//! nothing the transaction did is committed. Effects are not: a failing
//! effect is logged and the remaining effects still run.
//!
//! # Example
//!
//! ```rust
//! use reagraph_core::{Action, Atom, Context};
//!
//! let ctx = Context::new();
//! let count = Atom::new(0);
//! let add = Action::<i32>::new("add");
//! count.on(&add, |state, by| state + by);
//!
//! add.dispatch(&ctx, 2).unwrap();
//! add.dispatch(&ctx, 3).unwrap();
//! assert_eq!(count.get(&ctx).unwrap(), 5);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error};

use super::atom::{Atom, AtomValue};
use super::context::Context;
use super::transaction::Transaction;
use crate::error::{BoxError, Error, Result};

/// Unique identifier for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionId(u64);

impl ActionId {
    /// Generate a new unique action ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

type Handler<P> = Arc<dyn Fn(&mut Transaction, &P) -> Result<(), BoxError> + Send + Sync>;
type EffectFn<P> = Arc<dyn Fn(&Context, &P) -> Result<(), BoxError> + Send + Sync>;

/// A state transition bound to an action type.
trait Reducer<P>: Send + Sync {
    fn apply(&self, tx: &mut Transaction, payload: &P) -> Result<()>;
}

struct AtomReducer<T, P> {
    atom: Atom<T>,
    reduce: Box<dyn Fn(&T, &P) -> T + Send + Sync>,
}

impl<T: AtomValue, P: Send + Sync> Reducer<P> for AtomReducer<T, P> {
    fn apply(&self, tx: &mut Transaction, payload: &P) -> Result<()> {
        let state = tx.get(&self.atom)?;
        let next = (self.reduce)(&state, payload);
        tx.set(&self.atom, next)
    }
}

struct ActionDef<A, P> {
    id: ActionId,
    name: Arc<str>,
    make_payload: Box<dyn Fn(A) -> P + Send + Sync>,
    handler: RwLock<Option<Handler<P>>>,
    reducers: RwLock<Vec<Arc<dyn Reducer<P>>>>,
    effects: RwLock<Vec<EffectFn<P>>>,
}

/// A named, typed entry point into the graph.
///
/// `A` is the argument type accepted by [`dispatch`](Self::dispatch); `P` is
/// the payload handed to reducers, the handler and effects. They are the
/// same type unless the action was built with
/// [`with_payload`](Self::with_payload).
pub struct Action<A, P = A> {
    def: Arc<ActionDef<A, P>>,
}

impl<P: Send + Sync + 'static> Action<P, P> {
    /// Create an action whose payload is its argument.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self::with_payload(name, |args| args)
    }
}

impl<A: 'static, P: Send + Sync + 'static> Action<A, P> {
    /// Create an action with a payload constructor that shapes the call
    /// arguments into a structured payload.
    pub fn with_payload<F>(name: impl Into<Arc<str>>, make_payload: F) -> Self
    where
        F: Fn(A) -> P + Send + Sync + 'static,
    {
        Self {
            def: Arc::new(ActionDef {
                id: ActionId::new(),
                name: name.into(),
                make_payload: Box::new(make_payload),
                handler: RwLock::new(None),
                reducers: RwLock::new(Vec::new()),
                effects: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Attach the action's handler, replacing any previous one.
    ///
    /// The handler runs inside the transaction after the bound reducers. It
    /// can read and write atoms and dispatch further actions through the
    /// [`Transaction`]; all of it commits together.
    pub fn with_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&mut Transaction, &P) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        *self.def.handler.write() = Some(Arc::new(handler));
        self
    }

    /// Register an effect hook.
    ///
    /// Effects run after the transaction that dispatched this action has
    /// committed, in registration order. They receive the context, so they
    /// may dispatch follow-up actions, each of which opens its own
    /// transaction.
    pub fn on_effect<F>(&self, effect: F) -> &Self
    where
        F: Fn(&Context, &P) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.def.effects.write().push(Arc::new(effect));
        self
    }

    pub(crate) fn reduce<T, F>(&self, atom: &Atom<T>, reduce: F)
    where
        T: AtomValue,
        F: Fn(&T, &P) -> T + Send + Sync + 'static,
    {
        self.def.reducers.write().push(Arc::new(AtomReducer {
            atom: atom.clone(),
            reduce: Box::new(reduce),
        }));
    }

    pub fn id(&self) -> ActionId {
        self.def.id
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Number of atoms reducing this action.
    pub fn reducer_count(&self) -> usize {
        self.def.reducers.read().len()
    }

    /// Number of registered effect hooks.
    pub fn effect_count(&self) -> usize {
        self.def.effects.read().len()
    }

    /// Dispatch the action in its own transaction.
    pub fn dispatch(&self, ctx: &Context, args: A) -> Result<()> {
        ctx.dispatch(self, args)
    }

    /// Run the action inside `tx`.
    pub(crate) fn run(&self, tx: &mut Transaction, args: A) -> Result<()> {
        let def = &self.def;
        let payload = Arc::new((def.make_payload)(args));
        debug!(action = %def.name, transaction = tx.id(), "dispatch");
        tx.record_action(def.name.clone());

        let reducers = def.reducers.read().clone();
        for reducer in reducers {
            reducer.apply(tx, &*payload)?;
        }

        let handler = def.handler.read().clone();
        if let Some(handler) = handler {
            handler(&mut *tx, &*payload).map_err(|err| Error::from_user(&def.name, err))?;
        }

        let effects = def.effects.read().clone();
        if !effects.is_empty() {
            let name = def.name.clone();
            tx.defer(Box::new(move |ctx: &Context| {
                run_effects(ctx, &name, &effects, &*payload)
            }));
        }
        Ok(())
    }
}

fn run_effects<P>(ctx: &Context, action: &str, effects: &[EffectFn<P>], payload: &P) {
    for (index, effect) in effects.iter().enumerate() {
        if let Err(err) = effect(ctx, payload) {
            error!(action = %action, effect = index, error = %err, "effect failed");
        }
    }
}

impl<A, P> Clone for Action<A, P> {
    fn clone(&self) -> Self {
        Self {
            def: Arc::clone(&self.def),
        }
    }
}

impl<A, P> fmt::Debug for Action<A, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.def.id)
            .field("name", &self.def.name)
            .field("reducers", &self.def.reducers.read().len())
            .field("effects", &self.def.effects.read().len())
            .finish()
    }
}
