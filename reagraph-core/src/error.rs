//! Error types for the reactive engine.
//!
//! Every failure that happens while a transaction is collecting, propagating
//! or committing aborts the transaction and is returned to the caller that
//! opened it. User closures (computations, reducers, handlers, effects)
//! return [`BoxError`], so crate errors raised inside them with `?` travel
//! back out unchanged while foreign errors are wrapped in
//! [`Error::Computation`].

use crate::reactive::Phase;

/// A boxed, thread-safe error produced by user code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the reactive engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Recomputation ordering cannot converge: an atom (transitively) reads
    /// itself.
    #[error("cyclic dependency detected: {}", path.join(" -> "))]
    CyclicDependency {
        /// Labels of the atoms on the offending chain, outermost first.
        path: Vec<String>,
    },

    /// More atoms were recomputing at once than
    /// [`ContextConfig::max_depth`](crate::ContextConfig::max_depth) allows.
    /// The chain itself may be acyclic.
    #[error("recomputation deeper than {depth} atoms at `{}`", path.last().map(String::as_str).unwrap_or("?"))]
    DepthExceeded {
        /// The configured limit.
        depth: usize,
        /// Labels of the atoms being recomputed, outermost first.
        path: Vec<String>,
    },

    /// A top-level transaction was requested while another one is running
    /// on the same context.
    #[error("cannot open a transaction while the context is {phase}")]
    Reentrancy {
        /// Phase the context was in when the request arrived.
        phase: Phase,
    },

    /// A user-supplied atom, reducer or action handler failed.
    #[error("`{origin}` failed: {source}")]
    Computation {
        /// Label of the atom or name of the action that failed.
        origin: String,
        #[source]
        source: BoxError,
    },

    /// The context has been disposed and can no longer serve reads.
    #[error("stale access to `{target}`: {reason}")]
    StaleRead {
        target: String,
        reason: &'static str,
    },

    /// A computed atom was written to.
    #[error("atom `{atom}` is computed and cannot be written")]
    ReadOnly { atom: String },

    /// A cached value did not have the type its atom declares.
    #[error("cached value of `{atom}` has an unexpected type")]
    TypeMismatch { atom: String },
}

/// Build a [`BoxError`] from a message, for user closures that fail with
/// plain text.
///
/// ```rust
/// use reagraph_core::{atom, boxed, computed, create_context, Error};
///
/// let ctx = create_context();
/// let n = atom(-1);
/// let root = computed(move |spy| {
///     let n = spy.get(&n)?;
///     if n < 0 {
///         return Err(boxed("negative input"));
///     }
///     Ok(n)
/// });
/// assert!(matches!(ctx.get(&root), Err(Error::Computation { .. })));
/// ```
pub fn boxed(msg: impl Into<String>) -> BoxError {
    msg.into().into()
}

impl Error {
    /// Wrap an error produced by user code running on behalf of `origin`.
    ///
    /// Engine errors raised inside user code are unwrapped so that, for
    /// example, a cycle detected three atoms deep still surfaces as
    /// [`Error::CyclicDependency`].
    pub fn from_user(origin: &str, error: BoxError) -> Self {
        match error.downcast::<Error>() {
            Ok(inner) => *inner,
            Err(source) => Error::Computation {
                origin: origin.to_owned(),
                source,
            },
        }
    }

    /// Returns `true` if this is a [`Error::CyclicDependency`].
    pub fn is_cyclic(&self) -> bool {
        matches!(self, Error::CyclicDependency { .. })
    }

    /// Returns `true` if this is a [`Error::DepthExceeded`].
    pub fn is_depth_exceeded(&self) -> bool {
        matches!(self, Error::DepthExceeded { .. })
    }

    /// Returns `true` if this is a [`Error::Reentrancy`].
    pub fn is_reentrancy(&self) -> bool {
        matches!(self, Error::Reentrancy { .. })
    }
}
