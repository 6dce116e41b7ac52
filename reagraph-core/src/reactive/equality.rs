//! Equality Policies
//!
//! After an atom recomputes (or is written), its new value is compared with
//! the old one. If the policy reports them equal the atom keeps its version:
//! dependents are not revisited and subscribers are not notified.
//!
//! The default policy is [`equals`] (`PartialEq`). Atoms holding shared
//! containers can opt into identity semantics with [`ptr_eq`], and atoms that
//! must always propagate can use [`never_equal`].

use std::sync::Arc;

/// Equality function stored by an atom definition.
pub type EqualsFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Default equality using `PartialEq`.
pub fn equals<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b
}

/// Treat every new value as a change.
pub fn never_equal<T>(_a: &T, _b: &T) -> bool {
    false
}

/// Identity equality: two `Arc`s are equal only if they point to the same
/// allocation, whatever their contents.
pub fn ptr_eq<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    Arc::ptr_eq(a, b)
}

/// Float equality where `NaN` equals `NaN`.
///
/// With plain `PartialEq` an atom holding `NaN` would look changed on every
/// recomputation.
pub fn safe_equals_f64(a: &f64, b: &f64) -> bool {
    if a.is_nan() {
        return b.is_nan();
    }
    a == b
}

/// Float equality where `NaN` equals `NaN`.
pub fn safe_equals_f32(a: &f32, b: &f32) -> bool {
    if a.is_nan() {
        return b.is_nan();
    }
    a == b
}

/// Lift a policy over the element type to `Option`s.
pub fn option_equals<T>(
    inner: impl Fn(&T, &T) -> bool + Send + Sync + 'static,
) -> impl Fn(&Option<T>, &Option<T>) -> bool + Send + Sync + 'static {
    move |a, b| match (a, b) {
        (Some(a), Some(b)) => inner(a, b),
        (None, None) => true,
        _ => false,
    }
}
