//! Update Scheduler
//!
//! The scheduler determines which mounted atoms a transaction has to revisit
//! and in which order. It ensures that dependencies are always visited before
//! their dependents.
//!
//! # Algorithm
//!
//! 1. Start from the atoms written during the transaction.
//! 2. Walk the dependent edges breadth-first, collecting every reachable
//!    mounted atom exactly once.
//! 3. Sort the collected atoms topologically (dependencies before
//!    dependents) using Kahn's algorithm restricted to the collected set.
//!
//! The transaction engine then validates each atom in that order. Because
//! validation is pull-based, an atom whose dependency set changed since the
//! last commit still sees its new dependencies finalized first; the order
//! produced here only has to be deterministic and correct for the committed
//! edges.

use std::collections::{HashMap, HashSet, VecDeque};

use super::node::AtomId;
use super::store::Store;

/// Collect the mounted atoms downstream of `roots`, in topological order.
///
/// The roots themselves are not part of the result.
pub(crate) fn affected(store: &Store, roots: &[AtomId]) -> Vec<AtomId> {
    let mut to_process = Vec::new();
    let mut visited: HashSet<AtomId> = roots.iter().copied().collect();
    let mut queue = VecDeque::new();

    for root in roots {
        if let Some(entry) = store.get(*root) {
            queue.extend(entry.dependents.iter().copied());
        }
    }

    while let Some(id) = queue.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        if let Some(entry) = store.get(id) {
            to_process.push(id);
            queue.extend(entry.dependents.iter().copied());
        }
    }

    topological_sort(store, to_process)
}

/// Order `nodes` so that dependencies come before dependents.
///
/// Atoms left over by a cycle in the committed edges are appended in
/// discovery order; the engine reports the cycle when it recomputes them.
fn topological_sort(store: &Store, nodes: Vec<AtomId>) -> Vec<AtomId> {
    let node_set: HashSet<_> = nodes.iter().copied().collect();
    let mut in_degree: HashMap<AtomId, usize> = HashMap::new();
    let mut result = Vec::with_capacity(nodes.len());
    let mut queue = VecDeque::new();

    for &id in &nodes {
        let degree = store
            .get(id)
            .map(|entry| {
                entry
                    .deps
                    .iter()
                    .filter(|(dep, _)| node_set.contains(dep))
                    .count()
            })
            .unwrap_or(0);
        in_degree.insert(id, degree);
        if degree == 0 {
            queue.push_back(id);
        }
    }

    while let Some(id) = queue.pop_front() {
        result.push(id);

        if let Some(entry) = store.get(id) {
            for dependent in &entry.dependents {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(*dependent);
                    }
                }
            }
        }
    }

    if result.len() < nodes.len() {
        let placed: HashSet<_> = result.iter().copied().collect();
        result.extend(nodes.into_iter().filter(|id| !placed.contains(id)));
    }

    result
}
