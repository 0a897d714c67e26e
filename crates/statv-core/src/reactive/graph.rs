#![forbid(unsafe_code)]

//! Dependency graph between statuses.
//!
//! Design:
//! - Forward edges: derived status -> statuses it is computed from
//! - Reverse edges: status -> derived statuses computed from it
//! - Invariant: edges and reverse_edges are kept in sync
//! - Invariant: the union of every live graph on a thread is acyclic; links
//!   that would close a cycle through any of them are rejected before any
//!   edge is inserted
//!
//! Each graph keeps its own edges for inspection, and a thread-local registry
//! keeps the union of all of them for bind-time checks. A graph hands its
//! remaining edges back to the registry when its last handle drops.
//!
//! The graph only tracks ids. Values flow through listener subscriptions set
//! up by [`Derived`](super::derived::Derived); see `derived.rs`.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::error::{Result, StatusError};
use crate::id::StatusId;

thread_local! {
    /// Every edge of every live graph on this thread.
    static BOUND: RefCell<Edges> = RefCell::new(Edges::default());
}

#[derive(Default)]
struct Edges {
    /// Derived status -> inputs it depends on.
    edges: BTreeMap<StatusId, BTreeSet<StatusId>>,
    /// Input -> derived statuses waiting on it.
    reverse_edges: BTreeMap<StatusId, BTreeSet<StatusId>>,
}

impl Edges {
    fn insert(&mut self, target: StatusId, inputs: &[StatusId]) {
        self.edges
            .entry(target)
            .or_default()
            .extend(inputs.iter().copied());
        for &input in inputs {
            self.reverse_edges.entry(input).or_default().insert(target);
        }
    }

    /// Remove `inputs` from the edges out of `target`.
    fn remove(&mut self, target: StatusId, inputs: &BTreeSet<StatusId>) {
        if let Some(deps) = self.edges.get_mut(&target) {
            deps.retain(|dep| !inputs.contains(dep));
            if deps.is_empty() {
                self.edges.remove(&target);
            }
        }
        for input in inputs {
            if let Some(waiting) = self.reverse_edges.get_mut(input) {
                waiting.remove(&target);
                if waiting.is_empty() {
                    self.reverse_edges.remove(input);
                }
            }
        }
    }

    /// Depth-first search for a path `from -> .. -> to` along forward edges.
    fn path_between(&self, from: StatusId, to: StatusId) -> Option<Vec<StatusId>> {
        let mut visited = BTreeSet::new();
        let mut path = Vec::new();
        if self.walk(from, to, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn walk(
        &self,
        node: StatusId,
        to: StatusId,
        visited: &mut BTreeSet<StatusId>,
        path: &mut Vec<StatusId>,
    ) -> bool {
        path.push(node);
        if node == to {
            return true;
        }
        if visited.insert(node)
            && let Some(deps) = self.edges.get(&node)
        {
            for &dep in deps {
                if self.walk(dep, to, visited, path) {
                    return true;
                }
            }
        }
        path.pop();
        false
    }
}

#[derive(Default)]
struct GraphInner {
    local: Edges,
}

impl Drop for GraphInner {
    fn drop(&mut self) {
        if self.local.edges.is_empty() {
            return;
        }
        // The registry may already be gone during thread teardown.
        let _ = BOUND.try_with(|bound| {
            let mut bound = bound.borrow_mut();
            for (&target, deps) in &self.local.edges {
                bound.remove(target, deps);
            }
        });
    }
}

/// Dependency graph shared by every derived status built from it.
///
/// Cloning a `DependencyGraph` creates a new handle to the **same** graph.
/// Inspection (`dependencies_of`, `detect_cycle`, ...) sees only this
/// graph's edges, but binding checks against every live graph on the
/// thread: a status bound in one graph cannot be bound again in another,
/// and a cycle split across graphs is rejected like one inside a graph.
///
/// # Example
///
/// ```
/// use statv_core::{DependencyGraph, Observable, StatusError};
///
/// let graph = DependencyGraph::new();
/// let a = Observable::new(1);
/// let b = Observable::new(0);
///
/// let _b_from_a = graph.bind(&b, &a, |v| v * 10).unwrap();
/// assert_eq!(b.get(), 10);
///
/// // Closing the loop is rejected before anything is wired, even from
/// // another graph.
/// let err = DependencyGraph::new().bind(&a, &b, |v| v / 10).unwrap_err();
/// assert!(matches!(err, StatusError::CyclicDependency { .. }));
/// ```
#[derive(Clone, Default)]
pub struct DependencyGraph {
    inner: Rc<RefCell<GraphInner>>,
}

impl DependencyGraph {
    /// Create an empty dependency graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inputs `status` is computed from, in id order.
    #[must_use]
    pub fn dependencies_of(&self, status: StatusId) -> Vec<StatusId> {
        self.inner
            .borrow()
            .local
            .edges
            .get(&status)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Derived statuses computed from `status`, in id order.
    #[must_use]
    pub fn dependents_of(&self, status: StatusId) -> Vec<StatusId> {
        self.inner
            .borrow()
            .local
            .reverse_edges
            .get(&status)
            .map(|waiting| waiting.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether `status` currently has a binding in this graph.
    #[must_use]
    pub fn is_derived(&self, status: StatusId) -> bool {
        self.inner.borrow().local.edges.contains_key(&status)
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.borrow().local.edges.values().map(BTreeSet::len).sum()
    }

    /// Find a cycle in this graph, if any.
    ///
    /// Three-colour DFS: a back edge to a node on the current path (grey)
    /// closes a cycle. Returns the cycle with its first node repeated at the
    /// end. [`check_link`](Self::check_link) keeps the graph acyclic, so
    /// this only reports `Some` if that invariant was broken.
    #[must_use]
    pub fn detect_cycle(&self) -> Option<Vec<StatusId>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            Grey,
            Black,
        }

        fn visit(
            edges: &Edges,
            node: StatusId,
            colors: &mut HashMap<StatusId, Color>,
            path: &mut Vec<StatusId>,
        ) -> Option<Vec<StatusId>> {
            colors.insert(node, Color::Grey);
            path.push(node);
            if let Some(deps) = edges.edges.get(&node) {
                for &dep in deps {
                    match colors.get(&dep) {
                        Some(Color::Grey) => {
                            let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                            let mut cycle = path[start..].to_vec();
                            cycle.push(dep);
                            return Some(cycle);
                        }
                        Some(Color::Black) => {}
                        None => {
                            if let Some(cycle) = visit(edges, dep, colors, path) {
                                return Some(cycle);
                            }
                        }
                    }
                }
            }
            path.pop();
            colors.insert(node, Color::Black);
            None
        }

        let inner = self.inner.borrow();
        let mut colors = HashMap::new();
        let mut path = Vec::new();
        for &start in inner.local.edges.keys() {
            if colors.contains_key(&start) {
                continue;
            }
            if let Some(cycle) = visit(&inner.local, start, &mut colors, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    /// Check that `target` may be computed from `inputs`, against every live
    /// graph on this thread.
    ///
    /// Fails with [`StatusError::AlreadyBound`] if `target` already has a
    /// binding, and with [`StatusError::CyclicDependency`] if any input is
    /// `target` itself or (transitively) computed from it.
    pub(crate) fn check_link(&self, target: StatusId, inputs: &[StatusId]) -> Result<()> {
        BOUND.with(|bound| {
            let bound = bound.borrow();
            if bound.edges.contains_key(&target) {
                return Err(StatusError::AlreadyBound { status: target });
            }
            for &input in inputs {
                if let Some(path) = bound.path_between(input, target) {
                    let mut cycle = Vec::with_capacity(path.len() + 1);
                    cycle.push(target);
                    cycle.extend(path);
                    tracing::debug!(message = "graph.cycle", target = %target, cycle = ?cycle);
                    return Err(StatusError::CyclicDependency { cycle });
                }
            }
            Ok(())
        })
    }

    /// Record that `target` is computed from `inputs`.
    ///
    /// Updates both edge maps here and in the thread registry. Does not
    /// check for cycles; callers go through [`check_link`](Self::check_link).
    pub(crate) fn insert_link(&self, target: StatusId, inputs: &[StatusId]) {
        self.inner.borrow_mut().local.insert(target, inputs);
        BOUND.with(|bound| bound.borrow_mut().insert(target, inputs));
        tracing::debug!(message = "graph.bind", target = %target, inputs = ?inputs);
    }

    /// Drop every edge out of `target`.
    pub(crate) fn remove_link(&self, target: StatusId) {
        let mut inner = self.inner.borrow_mut();
        let Some(deps) = inner.local.edges.get(&target).cloned() else {
            return;
        };
        inner.local.remove(target, &deps);
        let _ = BOUND.try_with(|bound| bound.borrow_mut().remove(target, &deps));
        tracing::debug!(message = "graph.unbind", target = %target);
    }
}

impl fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("DependencyGraph")
            .field("edges", &inner.local.edges)
            .finish()
    }
}
