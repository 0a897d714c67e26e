#![forbid(unsafe_code)]

//! Observable statuses and the dependency graph between them.
//!
//! - [`Observable`]: a shared, version-tracked value with change
//!   notification, an optional validator, and a pluggable comparator.
//! - [`Subscription`]: guard that removes its listener on drop.
//! - [`DependencyGraph`]: records which statuses are derived from which and
//!   refuses bindings that would close a cycle.
//! - [`Derived`]: a status recomputed eagerly whenever one of its inputs
//!   changes.
//!
//! # Architecture
//!
//! `Observable<T>` uses `Rc<RefCell<..>>` for single-threaded shared
//! ownership. The borrow is released before listeners run, so a listener may
//! read or write any status, including the one that notified it.
//!
//! A `Derived<T>` subscribes to each input. The input listeners hold the
//! recompute closure weakly; dropping the `Derived` stops propagation and
//! removes its edges from the graph.
//!
//! # Invariants
//!
//! 1. Version increments exactly once per write that changes the value.
//! 2. Listeners are notified in registration order, after the new value is
//!    stored.
//! 3. Writing a value equal to the current one is a no-op unless forced.
//! 4. A listener removed during dispatch is not called for the rest of that
//!    dispatch.
//! 5. The dependency graph never contains a cycle.

pub mod derived;
pub mod graph;
pub mod observable;

pub use derived::Derived;
pub use graph::DependencyGraph;
pub use observable::{Observable, SetOutcome, Subscription};
