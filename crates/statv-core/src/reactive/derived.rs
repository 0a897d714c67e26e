#![forbid(unsafe_code)]

//! Derived statuses that recompute eagerly from [`Observable`] inputs.
//!
//! # Design
//!
//! A [`Derived<T>`] owns a recompute closure and one subscription per input.
//! Input listeners hold the closure weakly; when any input changes the
//! closure reads every input and writes the result into the derived status,
//! which notifies its own listeners in turn. Propagation is therefore
//! synchronous and depth-first.
//!
//! Links are registered in a [`DependencyGraph`]. A link that would close a
//! cycle is rejected when it is built, before any listener is installed.
//!
//! # Invariants
//!
//! 1. After any input write completes, the derived value equals the compute
//!    function applied to the latest input values.
//! 2. An input write that does not change the input (under its comparator)
//!    triggers no recomputation.
//! 3. A recomputation producing a value equal to the current derived value
//!    does not notify the derived status's listeners.
//! 4. Dropping the `Derived` removes its graph edges and stops propagation;
//!    the status keeps its last value.
//!
//! # Failure Modes
//!
//! - **Target validator rejects a recomputed value**: the derived status
//!   keeps its previous value and a `WARN` event is logged. At bind time the
//!   same rejection fails the bind instead.
//! - **Compute function panics during propagation**: the panic is isolated
//!   like any listener panic and reported by the input's
//!   [`SetOutcome`](super::observable::SetOutcome).

use std::fmt;
use std::rc::{Rc, Weak};

use super::graph::DependencyGraph;
use super::observable::{Observable, Subscription};
use crate::error::Result;
use crate::id::StatusId;

type Recompute = Rc<dyn Fn()>;

/// A status whose value is computed from other statuses.
///
/// Not `Clone`: the handle owns the binding. Use [`status`](Self::status) to
/// hand out further read handles to the underlying cell.
pub struct Derived<T> {
    status: Observable<T>,
    graph: DependencyGraph,
    recompute: Recompute,
    links: Vec<Subscription>,
}

impl<T: fmt::Debug> fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("status", &self.status)
            .field("links", &self.links.len())
            .finish()
    }
}

impl<T: Clone + 'static> Derived<T> {
    /// The derived cell. Writes to it are overwritten on the next input
    /// change.
    #[must_use]
    pub fn status(&self) -> &Observable<T> {
        &self.status
    }

    #[must_use]
    pub fn id(&self) -> StatusId {
        self.status.id()
    }

    #[must_use]
    pub fn get(&self) -> T {
        self.status.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.status.with(f)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.status.version()
    }

    /// Register a listener on the derived cell.
    pub fn subscribe(&self, listener: impl Fn(&T, &T) + 'static) -> Subscription {
        self.status.subscribe(listener)
    }

    /// Recompute now, regardless of input changes.
    pub fn refresh(&self) {
        (self.recompute)();
    }
}

impl<T> Drop for Derived<T> {
    fn drop(&mut self) {
        // Subscriptions drop after this body and unhook the inputs.
        self.graph.remove_link(self.status.id());
    }
}

/// Listener installed on each input: forwards to the recompute closure while
/// the owning `Derived` is alive.
fn trigger<S: 'static>(recompute: &Recompute) -> impl Fn(&S, &S) + use<S> {
    let weak: Weak<dyn Fn()> = Rc::downgrade(recompute);
    move |_: &S, _: &S| {
        if let Some(recompute) = weak.upgrade() {
            recompute();
        }
    }
}

fn write_back<T: Clone + 'static>(target: &Observable<T>, value: T) {
    if let Err(err) = target.set(value) {
        tracing::warn!(
            message = "derived.rejected",
            status = %target.id(),
            error = %err
        );
    }
}

impl DependencyGraph {
    /// Create a fresh status computed from one input.
    ///
    /// A fresh status has no dependents, so this cannot close a cycle.
    pub fn derive<S, T>(&self, source: &Observable<S>, map: impl Fn(&S) -> T + 'static) -> Derived<T>
    where
        S: Clone + 'static,
        T: Clone + PartialEq + 'static,
    {
        let target = Observable::new(source.with(&map));
        let s = source.clone();
        let compute = move || s.with(&map);
        self.assemble(
            target,
            compute,
            |recompute| vec![source.subscribe(trigger::<S>(recompute))],
            &[source.id()],
        )
    }

    /// Create a fresh status computed from two inputs.
    pub fn derive2<S1, S2, T>(
        &self,
        s1: &Observable<S1>,
        s2: &Observable<S2>,
        map: impl Fn(&S1, &S2) -> T + 'static,
    ) -> Derived<T>
    where
        S1: Clone + 'static,
        S2: Clone + 'static,
        T: Clone + PartialEq + 'static,
    {
        let target = Observable::new(s1.with(|a| s2.with(|b| map(a, b))));
        let (c1, c2) = (s1.clone(), s2.clone());
        let compute = move || c1.with(|a| c2.with(|b| map(a, b)));
        self.assemble(
            target,
            compute,
            |recompute| vec![s1.subscribe(trigger::<S1>(recompute)), s2.subscribe(trigger::<S2>(recompute))],
            &[s1.id(), s2.id()],
        )
    }

    /// Create a fresh status computed from three inputs.
    pub fn derive3<S1, S2, S3, T>(
        &self,
        s1: &Observable<S1>,
        s2: &Observable<S2>,
        s3: &Observable<S3>,
        map: impl Fn(&S1, &S2, &S3) -> T + 'static,
    ) -> Derived<T>
    where
        S1: Clone + 'static,
        S2: Clone + 'static,
        S3: Clone + 'static,
        T: Clone + PartialEq + 'static,
    {
        let target = Observable::new(s1.with(|a| s2.with(|b| s3.with(|c| map(a, b, c)))));
        let (c1, c2, c3) = (s1.clone(), s2.clone(), s3.clone());
        let compute = move || c1.with(|a| c2.with(|b| c3.with(|c| map(a, b, c))));
        self.assemble(
            target,
            compute,
            |recompute| {
                vec![
                    s1.subscribe(trigger::<S1>(recompute)),
                    s2.subscribe(trigger::<S2>(recompute)),
                    s3.subscribe(trigger::<S3>(recompute)),
                ]
            },
            &[s1.id(), s2.id(), s3.id()],
        )
    }

    /// Make an existing status computed from one input.
    ///
    /// The target is written immediately with the computed value. Fails
    /// with [`CyclicDependency`](crate::StatusError::CyclicDependency) if
    /// `source` is `target` or is itself derived from `target`, with
    /// [`AlreadyBound`](crate::StatusError::AlreadyBound) if `target` is
    /// already derived, and with a validation error if the target rejects
    /// the initial value.
    pub fn bind<S, T>(
        &self,
        target: &Observable<T>,
        source: &Observable<S>,
        map: impl Fn(&S) -> T + 'static,
    ) -> Result<Derived<T>>
    where
        S: Clone + 'static,
        T: Clone + 'static,
    {
        let inputs = [source.id()];
        self.check_link(target.id(), &inputs)?;
        let s = source.clone();
        let compute = move || s.with(&map);
        target.set(compute())?;
        Ok(self.assemble(
            target.clone(),
            compute,
            |recompute| vec![source.subscribe(trigger::<S>(recompute))],
            &inputs,
        ))
    }

    /// Make an existing status computed from two inputs.
    pub fn bind2<S1, S2, T>(
        &self,
        target: &Observable<T>,
        s1: &Observable<S1>,
        s2: &Observable<S2>,
        map: impl Fn(&S1, &S2) -> T + 'static,
    ) -> Result<Derived<T>>
    where
        S1: Clone + 'static,
        S2: Clone + 'static,
        T: Clone + 'static,
    {
        let inputs = [s1.id(), s2.id()];
        self.check_link(target.id(), &inputs)?;
        let (c1, c2) = (s1.clone(), s2.clone());
        let compute = move || c1.with(|a| c2.with(|b| map(a, b)));
        target.set(compute())?;
        Ok(self.assemble(
            target.clone(),
            compute,
            |recompute| vec![s1.subscribe(trigger::<S1>(recompute)), s2.subscribe(trigger::<S2>(recompute))],
            &inputs,
        ))
    }

    /// Make an existing status computed from three inputs.
    pub fn bind3<S1, S2, S3, T>(
        &self,
        target: &Observable<T>,
        s1: &Observable<S1>,
        s2: &Observable<S2>,
        s3: &Observable<S3>,
        map: impl Fn(&S1, &S2, &S3) -> T + 'static,
    ) -> Result<Derived<T>>
    where
        S1: Clone + 'static,
        S2: Clone + 'static,
        S3: Clone + 'static,
        T: Clone + 'static,
    {
        let inputs = [s1.id(), s2.id(), s3.id()];
        self.check_link(target.id(), &inputs)?;
        let (c1, c2, c3) = (s1.clone(), s2.clone(), s3.clone());
        let compute = move || c1.with(|a| c2.with(|b| c3.with(|c| map(a, b, c))));
        target.set(compute())?;
        Ok(self.assemble(
            target.clone(),
            compute,
            |recompute| {
                vec![
                    s1.subscribe(trigger::<S1>(recompute)),
                    s2.subscribe(trigger::<S2>(recompute)),
                    s3.subscribe(trigger::<S3>(recompute)),
                ]
            },
            &inputs,
        ))
    }

    fn assemble<T: Clone + 'static>(
        &self,
        target: Observable<T>,
        compute: impl Fn() -> T + 'static,
        subscribe: impl FnOnce(&Recompute) -> Vec<Subscription>,
        inputs: &[StatusId],
    ) -> Derived<T> {
        let writer = target.clone();
        let recompute: Recompute = Rc::new(move || write_back(&writer, compute()));
        self.insert_link(target.id(), inputs);
        let links = subscribe(&recompute);
        Derived {
            status: target,
            graph: self.clone(),
            recompute,
            links,
        }
    }
}
