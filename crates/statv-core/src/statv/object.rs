#![forbid(unsafe_code)]

//! Status objects: one observable cell per declared stat.
//!
//! # Invariants
//!
//! 1. Every stat declared by the schema has exactly one cell, created at
//!    construction.
//! 2. Monitors on a stat fire only for writes that change its value, after
//!    the new value is stored.
//! 3. Waiters are woken by every write that passes validation, changed or
//!    not, whether it goes through the `Statv` or straight to a cell; a batch
//!    wakes them once, after all of its writes.
//! 4. A batch naming a stat the schema does not own writes nothing.

use std::any::Any;
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::schema::Schema;
use super::stat::{InitStats, Stat, identity_of};
use crate::error::{Result, StatusError};
use crate::reactive::observable::WriteHook;
use crate::reactive::{Observable, SetOutcome, Subscription};

/// Wake-up side of the async waiters. Shared with the write hook of every
/// cell, so it must not own the cells.
pub(crate) struct Waiters {
    #[cfg(feature = "async")]
    pub(crate) notify: tokio::sync::Notify,
    /// Set while a batch applies.
    held: Cell<bool>,
}

impl Waiters {
    fn new() -> Self {
        Self {
            #[cfg(feature = "async")]
            notify: tokio::sync::Notify::new(),
            held: Cell::new(false),
        }
    }

    fn wake(&self) {
        if self.held.get() {
            return;
        }
        #[cfg(feature = "async")]
        self.notify.notify_waiters();
    }
}

/// Holds wake-ups back until dropped.
struct Hold<'a>(&'a Waiters);

impl<'a> Hold<'a> {
    fn new(waiters: &'a Waiters) -> Self {
        waiters.held.set(true);
        Self(waiters)
    }
}

impl Drop for Hold<'_> {
    fn drop(&mut self) {
        self.0.held.set(false);
    }
}

pub(crate) struct StatvInner {
    pub(crate) schema: Schema,
    /// Stat id -> `Observable<T>`.
    cells: HashMap<String, Box<dyn Any>>,
    pub(crate) waiters: Rc<Waiters>,
}

/// A status object: an instance of a [`Schema`].
///
/// Cloning a `Statv` creates a new handle to the **same** object.
#[derive(Clone)]
pub struct Statv {
    pub(crate) inner: Rc<StatvInner>,
}

impl Statv {
    /// Build a status object. Each stat starts at its default, else its
    /// factory value, else the value in `init` under its id.
    ///
    /// Fails with [`StatusError::Uninitialized`] if a stat has none of the
    /// three and with [`StatusError::TypeMismatch`] if an init value has the
    /// wrong type. Init values for undeclared ids are ignored.
    pub fn new(schema: &Schema, mut init: InitStats) -> Result<Self> {
        let waiters = Rc::new(Waiters::new());
        let on_write: WriteHook = {
            let waiters = Rc::clone(&waiters);
            Rc::new(move || waiters.wake())
        };
        let mut cells = HashMap::with_capacity(schema.inner.stats.len());
        for stat in &schema.inner.stats {
            let cell = stat.create_cell(&mut init, &on_write)?;
            cells.insert(stat.id().to_string(), cell);
        }
        if !init.is_empty() {
            let unused: Vec<_> = init.remaining_ids().collect();
            tracing::debug!(
                message = "statv.init.unused",
                schema = schema.name(),
                ids = ?unused
            );
        }
        Ok(Self {
            inner: Rc::new(StatvInner {
                schema: schema.clone(),
                cells,
                waiters,
            }),
        })
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// The observable cell behind `stat`. Useful for deriving other
    /// statuses from a field.
    ///
    /// Writes through the cell, including writes by a binding in a
    /// [`DependencyGraph`](crate::DependencyGraph), run the stat's validator
    /// and wake waiters exactly like [`set`](Self::set).
    pub fn cell<T: Clone + PartialEq + 'static>(&self, stat: &Stat<T>) -> Result<&Observable<T>> {
        let cell = self
            .inner
            .cells
            .get(stat.id())
            .ok_or_else(|| StatusError::unknown(stat.id()))?;
        cell.downcast_ref::<Observable<T>>()
            .ok_or_else(|| StatusError::type_mismatch::<T>(stat.id()))
    }

    /// Current value of `stat`.
    pub fn get<T: Clone + PartialEq + 'static>(&self, stat: &Stat<T>) -> Result<T> {
        Ok(self.cell(stat)?.get())
    }

    /// Write `stat`: validator, then change check, then monitors, then
    /// waiters. A write that fails lookup or validation wakes nobody.
    pub fn set<T: Clone + PartialEq + 'static>(&self, stat: &Stat<T>, value: T) -> Result<SetOutcome> {
        self.cell(stat)?.set(value)
    }

    /// Register a monitor called with `(statv, stat, past, current)` each
    /// time `stat` changes.
    pub fn on_update<T: Clone + PartialEq + 'static>(
        &self,
        stat: &Stat<T>,
        monitor: impl Fn(&Statv, &Stat<T>, &T, &T) + 'static,
    ) -> Result<Subscription> {
        let cell = self.cell(stat)?;
        let weak = Rc::downgrade(&self.inner);
        let stat = stat.clone();
        Ok(cell.subscribe(move |past, current| {
            if let Some(inner) = weak.upgrade() {
                monitor(&Statv { inner }, &stat, past, current);
            }
        }))
    }

    /// Start a batch write across several stats.
    pub fn update_multi(&self) -> MultiUpdate<'_> {
        MultiUpdate {
            statv: self,
            writes: Vec::new(),
        }
    }

    /// Availability as defined by the schema predicate; `true` without one.
    #[must_use]
    pub fn available(&self) -> bool {
        match &self.inner.schema.inner.available {
            Some(predicate) => predicate(self),
            None => true,
        }
    }

    /// Whether both handles refer to the same status object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Statv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statv")
            .field("schema", &self.inner.schema.name())
            .field("stats", &self.inner.schema.defined_stats())
            .finish()
    }
}

type PendingWrite<'a> = Box<dyn FnOnce(&Statv) -> Result<SetOutcome> + 'a>;

/// A batch of writes applied by [`MultiUpdate::apply`].
#[must_use = "a MultiUpdate does nothing until `apply` is called"]
pub struct MultiUpdate<'a> {
    statv: &'a Statv,
    writes: Vec<(String, *const (), PendingWrite<'a>)>,
}

impl<'a> MultiUpdate<'a> {
    /// Queue a write. Writes apply in the order they were queued.
    pub fn set<T: Clone + PartialEq + 'static>(mut self, stat: &Stat<T>, value: T) -> Self {
        let owned = stat.clone();
        self.writes.push((
            stat.id().to_string(),
            identity_of(stat),
            Box::new(move |statv: &Statv| statv.set(&owned, value)),
        ));
        self
    }

    /// Apply every queued write, then wake waiters once.
    ///
    /// Ownership of every stat is checked first; a foreign stat fails the
    /// whole batch with [`StatusError::ForeignStat`] before anything is
    /// written. A validation failure stops the batch at that write; the
    /// writes before it stay applied and waiters are woken if there were
    /// any.
    pub fn apply(self) -> Result<Vec<SetOutcome>> {
        let schema = self.statv.schema();
        if let Some((id, _, _)) = self
            .writes
            .iter()
            .find(|(_, identity, _)| !schema.owns_identity(*identity))
        {
            return Err(StatusError::ForeignStat {
                id: id.clone(),
                schema: schema.name().to_string(),
            });
        }

        tracing::debug!(
            message = "statv.update_multi",
            schema = schema.name(),
            writes = self.writes.len()
        );

        let waiters = &self.statv.inner.waiters;
        let mut outcomes = Vec::with_capacity(self.writes.len());
        let mut failure = None;
        {
            let _hold = Hold::new(waiters);
            for (_, _, write) in self.writes {
                match write(self.statv) {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
        }
        if !outcomes.is_empty() {
            waiters.wake();
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(outcomes),
        }
    }
}
