#![forbid(unsafe_code)]

//! Observable status cells with ordered change listeners.
//!
//! # Design
//!
//! [`Observable<T>`] is a cheap handle over shared `Rc<RefCell<..>>` storage
//! holding the value, its version, the change predicate, an optional boundary
//! validator, and the listener list. Listeners are held strongly by the cell
//! and removed through their [`Subscription`] guard or by id.
//!
//! No borrow of the cell is held while listeners run. A listener may read the
//! cell, write other cells, or write this cell again; nested writes notify
//! depth-first before the outer dispatch resumes.
//!
//! # Invariants
//!
//! 1. The version increments exactly once per accepted write.
//! 2. Listeners run in registration order.
//! 3. A write that the comparator deems equal to the current value is a
//!    no-op (no version bump, no notification) unless forced.
//! 4. A listener removed before or during a dispatch is not called by it or
//!    by any later dispatch.
//!
//! # Failure Modes
//!
//! - **Validator rejects**: the write returns [`StatusError::Validation`]
//!   and the cell is untouched.
//! - **Listener panics**: the panic is caught and logged, the remaining
//!   listeners still run, and [`SetOutcome::failed_listeners`] counts it.
//!   The new value stays committed.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crate::error::{Result, StatusError, ValidationError};
use crate::id::{StatusId, SubscriptionId};

type Comparator<T> = Rc<dyn Fn(&T, &T) -> bool>;
type Validator<T> = Rc<dyn Fn(&T, T) -> std::result::Result<T, ValidationError>>;
type Listener<T> = Rc<dyn Fn(&T, &T)>;
pub(crate) type WriteHook = Rc<dyn Fn()>;

struct ObservableInner<T> {
    id: StatusId,
    name: Option<String>,
    value: T,
    version: u64,
    eq: Comparator<T>,
    validator: Option<Validator<T>>,
    /// Registration order is dispatch order.
    listeners: Vec<(SubscriptionId, Listener<T>)>,
    /// Runs after every write that passes validation, changed or not.
    write_hook: Option<WriteHook>,
}

impl<T> ObservableInner<T> {
    fn is_registered(&self, sub: SubscriptionId) -> bool {
        self.listeners.iter().any(|(id, _)| *id == sub)
    }

    fn remove(&mut self, sub: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(id, _)| *id != sub);
        self.listeners.len() != before
    }

    fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }
}

/// Result of a write to an [`Observable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOutcome {
    /// Whether the write was accepted (value differed, or the write was
    /// forced).
    pub changed: bool,
    /// Version of the cell after the write.
    pub version: u64,
    /// Listeners invoked by this write, including those that panicked.
    pub notified: usize,
    /// Listeners that panicked during this write.
    pub failed_listeners: usize,
}

impl SetOutcome {
    fn unchanged(version: u64) -> Self {
        Self {
            changed: false,
            version,
            notified: 0,
            failed_listeners: 0,
        }
    }
}

/// A shared, version-tracked status cell with change notification.
///
/// Cloning an `Observable` creates a new handle to the **same** cell.
pub struct Observable<T> {
    inner: Rc<RefCell<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("id", &inner.id)
            .field("name", &inner.name)
            .field("value", &inner.value)
            .field("version", &inner.version)
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

impl<T> Observable<T> {
    #[must_use]
    pub fn id(&self) -> StatusId {
        self.inner.borrow().id
    }

    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.inner.borrow().name.clone()
    }

    /// Number of accepted writes since construction.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    /// Whether both handles point at the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Remove a listener by id. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.borrow_mut().remove(id)
    }

    /// Install the hook run after every validated write, including writes
    /// that leave the value unchanged. Replaces any previous hook.
    pub(crate) fn set_write_hook(&self, hook: WriteHook) {
        self.inner.borrow_mut().write_hook = Some(hook);
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    /// Create a cell whose change predicate is `PartialEq`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::with_comparator(value, |a: &T, b: &T| a == b)
    }
}

impl<T: Clone + 'static> Observable<T> {
    /// Create a cell with a custom equality predicate. Writes for which
    /// `eq(current, new)` holds are no-ops.
    #[must_use]
    pub fn with_comparator(value: T, eq: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObservableInner {
                id: StatusId::next(),
                name: None,
                value,
                version: 0,
                eq: Rc::new(eq),
                validator: None,
                listeners: Vec::new(),
                write_hook: None,
            })),
        }
    }

    /// Attach a human-readable name used in logs and validation errors.
    #[must_use]
    pub fn named(self, name: impl Into<String>) -> Self {
        self.inner.borrow_mut().name = Some(name.into());
        self
    }

    /// Install a boundary validator, replacing any previous one.
    ///
    /// The validator receives the current value and the candidate, and
    /// returns the value to store (possibly coerced) or a rejection. It runs
    /// while the cell is borrowed, so it must not write to this cell.
    #[must_use]
    pub fn validated(
        self,
        validator: impl Fn(&T, T) -> std::result::Result<T, ValidationError> + 'static,
    ) -> Self {
        self.inner.borrow_mut().validator = Some(Rc::new(validator));
        self
    }

    /// Current value. No side effects.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Access the current value by reference without cloning.
    ///
    /// # Panics
    ///
    /// Panics if the closure writes to this cell (re-entrant borrow).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Write a value. Listeners run only if the value changed under the
    /// cell's comparator.
    pub fn set(&self, value: T) -> Result<SetOutcome> {
        self.commit(value, false)
    }

    /// Write a value and notify listeners even if it equals the current one.
    pub fn set_forced(&self, value: T) -> Result<SetOutcome> {
        self.commit(value, true)
    }

    /// Modify a copy of the current value in place and write it back.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> Result<SetOutcome> {
        let mut next = self.get();
        f(&mut next);
        self.set(next)
    }

    /// Register a listener called with `(old, new)` on every accepted write.
    ///
    /// The listener stays registered until the returned guard is dropped,
    /// [`Subscription::unsubscribe`] is called, or
    /// [`Observable::unsubscribe`] is called with its id.
    pub fn subscribe(&self, listener: impl Fn(&T, &T) + 'static) -> Subscription {
        let id = SubscriptionId::next();
        let status = {
            let mut inner = self.inner.borrow_mut();
            inner.listeners.push((id, Rc::new(listener)));
            inner.id
        };
        let weak: Weak<RefCell<ObservableInner<T>>> = Rc::downgrade(&self.inner);
        Subscription::new(id, status, move || match weak.upgrade() {
            Some(inner) => inner.borrow_mut().remove(id),
            None => false,
        })
    }

    /// Register a listener that only cares about the new value.
    pub fn subscribe_value(&self, listener: impl Fn(&T) + 'static) -> Subscription {
        self.subscribe(move |_, new| listener(new))
    }

    fn commit(&self, value: T, force: bool) -> Result<SetOutcome> {
        let validator = self.inner.borrow().validator.clone();
        let value = match validator {
            Some(validate) => {
                let inner = self.inner.borrow();
                validate(&inner.value, value).map_err(StatusError::from)?
            }
            None => value,
        };

        let staged = {
            let mut inner = self.inner.borrow_mut();
            if !force && (inner.eq)(&inner.value, &value) {
                tracing::trace!(message = "status.set.unchanged", status = %inner.id);
                Err(SetOutcome::unchanged(inner.version))
            } else {
                let new = value.clone();
                let old = std::mem::replace(&mut inner.value, value);
                inner.version += 1;
                Ok((old, new, inner.listeners.clone(), inner.id, inner.version))
            }
        };
        let (old, new, listeners, status, version) = match staged {
            Ok(staged) => staged,
            Err(unchanged) => {
                self.after_write();
                return Ok(unchanged);
            }
        };

        tracing::trace!(
            message = "status.set",
            status = %status,
            version,
            listeners = listeners.len(),
            forced = force
        );

        let mut notified = 0;
        let mut failed_listeners = 0;
        for (sub, listener) in &listeners {
            // An earlier listener may have removed this one.
            if !self.inner.borrow().is_registered(*sub) {
                continue;
            }
            notified += 1;
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener(&old, &new)));
            if let Err(payload) = result {
                failed_listeners += 1;
                let label = self.inner.borrow().label();
                tracing::warn!(
                    message = "status.listener_panicked",
                    status = %label,
                    subscription = %sub,
                    panic = %panic_message(payload.as_ref())
                );
            }
        }

        self.after_write();
        Ok(SetOutcome {
            changed: true,
            version,
            notified,
            failed_listeners,
        })
    }

    fn after_write(&self) {
        let hook = self.inner.borrow().write_hook.clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// RAII guard for a listener registration.
///
/// Dropping the guard removes the listener. Use [`detach`](Self::detach) to
/// keep the listener for the lifetime of the cell instead.
#[must_use = "dropping a Subscription unsubscribes its listener immediately"]
pub struct Subscription {
    id: SubscriptionId,
    status: StatusId,
    remove: Option<Box<dyn FnOnce() -> bool>>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        status: StatusId,
        remove: impl FnOnce() -> bool + 'static,
    ) -> Self {
        Self {
            id,
            status,
            remove: Some(Box::new(remove)),
        }
    }

    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The cell this listener is registered on.
    #[must_use]
    pub fn status(&self) -> StatusId {
        self.status
    }

    /// Remove the listener now. Returns `false` if it was already removed
    /// (for example through [`Observable::unsubscribe`]) or the cell is gone.
    pub fn unsubscribe(mut self) -> bool {
        self.remove.take().is_some_and(|remove| remove())
    }

    /// Forget the guard, leaving the listener registered.
    pub fn detach(mut self) {
        self.remove = None;
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("attached", &self.remove.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::{Arc, Mutex};
    use tracing::Subscriber;
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::{Context, SubscriberExt};

    fn recorder<T: Clone + 'static>() -> (Rc<RefCell<Vec<(T, T)>>>, impl Fn(&T, &T) + 'static) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        (log, move |old: &T, new: &T| {
            sink.borrow_mut().push((old.clone(), new.clone()));
        })
    }

    #[test]
    fn get_returns_initial_value() {
        let status = Observable::new("idle".to_string());
        assert_eq!(status.get(), "idle");
        assert_eq!(status.version(), 0);
    }

    #[test]
    fn set_notifies_with_old_and_new() {
        let status = Observable::new(1);
        let (log, listener) = recorder::<i32>();
        let _sub = status.subscribe(listener);

        let outcome = status.set(2).unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.version, 1);
        assert_eq!(outcome.notified, 1);
        assert_eq!(*log.borrow(), vec![(1, 2)]);
    }

    #[test]
    fn equal_set_is_noop() {
        let status = Observable::new(5);
        let (log, listener) = recorder::<i32>();
        let _sub = status.subscribe(listener);

        let outcome = status.set(5).unwrap();
        assert!(!outcome.changed);
        assert_eq!(status.version(), 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn forced_set_notifies_on_equal_value() {
        let status = Observable::new(5);
        let (log, listener) = recorder::<i32>();
        let _sub = status.subscribe(listener);

        let outcome = status.set_forced(5).unwrap();
        assert!(outcome.changed);
        assert_eq!(status.version(), 1);
        assert_eq!(*log.borrow(), vec![(5, 5)]);
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let status = Observable::new(0);
        let order = Rc::new(RefCell::new(Vec::new()));
        let subs: Vec<_> = (0..4)
            .map(|i| {
                let order = Rc::clone(&order);
                status.subscribe(move |_, _| order.borrow_mut().push(i))
            })
            .collect();

        status.set(1).unwrap();
        assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
        drop(subs);
    }

    #[test]
    fn dropping_guard_unsubscribes() {
        let status = Observable::new(0);
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let sub = status.subscribe(move |_, _| c.set(c.get() + 1));

        status.set(1).unwrap();
        drop(sub);
        status.set(2).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(status.listener_count(), 0);
    }

    #[test]
    fn unsubscribe_by_id_is_idempotent() {
        let status = Observable::new(0);
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let sub = status.subscribe(move |_, _| c.set(c.get() + 1));
        let id = sub.id();

        assert!(status.unsubscribe(id));
        assert!(!status.unsubscribe(id));
        // Guard removal after id removal is a no-op.
        assert!(!sub.unsubscribe());

        status.set(1).unwrap();
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn detached_listener_outlives_guard() {
        let status = Observable::new(0);
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        status.subscribe(move |_, _| c.set(c.get() + 1)).detach();

        status.set(1).unwrap();
        status.set(2).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn listener_removed_mid_dispatch_is_skipped() {
        let status = Observable::new(0);
        let second_calls = Rc::new(Cell::new(0));

        let victim: Rc<Cell<Option<SubscriptionId>>> = Rc::new(Cell::new(None));
        let killer_target = Rc::clone(&victim);
        let handle = status.clone();
        let _first = status.subscribe(move |_, _| {
            if let Some(id) = killer_target.get() {
                handle.unsubscribe(id);
            }
        });

        let c = Rc::clone(&second_calls);
        let second = status.subscribe(move |_, _| c.set(c.get() + 1));
        victim.set(Some(second.id()));
        second.detach();

        let outcome = status.set(1).unwrap();
        assert_eq!(outcome.notified, 1);
        assert_eq!(second_calls.get(), 0);
    }

    #[test]
    fn custom_comparator_defines_change() {
        let status = Observable::with_comparator(1.0_f64, |a, b| (a - b).abs() < 0.01);
        let (log, listener) = recorder::<f64>();
        let _sub = status.subscribe(listener);

        status.set(1.005).unwrap();
        assert!(log.borrow().is_empty());
        assert_eq!(status.get(), 1.0);

        status.set(1.5).unwrap();
        assert_eq!(*log.borrow(), vec![(1.0, 1.5)]);
    }

    #[test]
    fn validator_coerces_value() {
        let status = Observable::new(0).validated(|_, v: i32| Ok(v.clamp(0, 5)));
        status.set(7).unwrap();
        assert_eq!(status.get(), 5);
        status.set(-1).unwrap();
        assert_eq!(status.get(), 0);
    }

    #[test]
    fn validator_rejection_leaves_cell_untouched() {
        let status = Observable::new(3)
            .named("retries")
            .validated(|_, v: i32| {
                if v < 0 {
                    Err(ValidationError::new("retries", "must be non-negative"))
                } else {
                    Ok(v)
                }
            });
        let (log, listener) = recorder::<i32>();
        let _sub = status.subscribe(listener);

        let err = status.set(-2).unwrap_err();
        assert!(matches!(err, StatusError::Validation(ref v) if v.target() == "retries"));
        assert_eq!(status.get(), 3);
        assert_eq!(status.version(), 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn update_routes_through_set() {
        let status = Observable::new(vec![1, 2]);
        status.update(|v| v.push(3)).unwrap();
        assert_eq!(status.get(), vec![1, 2, 3]);
        assert!(!status.update(|_| {}).unwrap().changed);
    }

    #[test]
    fn reentrant_write_from_listener() {
        let status = Observable::new(0);
        let handle = status.clone();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = status.subscribe(move |_, new| {
            s.borrow_mut().push(*new);
            if *new < 3 {
                handle.set(new + 1).unwrap();
            }
        });

        status.set(1).unwrap();
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
        assert_eq!(status.get(), 3);
        assert_eq!(status.version(), 3);
    }

    #[test]
    fn panicking_listener_is_isolated() {
        let status = Observable::new(0);
        let calls = Rc::new(Cell::new(0));

        let c1 = Rc::clone(&calls);
        let _a = status.subscribe(move |_, _| c1.set(c1.get() + 1));
        let _b = status.subscribe(|_, _| panic!("listener failure"));
        let c3 = Rc::clone(&calls);
        let _c = status.subscribe(move |_, _| c3.set(c3.get() + 1));

        let outcome = status.set(1).unwrap();
        assert_eq!(outcome.notified, 3);
        assert_eq!(outcome.failed_listeners, 1);
        assert_eq!(calls.get(), 2);
        assert_eq!(status.get(), 1);
    }

    #[test]
    fn clone_shares_cell() {
        let a = Observable::new(1);
        let b = a.clone();
        b.set(9).unwrap();
        assert_eq!(a.get(), 9);
        assert!(a.ptr_eq(&b));
        assert_eq!(a.id(), b.id());
        assert!(!a.ptr_eq(&Observable::new(9)));
    }

    #[test]
    fn subscription_survives_cell_drop() {
        let sub = {
            let status = Observable::new(0);
            status.subscribe(|_, _| {})
        };
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn subscribe_value_receives_new_only() {
        let status = Observable::new("a".to_string());
        let last = Rc::new(RefCell::new(String::new()));
        let l = Rc::clone(&last);
        let _sub = status.subscribe_value(move |v| *l.borrow_mut() = v.clone());
        status.set("b".into()).unwrap();
        assert_eq!(*last.borrow(), "b");
    }

    #[test]
    fn debug_format() {
        let status = Observable::new(42).named("answer");
        let dbg = format!("{status:?}");
        assert!(dbg.contains("Observable"));
        assert!(dbg.contains("42"));
        assert!(dbg.contains("answer"));
    }

    #[test]
    fn write_hook_runs_on_every_validated_write() {
        let status = Observable::new(0).validated(|_, v: i32| {
            if v < 0 {
                Err(ValidationError::new("count", "negative"))
            } else {
                Ok(v)
            }
        });
        let writes = Rc::new(Cell::new(0));
        let w = Rc::clone(&writes);
        status.set_write_hook(Rc::new(move || w.set(w.get() + 1)));

        status.set(1).unwrap();
        status.set(1).unwrap();
        assert_eq!(writes.get(), 2);
        assert!(status.set(-1).is_err());
        assert_eq!(writes.get(), 2);
    }

    struct PanicEventCapture {
        saw: Arc<Mutex<bool>>,
    }

    impl<S: Subscriber> Layer<S> for PanicEventCapture {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            struct Msg {
                message: Option<String>,
            }
            impl tracing::field::Visit for Msg {
                fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                    if field.name() == "message" {
                        self.message = Some(value.to_string());
                    }
                }

                fn record_debug(
                    &mut self,
                    field: &tracing::field::Field,
                    value: &dyn std::fmt::Debug,
                ) {
                    if field.name() == "message" {
                        self.message = Some(format!("{value:?}").trim_matches('"').to_string());
                    }
                }
            }
            let mut msg = Msg { message: None };
            event.record(&mut msg);
            if msg.message.as_deref() == Some("status.listener_panicked") {
                *self.saw.lock().expect("capture lock") = true;
            }
        }
    }

    #[test]
    fn listener_panic_emits_warn_event() {
        let saw = Arc::new(Mutex::new(false));
        let subscriber = tracing_subscriber::registry().with(PanicEventCapture {
            saw: Arc::clone(&saw),
        });
        let _guard = tracing::subscriber::set_default(subscriber);

        let status = Observable::new(0);
        let _sub = status.subscribe(|_, _| panic!("boom"));
        status.set(1).unwrap();

        assert!(*saw.lock().expect("capture lock"), "expected status.listener_panicked");
    }
}
