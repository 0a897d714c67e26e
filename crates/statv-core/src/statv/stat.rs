#![forbid(unsafe_code)]

//! Typed field descriptors for status objects.

use std::any::Any;
use std::cell::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{Result, StatusError, ValidationError};
use crate::reactive::Observable;
use crate::reactive::observable::WriteHook;

type StatValidator<T> = dyn Fn(&Stat<T>, &T, T) -> std::result::Result<T, ValidationError>;

struct StatInner<T> {
    id: String,
    default: Option<T>,
    default_factory: Option<Box<dyn Fn() -> T>>,
    /// Filled at most once.
    validator: OnceCell<Rc<StatValidator<T>>>,
}

/// A named, typed field of a status object.
///
/// A `Stat` is a descriptor: it holds no value itself. Each
/// [`Statv`](super::Statv) built from a [`Schema`](super::Schema) that
/// declares the stat owns one cell for it.
///
/// Cloning a `Stat` creates a new handle to the **same** descriptor, so a
/// validator installed through one handle applies to all of them, including
/// status objects created earlier.
pub struct Stat<T> {
    inner: Rc<StatInner<T>>,
}

impl<T> Clone for Stat<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Stat<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stat")
            .field("id", &self.inner.id)
            .field("default", &self.inner.default)
            .field("has_factory", &self.inner.default_factory.is_some())
            .field("has_validator", &self.inner.validator.get().is_some())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Stat<T> {
    /// A stat with no default. Status objects must supply it through
    /// [`InitStats`].
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self::build(id.into(), None, None)
    }

    /// A stat that starts at a clone of `default`.
    #[must_use]
    pub fn with_default(id: impl Into<String>, default: T) -> Self {
        Self::build(id.into(), Some(default), None)
    }

    /// A stat that starts at a fresh value from `factory` per status object.
    #[must_use]
    pub fn with_default_factory(id: impl Into<String>, factory: impl Fn() -> T + 'static) -> Self {
        Self::build(id.into(), None, Some(Box::new(factory)))
    }

    fn build(id: String, default: Option<T>, default_factory: Option<Box<dyn Fn() -> T>>) -> Self {
        Self {
            inner: Rc::new(StatInner {
                id,
                default,
                default_factory,
                validator: OnceCell::new(),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Whether a status object can initialise this stat without an init
    /// value.
    #[must_use]
    pub fn has_default(&self) -> bool {
        self.inner.default.is_some() || self.inner.default_factory.is_some()
    }

    /// Install the validator. A stat accepts exactly one.
    ///
    /// The validator receives the stat, the past value, and the candidate,
    /// and returns the value to store or a rejection.
    pub fn set_validator(
        &self,
        validator: impl Fn(&Stat<T>, &T, T) -> std::result::Result<T, ValidationError> + 'static,
    ) -> Result<()> {
        self.inner
            .validator
            .set(Rc::new(validator))
            .map_err(|_| StatusError::ValidatorAlreadySet {
                id: self.inner.id.clone(),
            })
    }

    #[must_use]
    pub fn has_validator(&self) -> bool {
        self.inner.validator.get().is_some()
    }

    /// Whether both handles refer to the same descriptor.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn validate(&self, past: &T, current: T) -> std::result::Result<T, ValidationError> {
        match self.inner.validator.get() {
            Some(validator) => validator(self, past, current),
            None => Ok(current),
        }
    }

    fn initial(&self) -> Option<T> {
        if let Some(default) = &self.inner.default {
            return Some(default.clone());
        }
        self.inner.default_factory.as_ref().map(|factory| factory())
    }
}

/// Type-erased view of a [`Stat`] used by schemas.
pub(crate) trait ErasedStat {
    fn id(&self) -> &str;

    /// Descriptor identity, for ownership checks.
    fn identity(&self) -> *const ();

    /// Build the cell for one status object: default, then factory, then
    /// init value. The cell runs this stat's validator and `on_write` on
    /// every write, whichever handle the write comes through.
    fn create_cell(&self, init: &mut InitStats, on_write: &WriteHook) -> Result<Box<dyn Any>>;
}

impl<T: Clone + PartialEq + 'static> ErasedStat for Stat<T> {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn identity(&self) -> *const () {
        Rc::as_ptr(&self.inner).cast()
    }

    fn create_cell(&self, init: &mut InitStats, on_write: &WriteHook) -> Result<Box<dyn Any>> {
        let value = match self.initial() {
            Some(value) => value,
            None => match init.take::<T>(&self.inner.id) {
                Some(value) => value?,
                None => {
                    return Err(StatusError::Uninitialized {
                        id: self.inner.id.clone(),
                    });
                }
            },
        };
        let stat = self.clone();
        let cell = Observable::new(value)
            .named(self.inner.id.clone())
            .validated(move |past, current| stat.validate(past, current));
        cell.set_write_hook(Rc::clone(on_write));
        Ok(Box::new(cell))
    }
}

pub(crate) fn identity_of<T: Clone + PartialEq + 'static>(stat: &Stat<T>) -> *const () {
    ErasedStat::identity(stat)
}

/// Initial values for stats that have no default, keyed by stat id.
#[derive(Default)]
pub struct InitStats {
    values: HashMap<String, Box<dyn Any>>,
}

impl InitStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with<T: 'static>(mut self, id: impl Into<String>, value: T) -> Self {
        self.insert(id, value);
        self
    }

    pub fn insert<T: 'static>(&mut self, id: impl Into<String>, value: T) {
        self.values.insert(id.into(), Box::new(value));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn take<T: 'static>(&mut self, id: &str) -> Option<Result<T>> {
        let boxed = self.values.remove(id)?;
        Some(
            boxed
                .downcast::<T>()
                .map(|value| *value)
                .map_err(|_| StatusError::type_mismatch::<T>(id)),
        )
    }

    pub(crate) fn remaining_ids(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl fmt::Debug for InitStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.values.keys().collect();
        ids.sort();
        f.debug_struct("InitStats").field("ids", &ids).finish()
    }
}
