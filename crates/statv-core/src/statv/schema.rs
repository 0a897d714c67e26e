#![forbid(unsafe_code)]

//! Schemas: the declared set of stats a status object carries.

use std::fmt;
use std::rc::Rc;

use super::object::Statv;
use super::stat::{ErasedStat, Stat};
use crate::error::{Result, StatusError};

type Availability = Rc<dyn Fn(&Statv) -> bool>;

pub(crate) struct SchemaInner {
    pub(crate) name: String,
    /// Declaration order.
    pub(crate) stats: Vec<Rc<dyn ErasedStat>>,
    pub(crate) available: Option<Availability>,
}

/// The declared stats of a family of status objects, plus its availability
/// predicate.
///
/// Cheap to clone; every [`Statv`] keeps a handle to its schema.
///
/// # Example
///
/// ```
/// use statv_core::{InitStats, Schema, Stat, Statv};
///
/// let online = Stat::with_default("online", false);
/// let latency = Stat::<u32>::new("latency_ms");
///
/// let schema = Schema::builder("Adapter")
///     .stat(&online)
///     .stat(&latency)
///     .available_when({
///         let online = online.clone();
///         move |s| s.get(&online).unwrap_or(false)
///     })
///     .build()
///     .unwrap();
///
/// let adapter = Statv::new(&schema, InitStats::new().with("latency_ms", 40_u32)).unwrap();
/// assert!(!adapter.available());
/// adapter.set(&online, true).unwrap();
/// assert!(adapter.available());
/// ```
#[derive(Clone)]
pub struct Schema {
    pub(crate) inner: Rc<SchemaInner>,
}

impl Schema {
    #[must_use]
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            stats: Vec::new(),
            available: None,
            duplicate: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Ids of the declared stats, in declaration order.
    #[must_use]
    pub fn defined_stats(&self) -> Vec<&str> {
        self.inner.stats.iter().map(|stat| stat.id()).collect()
    }

    /// Whether `stat` (this exact descriptor, not just its id) is declared.
    #[must_use]
    pub fn owns<T: Clone + PartialEq + 'static>(&self, stat: &Stat<T>) -> bool {
        self.owns_identity(super::stat::identity_of(stat))
    }

    pub(crate) fn owns_identity(&self, identity: *const ()) -> bool {
        self.inner
            .stats
            .iter()
            .any(|declared| std::ptr::eq(declared.identity(), identity))
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.inner.name)
            .field("stats", &self.defined_stats())
            .field("has_availability", &self.inner.available.is_some())
            .finish()
    }
}

/// Builder for [`Schema`].
#[must_use]
pub struct SchemaBuilder {
    name: String,
    stats: Vec<Rc<dyn ErasedStat>>,
    available: Option<Availability>,
    duplicate: Option<String>,
}

impl SchemaBuilder {
    /// Declare a stat. Declaring two stats with the same id fails at
    /// [`build`](Self::build).
    pub fn stat<T: Clone + PartialEq + 'static>(mut self, stat: &Stat<T>) -> Self {
        if self.duplicate.is_none() && self.stats.iter().any(|s| s.id() == stat.id()) {
            self.duplicate = Some(stat.id().to_string());
        }
        self.stats.push(Rc::new(stat.clone()));
        self
    }

    /// Availability predicate. Status objects without one are always
    /// available.
    pub fn available_when(mut self, predicate: impl Fn(&Statv) -> bool + 'static) -> Self {
        self.available = Some(Rc::new(predicate));
        self
    }

    pub fn build(self) -> Result<Schema> {
        if let Some(id) = self.duplicate {
            return Err(StatusError::DuplicateStat { id });
        }
        Ok(Schema {
            inner: Rc::new(SchemaInner {
                name: self.name,
                stats: self.stats,
                available: self.available,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defined_stats_keep_declaration_order() {
        let val = Stat::with_default("val", false);
        let value = Stat::with_default_factory("value", || 0_i32);
        let schema = Schema::builder("AStat").stat(&val).stat(&value).build().unwrap();

        assert_eq!(schema.name(), "AStat");
        assert_eq!(schema.defined_stats(), vec!["val", "value"]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let a = Stat::with_default("val", false);
        let b = Stat::with_default("val", 0_i32);
        let err = Schema::builder("Dup").stat(&a).stat(&b).build().unwrap_err();
        assert_eq!(err, StatusError::DuplicateStat { id: "val".into() });
    }

    #[test]
    fn ownership_is_by_descriptor_not_id() {
        let val = Stat::with_default("val", false);
        let schema = Schema::builder("Own").stat(&val).build().unwrap();

        assert!(schema.owns(&val));
        assert!(schema.owns(&val.clone()));
        assert!(!schema.owns(&Stat::with_default("val", false)));
    }

    #[test]
    fn debug_format() {
        let schema = Schema::builder("Dbg")
            .stat(&Stat::with_default("x", 1_u8))
            .build()
            .unwrap();
        let dbg = format!("{schema:?}");
        assert!(dbg.contains("Dbg"));
        assert!(dbg.contains("\"x\""));
    }
}
