#![forbid(unsafe_code)]

//! Status objects built from a schema of typed stats.
//!
//! A [`Schema`] declares [`Stat`] descriptors and an optional availability
//! predicate. Each [`Statv`] created from it owns one observable cell per
//! stat, initialised from the stat's default, its factory, or an
//! [`InitStats`] entry.
//!
//! # Failure Modes
//!
//! - Reading or writing a stat the schema does not declare returns
//!   [`UnknownStat`](crate::StatusError::UnknownStat).
//! - A batch that names a stat from another schema is rejected whole with
//!   [`ForeignStat`](crate::StatusError::ForeignStat).
//! - A monitor that panics is logged and counted in the write's
//!   [`SetOutcome`](crate::SetOutcome); the write itself stands.

mod object;
mod schema;
mod stat;
#[cfg(feature = "async")]
mod wait;

pub use object::{MultiUpdate, Statv};
pub use schema::{Schema, SchemaBuilder};
pub use stat::{InitStats, Stat};
