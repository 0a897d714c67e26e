#![forbid(unsafe_code)]

//! Statv public facade crate.
//!
//! Re-exports the stable surface of `statv-core`.

pub use statv_core::*;

pub mod prelude {
    pub use statv_core::{
        DependencyGraph, Derived, InitStats, Observable, Schema, SetOutcome, Stat, StatusError,
        Statv, Subscription, ValidationError,
    };
}
