#![forbid(unsafe_code)]

//! Observable status containers.
//!
//! `statv-core` provides single-threaded observable values, derived statuses
//! bound through a cycle-checked dependency graph, and schema-driven status
//! objects whose availability can be awaited.
//!
//! # Example
//!
//! ```
//! use statv_core::{DependencyGraph, Observable};
//!
//! let width = Observable::new(4_u32);
//! let height = Observable::new(3_u32);
//! let graph = DependencyGraph::new();
//! let area = graph.derive2(&width, &height, |w, h| w * h);
//!
//! width.set(5).unwrap();
//! assert_eq!(area.get(), 15);
//! ```

pub mod error;
pub mod id;
pub mod reactive;
pub mod statv;

pub use error::{Result, StatusError, ValidationError};
pub use id::{StatusId, SubscriptionId};
pub use reactive::{DependencyGraph, Derived, Observable, SetOutcome, Subscription};
pub use statv::{InitStats, MultiUpdate, Schema, SchemaBuilder, Stat, Statv};
