#![forbid(unsafe_code)]

//! Process-unique identifiers for statuses and listener registrations.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// ─── ID generation ───────────────────────────────────────────────────────────

static NEXT_STATUS_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one status cell.
///
/// Every [`Observable`](crate::Observable) gets a fresh id at construction;
/// clones of a handle share it. The dependency graph keys its edges on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatusId(u64);

impl StatusId {
    pub(crate) fn next() -> Self {
        Self(NEXT_STATUS_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Build an id from a raw value. Only useful for diagnostics and tests;
    /// ids built this way are not reserved.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StatusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status#{}", self.0)
    }
}

/// Identity of one listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}
