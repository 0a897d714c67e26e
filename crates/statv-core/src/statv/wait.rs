#![forbid(unsafe_code)]

//! Async waiters on status objects.
//!
//! Every write that passes validation wakes all pending waiters, whether or
//! not it changed a value. Rejected writes and unknown stats wake nobody.
//! Waiters register before they check, so a write between the check and the
//! await is never missed.

use std::pin::pin;

use super::object::Statv;

impl Statv {
    /// Resolve after the next write to this status object.
    pub async fn wait_for_update(&self) -> &Self {
        let mut notified = pin!(self.inner.waiters.notify.notified());
        notified.as_mut().enable();
        notified.await;
        self
    }

    /// Resolve once [`available`](Statv::available) holds. Returns at once if
    /// it already does.
    pub async fn wait_for_available(&self) -> &Self {
        self.wait_until(true).await
    }

    /// Resolve once [`available`](Statv::available) no longer holds.
    pub async fn wait_for_unavailable(&self) -> &Self {
        self.wait_until(false).await
    }

    async fn wait_until(&self, wanted: bool) -> &Self {
        loop {
            let mut notified = pin!(self.inner.waiters.notify.notified());
            notified.as_mut().enable();
            if self.available() == wanted {
                return self;
            }
            notified.await;
        }
    }
}
