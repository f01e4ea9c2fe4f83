// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The actor-facing handle returned by [`crate::actor::ActorHandle::kernel_async`]
//! (`spec.md` §4.4's non-blocking variant): fire the kernel operation now,
//! decide whether and when to wait on its result later.

use crate::clock::{Duration, TimePoint};
use crate::error::SimError;
use crate::simcall::ActorFutureHandle;

/// A pending result an actor can poll or wait on, without having parked the
/// moment the underlying kernel operation was issued.
pub struct ActorFuture<T> {
    pub(crate) handle: ActorFutureHandle<T>,
}

impl<T: 'static> ActorFuture<T> {
    pub(crate) fn new(handle: ActorFutureHandle<T>) -> Self {
        ActorFuture { handle }
    }

    /// Non-blocking check: has the kernel operation completed?
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.handle.is_ready()
    }

    /// Blocks the calling actor until the result is available. If it already
    /// is, this still round-trips through one simcall (consistent with every
    /// other blocking operation never running its continuation inline).
    pub fn wait(self) -> Result<T, SimError> {
        self.handle.wait()
    }

    /// Like [`Self::wait`], but resolves with [`SimError::Timeout`] if the
    /// result isn't available within `duration` (`spec.md` §4.5).
    pub fn wait_for(self, duration: Duration) -> Result<T, SimError> {
        self.handle.wait_for(duration)
    }

    /// Like [`Self::wait_for`], expressed as an absolute deadline.
    pub fn wait_until(self, at: TimePoint) -> Result<T, SimError> {
        let now = crate::actor::ActorHandle::current().now();
        self.handle.wait_for(at.saturating_duration_since(now))
    }
}
