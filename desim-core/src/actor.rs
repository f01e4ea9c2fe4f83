// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Actors (`spec.md` §3 "Actor") and the handle actor code uses to reach the
//! kernel.

use crate::clock::{Duration, TimePoint};
use crate::context::ActorContext;
use crate::error::SimError;
use crate::future::KernelFuture;
use crate::simcall;
use crate::sync::condvar::Condvar;
use crate::sync::mutex::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A unique, stable identity for an actor, valid for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(u64);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

static NEXT_ACTOR_ID: AtomicU64 = AtomicU64::new(1);

impl ActorId {
    /// Id reserved for the maestro's own pseudo-actor; never appears in the
    /// actor table.
    pub const MAESTRO: ActorId = ActorId(0);

    pub(crate) fn fresh() -> Self {
        ActorId(NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// `spec.md` §3's three actor states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    Runnable,
    Blocked,
    Terminated,
}

/// An actor: its identity, execution context, and scheduling state. Owned
/// exclusively by the [`crate::kernel::Kernel`]'s actor table.
pub struct Actor {
    pub id: ActorId,
    pub(crate) context: ActorContext,
    pub(crate) state: ActorState,
    pub(crate) stop_requested: bool,
    /// Set by [`crate::kernel::Kernel::wake_actor`] whenever a kernel future
    /// the actor was blocked on actually resolves, cleared the moment that
    /// resumption is delivered. Checked ahead of `stop_requested`: a real
    /// result that has already been computed is always delivered on the
    /// actor's next resumption, even if a stop was requested for it in the
    /// meantime (`stop()` never cancels a callback that has already run).
    pub(crate) pending_real_wake: bool,
}

impl Actor {
    pub(crate) fn new(id: ActorId, context: ActorContext) -> Self {
        Actor {
            id,
            context,
            state: ActorState::Runnable,
            stop_requested: false,
            pending_real_wake: false,
        }
    }
}

/// The actor-facing handle: the only thing actor code is given to reach the
/// kernel (`spec.md` §6 "Actor API surface"). Cheap to clone and copy around;
/// every method traps into the kernel via a simcall.
#[derive(Clone, Copy)]
pub struct ActorHandle {
    id: ActorId,
}

impl ActorHandle {
    pub(crate) fn new(id: ActorId) -> Self {
        ActorHandle { id }
    }

    /// Returns the id of the actor holding this handle.
    #[must_use]
    pub fn id(self) -> ActorId {
        self.id
    }

    /// Returns a handle to whichever actor is presently executing, panicking
    /// if called outside actor context.
    #[must_use]
    pub fn current() -> Self {
        let id = crate::context::current_actor().expect("ActorHandle::current() called outside actor context");
        ActorHandle { id }
    }

    /// The kernel's current simulated time, read via an immediate simcall.
    #[must_use]
    pub fn now(self) -> TimePoint {
        simcall::run_immediate(|kernel| kernel.clock.now())
    }

    /// Runs `f` in the kernel and returns its value (or propagates its
    /// exception), without ever parking the actor for more than one round.
    pub fn kernel_immediate<R, F>(self, f: F) -> Result<R, SimError>
    where
        F: FnOnce(&mut crate::kernel::Kernel) -> R + 'static,
        R: 'static,
    {
        Ok(simcall::run_immediate(f))
    }

    /// Runs `f` (which produces a kernel future) and blocks until that
    /// future resolves, delivering its value or exception.
    pub fn kernel_sync<T, F>(self, f: F) -> Result<T, SimError>
    where
        F: FnOnce(&mut crate::kernel::Kernel) -> KernelFuture<T> + 'static,
        T: 'static,
    {
        simcall::kernel_sync(f)
    }

    /// Runs `f` (which produces a kernel future) and returns immediately with
    /// an [`crate::actor_future::ActorFuture`] wrapping it, unblocked.
    pub fn kernel_async<T, F>(self, f: F) -> crate::actor_future::ActorFuture<T>
    where
        F: FnOnce(&mut crate::kernel::Kernel) -> KernelFuture<T> + 'static,
        T: 'static,
    {
        simcall::kernel_async(f)
    }

    /// Spawns a new actor running `code`, returning its handle.
    pub fn spawn(self, code: impl FnOnce(ActorHandle) + 'static) -> ActorId {
        simcall::run_immediate(move |kernel| kernel.spawn(code))
    }

    /// Cooperative yield: a no-op immediate simcall that still round-trips
    /// through the scheduler, letting other runnable actors take a turn.
    pub fn yield_now(self) {
        simcall::run_immediate(|_kernel| ());
    }

    /// Creates a new simulated mutex.
    #[must_use]
    pub fn mutex(self) -> Mutex {
        Mutex::new()
    }

    /// Creates a new simulated condition variable.
    #[must_use]
    pub fn condvar(self) -> Condvar {
        Condvar::new()
    }

    /// Parks the calling actor until `duration` of simulated time has
    /// elapsed. Zero or negative durations are a no-op but still round-trip
    /// through the scheduler (`spec.md` §4.6).
    pub fn sleep_for(self, duration: Duration) {
        crate::sync::sleep::sleep_for(duration);
    }

    /// Parks the calling actor until simulated time reaches `at`.
    pub fn sleep_until(self, at: TimePoint) {
        crate::sync::sleep::sleep_until(at);
    }
}
