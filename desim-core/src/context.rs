// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Stack-switched execution contexts for actors (`spec.md` §4.1), built on
//! the [`fiber`] crate's stackful coroutines.
//!
//! An actor's user code runs inside a [`fiber::Fiber`]; the kernel resumes it
//! by calling [`ActorContext::resume`] and gets back either a yielded
//! [`Yielded::Simcall`] (the actor trapped into the kernel) or a final
//! [`ActorOutcome`] (the actor ran to completion, panicked, or was stopped).
//!
//! Actor code never sees a `Suspend` value directly: [`current_suspend`]
//! exposes the one for the fiber presently executing on this OS thread via a
//! thread-local, so [`crate::simcall::run_immediate`]/[`run_blocking`] can
//! reach it without threading it through every call in the actor API.

use crate::actor::ActorId;
use crate::simcall::{SimcallRecord, Yielded};
use fiber::stack::DefaultFiberStack;
use fiber::{Fiber, FiberResult, Suspend};
use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};

/// What the maestro hands back to a parked actor when resuming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Normal resumption: the simcall's outcome is already stored where the
    /// actor expects to find it.
    Run,
    /// The actor's [`crate::context::stop`] signal fired. Actor code must
    /// unwind, not return a value.
    Stop,
}

/// The marker type unwound through actor code when it is stopped mid-flight.
/// Caught only at the context boundary (the bottom of [`ActorContext::new`]'s
/// trampoline); an escape past that point is a scheduler bug.
pub struct StopSignal;

/// How an actor's fiber finished running to completion (as opposed to
/// yielding a simcall).
pub enum ActorOutcome {
    Finished,
    Stopped,
    Panicked(String),
}

#[derive(Clone, Copy)]
struct Current {
    suspend: *const Suspend<Resume, Yielded>,
    actor: ActorId,
}

thread_local! {
    static CURRENT: Cell<Option<Current>> = const { Cell::new(None) };
}

/// Returns the `Suspend` handle for whichever actor fiber is currently
/// executing on this OS thread, or `None` if we're running in maestro
/// context (no actor fiber active on this thread).
pub(crate) fn current_suspend() -> Option<&'static Suspend<Resume, Yielded>> {
    CURRENT.with(|cell| {
        let current = cell.get()?;
        // Safety: only ever set to a pointer derived from a live `&Suspend`
        // for the duration of the fiber's execution on this thread, and
        // cleared before that `&Suspend` could become dangling (see
        // `with_current`).
        unsafe { current.suspend.as_ref() }
    })
}

/// Returns the id of whichever actor is currently executing on this OS
/// thread, or `None` in maestro context.
pub(crate) fn current_actor() -> Option<ActorId> {
    CURRENT.with(|cell| cell.get().map(|c| c.actor))
}

fn with_current<R>(actor: ActorId, suspend: &Suspend<Resume, Yielded>, f: impl FnOnce() -> R) -> R {
    CURRENT.with(|cell| {
        let prev = cell.get();
        cell.set(Some(Current {
            suspend: std::ptr::from_ref(suspend),
            actor,
        }));
        let result = f();
        cell.set(prev);
        result
    })
}

/// A stack-switched execution context. Owns the actor's stack and, once
/// started, the machine registers needed to resume it.
pub struct ActorContext {
    fiber: Fiber<Resume, Yielded, ActorOutcome, (), DefaultFiberStack>,
}

// Safety: a `Fiber` embeds raw stack-pointer state and is `!Send` because
// resuming it from two threads at once would race on that state. The
// parallel context factory (`crate::kernel::parallel`) only ever reaches a
// given actor's context through a raw pointer scoped to one
// `std::thread::scope` round, and partitions the round's batch so no two
// worker threads ever hold a pointer to the same `Actor`. So although
// `ActorContext` crosses threads (the scope's closures capture a pointer
// derived from it), it is never touched from two threads in the same round,
// and the scope's join is a happens-before edge into the next round. That is
// exactly what `Send` requires; the compiler just can't see it through the
// raw pointers involved.
unsafe impl Send for ActorContext {}

impl ActorContext {
    /// Allocates a stack and prepares a trampoline that invokes `code` once,
    /// then runs `cleanup` (if any) regardless of how `code` terminated, then
    /// reports the actor's stop path.
    ///
    /// Stack allocation failure is fatal per `spec.md` §4.1; we let the
    /// `DefaultFiberStack::default()` panic (it already aborts-by-panic on
    /// `mmap` failure) propagate rather than add a recovery path nothing else
    /// in this crate is prepared to use.
    #[must_use]
    pub fn new(actor: ActorId, code: Box<dyn FnOnce() + 'static>, cleanup: Option<Box<dyn FnOnce()>>) -> Self {
        let stack = DefaultFiberStack::default();
        let fiber = Fiber::with_stack(stack, move |first: Resume, suspend, _local: &()| {
            with_current(actor, suspend, move || run_actor_body(first, code, cleanup))
        });
        ActorContext { fiber }
    }

    /// Switches from the current (maestro) context to this one, running the
    /// actor until its next simcall or until it terminates.
    pub fn resume(&mut self, input: Resume) -> FiberResult<Yielded, ActorOutcome> {
        self.fiber.resume(input)
    }

    #[must_use]
    pub fn done(&self) -> bool {
        self.fiber.done()
    }
}

fn run_actor_body(
    first: Resume,
    code: Box<dyn FnOnce() + 'static>,
    cleanup: Option<Box<dyn FnOnce()>>,
) -> ActorOutcome {
    struct RunCleanup(Option<Box<dyn FnOnce()>>);
    impl Drop for RunCleanup {
        fn drop(&mut self) {
            if let Some(cleanup) = self.0.take() {
                cleanup();
            }
        }
    }
    let _cleanup_guard = RunCleanup(cleanup);

    if matches!(first, Resume::Stop) {
        return ActorOutcome::Stopped;
    }

    match panic::catch_unwind(AssertUnwindSafe(code)) {
        Ok(()) => ActorOutcome::Finished,
        Err(payload) => {
            if payload.is::<StopSignal>() {
                ActorOutcome::Stopped
            } else {
                ActorOutcome::Panicked(describe_panic(&payload))
            }
        }
    }
}

fn describe_panic(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "actor code panicked with a non-string payload".to_string()
    }
}

/// Parks the calling actor and yields `record` to the maestro. Must only be
/// called from actor context (i.e. where [`current_suspend`] is `Some`).
///
/// Returns normally on a plain resumption; unwinds via [`StopSignal`] if the
/// maestro delivered the stop signal instead.
pub(crate) fn yield_simcall(record: SimcallRecord) {
    let suspend =
        current_suspend().expect("yield_simcall called outside of actor context");
    match suspend.suspend(Yielded::Simcall(record)) {
        Resume::Run => {}
        Resume::Stop => panic::panic_any(StopSignal),
    }
}
