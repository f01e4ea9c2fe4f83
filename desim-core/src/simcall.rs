// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The simcall boundary (`spec.md` §4.4): the only path by which actor code
//! reaches the kernel.
//!
//! Every [`crate::actor::ActorHandle`] method bottoms out in either
//! [`run_immediate`] (single round-trip, result ready before the actor
//! resumes) or [`kernel_sync`]/[`kernel_async`] (the operation produces a
//! [`crate::future::KernelFuture`] that may take arbitrarily many rounds to
//! resolve). All three marshal the actor's request as a type-erased
//! [`crate::task::BoxedTask`] and hand it to the maestro via
//! [`crate::context::yield_simcall`] — except when there is no fiber to yield
//! from at all (actor-handle code invoked from maestro-level setup, e.g. the
//! initial population of actors before the first round), in which case
//! [`with_current_kernel`] lets the call reach the kernel directly.

use crate::actor::ActorId;
use crate::error::SimError;
use crate::future::KernelFuture;
use crate::kernel::Kernel;
use crate::task::{BoxedTask, Outcome};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// What an actor fiber yields across [`fiber::Suspend::suspend`]: always a
/// simcall, since that is the only reason actor code ever gives up control.
pub(crate) enum Yielded {
    Simcall(SimcallRecord),
}

/// Whether the maestro should resume the issuing actor as soon as the
/// simcall's task has run (`Immediate`), or leave it parked until something
/// else wakes it (`Blocking`, `spec.md` §4.4's "blocking simcall").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SimcallKind {
    Immediate,
    Blocking,
}

/// A single simcall crossing the actor/kernel boundary.
pub(crate) struct SimcallRecord {
    pub actor: ActorId,
    pub kind: SimcallKind,
    pub task: BoxedTask,
}

thread_local! {
    static CURRENT_KERNEL: Cell<*mut Kernel> = const { Cell::new(std::ptr::null_mut()) };
}

/// Runs `f` with a mutable reference to whichever [`Kernel`] is presently
/// executing on this OS thread. Panics if called with no kernel entered
/// (i.e. outside [`enter_kernel`]'s dynamic extent) — a bug in this crate,
/// never something actor code can trigger on its own.
pub(crate) fn with_current_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    CURRENT_KERNEL.with(|cell| {
        let ptr = cell.get();
        assert!(!ptr.is_null(), "no kernel is currently executing on this thread");
        // Safety: `ptr` was set by `enter_kernel` to a pointer derived from a
        // live `&mut Kernel` and is only ever read back while that call is
        // still on the stack (nested `enter_kernel` calls save/restore the
        // previous value), so this is never aliased and never dangling.
        let kernel = unsafe { &mut *ptr };
        f(kernel)
    })
}

/// Marks `kernel` as the one reachable via [`with_current_kernel`] for the
/// duration of `f`. Re-entrant: nested calls (e.g. a ready-list continuation
/// that itself drains more of the ready list) save and restore the previous
/// pointer rather than clobbering it.
pub(crate) fn enter_kernel<R>(kernel: &mut Kernel, f: impl FnOnce() -> R) -> R {
    CURRENT_KERNEL.with(|cell| {
        let prev = cell.get();
        cell.set(std::ptr::from_mut(kernel));
        let result = f();
        cell.set(prev);
        result
    })
}

/// Runs `f` against the kernel and returns its value, round-tripping through
/// exactly one simcall if called from actor context.
pub fn run_immediate<R, F>(f: F) -> R
where
    F: FnOnce(&mut Kernel) -> R + 'static,
    R: 'static,
{
    match crate::context::current_suspend() {
        Some(_) => {
            let actor = crate::context::current_actor()
                .expect("actor fiber active but no current actor id recorded");
            let outcome: Outcome<R> = Outcome::new();
            let slot = outcome.clone();
            let task: BoxedTask = Box::new(move |kernel| slot.fill_with(|| Ok(f(kernel))));
            crate::context::yield_simcall(SimcallRecord {
                actor,
                kind: SimcallKind::Immediate,
                task,
            });
            // An `Immediate` simcall's task always runs, and the actor is
            // never resumed until after it has, so this never panics.
            outcome
                .take()
                .unwrap_or_else(|err| unreachable!("run_immediate task reported an error: {err}"))
        }
        None => with_current_kernel(f),
    }
}

/// Runs `f` to obtain a kernel future, and blocks the calling actor until it
/// resolves (`spec.md` §4.4's synchronous actor-facing API built atop the
/// kernel's continuation-based futures).
pub fn kernel_sync<T, F>(f: F) -> Result<T, SimError>
where
    F: FnOnce(&mut Kernel) -> KernelFuture<T> + 'static,
    T: 'static,
{
    let actor = crate::context::current_actor().expect("kernel_sync called outside actor context");
    let outcome: Outcome<T> = Outcome::new();
    let slot = outcome.clone();
    let task: BoxedTask = Box::new(move |kernel| {
        let future = f(kernel);
        future.then_void(move |fut| {
            slot.fill(fut.get());
            with_current_kernel(|kernel| kernel.wake_actor(actor));
        });
    });
    crate::context::yield_simcall(SimcallRecord {
        actor,
        kind: SimcallKind::Blocking,
        task,
    });
    outcome.take()
}

/// A parked `wait`/`wait_for` call on an [`ActorFutureHandle`]. `claimed`
/// coordinates the underlying kernel operation's completion against a
/// `wait_for` timeout, the same way [`crate::sync::condvar::Condvar`]'s
/// waiters do: whichever settles the slot first wins, the other is a no-op.
struct Waiter<T> {
    actor: ActorId,
    slot: Outcome<T>,
    claimed: Option<Rc<Cell<bool>>>,
}

struct ActorFutureState<T> {
    result: Option<Result<T, SimError>>,
    waiter: Option<Waiter<T>>,
}

/// Shared state backing a [`crate::actor_future::ActorFuture`], defined here
/// (rather than in `actor_future.rs`) since only this module constructs it
/// and only this module needs to reach into the simcall machinery to park a
/// waiting actor.
pub(crate) struct ActorFutureHandle<T> {
    state: Rc<RefCell<ActorFutureState<T>>>,
}

impl<T> Clone for ActorFutureHandle<T> {
    fn clone(&self) -> Self {
        ActorFutureHandle {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: 'static> ActorFutureHandle<T> {
    /// Blocks the calling actor until this handle's value is available,
    /// via a `Blocking` simcall that either picks up an already-stored
    /// result or registers itself as the waiter to be woken later.
    pub(crate) fn wait(&self) -> Result<T, SimError> {
        let actor = crate::context::current_actor().expect("ActorFuture::wait called outside actor context");
        let outcome: Outcome<T> = Outcome::new();
        let slot = outcome.clone();
        let state = Rc::clone(&self.state);
        let task: BoxedTask = Box::new(move |kernel| {
            let already = state.borrow_mut().result.take();
            match already {
                Some(result) => {
                    slot.fill(result);
                    kernel.wake_actor(actor);
                }
                None => {
                    state.borrow_mut().waiter = Some(Waiter { actor, slot, claimed: None });
                }
            }
        });
        crate::context::yield_simcall(SimcallRecord {
            actor,
            kind: SimcallKind::Blocking,
            task,
        });
        outcome.take()
    }

    /// Like [`Self::wait`], but gives up and resolves with
    /// [`SimError::Timeout`] if the underlying operation has not completed
    /// within `duration` (`spec.md` §4.5's `wait_for`/`wait_until`).
    pub(crate) fn wait_for(&self, duration: crate::clock::Duration) -> Result<T, SimError> {
        let actor = crate::context::current_actor().expect("ActorFuture::wait_for called outside actor context");
        let outcome: Outcome<T> = Outcome::new();
        let slot = outcome.clone();
        let state = Rc::clone(&self.state);
        let task: BoxedTask = Box::new(move |kernel| {
            let already = state.borrow_mut().result.take();
            if let Some(result) = already {
                slot.fill(result);
                kernel.wake_actor(actor);
                return;
            }

            let claimed = Rc::new(Cell::new(false));
            state.borrow_mut().waiter = Some(Waiter {
                actor,
                slot: slot.clone(),
                claimed: Some(Rc::clone(&claimed)),
            });

            let at = kernel.now() + duration;
            let state_for_timeout = Rc::clone(&state);
            let slot_for_timeout = slot.clone();
            kernel.events_mut().schedule_at(
                at,
                Box::new(move || {
                    if claimed.get() {
                        return;
                    }
                    claimed.set(true);
                    state_for_timeout.borrow_mut().waiter = None;
                    slot_for_timeout.fill(Err(SimError::Timeout));
                    with_current_kernel(|kernel| kernel.wake_actor(actor));
                }),
            );
        });
        crate::context::yield_simcall(SimcallRecord {
            actor,
            kind: SimcallKind::Blocking,
            task,
        });
        outcome.take()
    }

    #[must_use]
    pub(crate) fn is_ready(&self) -> bool {
        self.state.borrow().result.is_some()
    }
}

/// Runs `f` to obtain a kernel future and returns immediately with a handle
/// to its eventual result, never parking the calling actor.
pub(crate) fn kernel_async<T, F>(f: F) -> crate::actor_future::ActorFuture<T>
where
    F: FnOnce(&mut Kernel) -> KernelFuture<T> + 'static,
    T: 'static,
{
    let state = Rc::new(RefCell::new(ActorFutureState {
        result: None,
        waiter: None,
    }));
    let state_for_resolution = Rc::clone(&state);
    run_immediate(move |kernel| {
        let future = f(kernel);
        future.then_void(move |fut| {
            let result = fut.get();
            let waiter = state_for_resolution.borrow_mut().waiter.take();
            match waiter {
                Some(waiter) => {
                    let already_claimed = waiter.claimed.as_ref().is_some_and(|c| c.get());
                    if !already_claimed {
                        if let Some(claimed) = &waiter.claimed {
                            claimed.set(true);
                        }
                        waiter.slot.fill(result);
                        with_current_kernel(|kernel| kernel.wake_actor(waiter.actor));
                    }
                }
                None => {
                    state_for_resolution.borrow_mut().result = Some(result);
                }
            }
        });
    });
    crate::actor_future::ActorFuture::new(ActorFutureHandle { state })
}
