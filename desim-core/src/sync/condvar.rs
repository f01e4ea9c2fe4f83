// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A simulated-time condition variable (`spec.md` §4.6), paired with
//! [`crate::sync::mutex::Mutex`] the same way `std::sync::Condvar` pairs with
//! `std::sync::Mutex`.

use crate::actor::ActorId;
use crate::clock::Duration;
use crate::sync::mutex::MutexGuard;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// One parked `wait`/`wait_for` call. `claimed` coordinates the two events
/// that can resolve it — a `notify_*` call and, for `wait_for`, its timeout —
/// so whichever happens first wins and the other is a no-op (`spec.md` §4.5's
/// "cancelled via a one-shot flag in the captured state").
struct Waiter {
    actor: ActorId,
    claimed: Rc<Cell<bool>>,
    slot: Rc<RefCell<Option<crate::future::KernelPromise<bool>>>>,
}

struct CondvarState {
    waiters: VecDeque<Waiter>,
}

/// Outcome of [`Condvar::wait_for`], mirroring `std::sync::WaitTimeoutResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimeoutResult(bool);

impl WaitTimeoutResult {
    #[must_use]
    pub fn timed_out(self) -> bool {
        self.0
    }
}

/// A handle to a simulated condition variable. Cheap to clone; clones share
/// the same waiter queue.
#[derive(Clone)]
pub struct Condvar {
    state: Rc<RefCell<CondvarState>>,
}

impl Condvar {
    /// Creates a new condition variable with no waiters. Construction never
    /// touches the kernel, so this is callable outside actor context.
    #[must_use]
    pub fn new() -> Self {
        Condvar {
            state: Rc::new(RefCell::new(CondvarState {
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Releases `guard`'s mutex, parks until notified, then re-acquires it
    /// and returns the new guard — the classic wait-releases-and-reacquires
    /// contract, just in simulated time.
    pub fn wait(&self, guard: MutexGuard) -> MutexGuard {
        self.wait_internal(guard, None).0
    }

    /// Like [`Self::wait`], but also schedules a timeout. Returns with the
    /// mutex re-acquired either way; the result says which happened first.
    pub fn wait_for(&self, guard: MutexGuard, timeout: Duration) -> (MutexGuard, WaitTimeoutResult) {
        self.wait_internal(guard, Some(timeout))
    }

    fn wait_internal(&self, guard: MutexGuard, timeout: Option<Duration>) -> (MutexGuard, WaitTimeoutResult) {
        let mutex = guard.mutex().clone();
        let mutex_for_task = mutex.clone();
        // The release is folded into the blocking simcall below instead of
        // happening here via the guard's own `Drop`: dropping it now would
        // make the release and the enqueue two separate simcalls (routing
        // through a whole extra round for the release alone), leaving a
        // window where a `notify_one`/`notify_all` dispatched in between
        // finds this actor not yet registered and the wakeup is lost. One
        // blocking simcall enqueues the waiter and only then releases the
        // mutex, so nothing can observe the mutex as free without this
        // actor already on the waiter queue.
        std::mem::forget(guard);

        let actor = crate::context::current_actor().expect("Condvar::wait called outside actor context");
        let state = Rc::clone(&self.state);
        let timed_out = crate::simcall::kernel_sync(move |kernel| {
            let ready = kernel.ready_list();
            let (future, promise) = crate::future::channel::<bool>(ready);
            let slot = Rc::new(RefCell::new(Some(promise)));
            let claimed = Rc::new(Cell::new(false));
            state.borrow_mut().waiters.push_back(Waiter {
                actor,
                claimed: Rc::clone(&claimed),
                slot: Rc::clone(&slot),
            });

            if let Some(duration) = timeout {
                let at = kernel.now() + duration;
                let state_for_timeout = Rc::clone(&state);
                kernel.events_mut().schedule_at(
                    at,
                    Box::new(move || {
                        if claimed.get() {
                            return;
                        }
                        claimed.set(true);
                        state_for_timeout.borrow_mut().waiters.retain(|w| !Rc::ptr_eq(&w.claimed, &claimed));
                        if let Some(promise) = slot.borrow_mut().take() {
                            let _ = promise.set_value(true);
                        }
                    }),
                );
            }

            mutex_for_task.release_without_simcall();
            future
        })
        .expect("Condvar::wait's kernel future never resolves with an exception");

        (mutex.lock(), WaitTimeoutResult(timed_out))
    }

    /// Wakes the longest-waiting actor, if any.
    pub fn notify_one(&self) {
        let state = Rc::clone(&self.state);
        crate::simcall::run_immediate(move |_kernel| {
            if let Some(w) = state.borrow_mut().waiters.pop_front() {
                w.claimed.set(true);
                if let Some(promise) = w.slot.borrow_mut().take() {
                    let _ = promise.set_value(false);
                }
            }
        });
    }

    /// Wakes every waiting actor.
    pub fn notify_all(&self) {
        let state = Rc::clone(&self.state);
        crate::simcall::run_immediate(move |_kernel| {
            let waiters = std::mem::take(&mut state.borrow_mut().waiters);
            for w in waiters {
                w.claimed.set(true);
                if let Some(promise) = w.slot.borrow_mut().take() {
                    let _ = promise.set_value(false);
                }
            }
        });
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}
