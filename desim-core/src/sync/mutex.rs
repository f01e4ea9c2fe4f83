// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A simulated-time mutex (`spec.md` §4.6): acquiring it when it's held
//! parks the calling actor in simulated time, not wall-clock time.
//!
//! Every operation here is marshaled through [`crate::simcall::kernel_sync`]
//! or [`crate::simcall::run_immediate`] rather than touching the shared
//! `Rc<RefCell<MutexState>>` directly from actor code: that state is only
//! ever safe to mutate from the kernel-owning thread, and actor code's own
//! segments can run on a worker thread under
//! [`crate::kernel::ContextFactory::Parallel`].

use crate::actor::ActorId;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

struct MutexState {
    owner: Option<ActorId>,
    waiters: VecDeque<(ActorId, crate::future::KernelPromise<()>)>,
}

/// A handle to a simulated mutex. Cheap to clone; clones share the same
/// underlying lock.
#[derive(Clone)]
pub struct Mutex {
    state: Rc<RefCell<MutexState>>,
}

impl Mutex {
    /// Creates a new, unlocked mutex. Construction itself never touches the
    /// kernel — only `lock`/`try_lock`/`unlock` do — so this is callable from
    /// outside actor context, e.g. while building shared state to hand to
    /// several `kernel.spawn` closures.
    #[must_use]
    pub fn new() -> Self {
        Mutex {
            state: Rc::new(RefCell::new(MutexState {
                owner: None,
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Blocks the calling actor until it holds the lock, returning a guard
    /// that releases it on drop.
    pub fn lock(&self) -> MutexGuard {
        let actor = crate::context::current_actor().expect("Mutex::lock called outside actor context");
        let state = Rc::clone(&self.state);
        crate::simcall::kernel_sync(move |kernel| {
            let ready = kernel.ready_list();
            let (future, promise) = crate::future::channel::<()>(ready);
            let mut s = state.borrow_mut();
            if s.owner.is_none() {
                s.owner = Some(actor);
                drop(s);
                promise
                    .set_value(())
                    .expect("freshly created promise cannot already be satisfied");
            } else {
                s.waiters.push_back((actor, promise));
            }
            future
        })
        .expect("Mutex::lock's kernel future never resolves with an exception");
        MutexGuard {
            mutex: self.clone(),
        }
    }

    /// Non-blocking acquisition attempt. Never parks the calling actor.
    #[must_use]
    pub fn try_lock(&self) -> Option<MutexGuard> {
        let actor = crate::context::current_actor().expect("Mutex::try_lock called outside actor context");
        let state = Rc::clone(&self.state);
        let acquired = crate::simcall::run_immediate(move |_kernel| {
            let mut s = state.borrow_mut();
            if s.owner.is_none() {
                s.owner = Some(actor);
                true
            } else {
                false
            }
        });
        acquired.then(|| MutexGuard {
            mutex: self.clone(),
        })
    }

    fn unlock(&self) {
        let state = Rc::clone(&self.state);
        crate::simcall::run_immediate(move |_kernel| release(&state));
    }

    /// Releases ownership directly, without round-tripping through its own
    /// simcall. Used by [`crate::sync::condvar::Condvar::wait`] to fold a
    /// waiter's release into the same blocking simcall that enqueues it on
    /// the condition variable, so the two happen as one uninterrupted
    /// kernel-side step rather than two simcalls (possibly rounds) apart.
    pub(crate) fn release_without_simcall(&self) {
        release(&self.state);
    }
}

fn release(state: &Rc<RefCell<MutexState>>) {
    let mut s = state.borrow_mut();
    match s.waiters.pop_front() {
        Some((next_owner, promise)) => {
            s.owner = Some(next_owner);
            drop(s);
            promise
                .set_value(())
                .expect("freshly popped waiter's promise cannot already be satisfied");
        }
        None => s.owner = None,
    }
}

/// RAII guard releasing a [`Mutex`] when dropped.
pub struct MutexGuard {
    mutex: Mutex,
}

impl Drop for MutexGuard {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

impl MutexGuard {
    /// Returns a handle to the mutex this guard holds, e.g. to pass to a
    /// [`crate::sync::condvar::Condvar::wait`] call.
    #[must_use]
    pub fn mutex(&self) -> &Mutex {
        &self.mutex
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_mutex_is_unlocked() {
        let state = Mutex::new().state;
        assert!(state.borrow().owner.is_none());
    }
}
