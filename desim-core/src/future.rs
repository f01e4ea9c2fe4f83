// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The kernel-side, continuation-based future/promise pair (`spec.md` §4.2).
//!
//! These futures never block. They are only ever touched from maestro
//! context, which is why the shared state is `Rc<RefCell<_>>` rather than
//! `Arc<Mutex<_>>`: the whole point of the single-threaded cooperative
//! discipline (`spec.md` §5) is that nothing here is ever touched from two
//! threads at once, so a thread-safe wrapper would only hide that invariant
//! behind needless atomics.

use crate::error::SimError;
use crate::ready::ReadyList;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    NotReady,
    Ready,
    Done,
}

struct Inner<T> {
    status: Status,
    value: Option<T>,
    exception: Option<SimError>,
    continuation: Option<Box<dyn FnOnce()>>,
}

impl<T> Inner<T> {
    fn new() -> Self {
        Inner {
            status: Status::NotReady,
            value: None,
            exception: None,
            continuation: None,
        }
    }
}

/// A single-use handle to a future result.
///
/// `get()` consumes it; `then()` moves its state into the continuation chain
/// and the original handle is dropped. There is no `Clone` impl: the spec
/// requires the handle itself be single-use even though the underlying state
/// is reference-counted between the future and its promise.
pub struct KernelFuture<T> {
    inner: Option<Rc<RefCell<Inner<T>>>>,
    ready: ReadyList,
}

/// The writing half of a kernel future/promise pair.
pub struct KernelPromise<T> {
    inner: Rc<RefCell<Inner<T>>>,
    ready: ReadyList,
    future_taken: bool,
}

/// Creates a fresh, unsatisfied future/promise pair sharing `ready` as the
/// kernel's ready list (continuations attached to the future are scheduled
/// there rather than called inline, per the scheduling rule in `spec.md`
/// §4.2).
#[must_use]
pub fn channel<T>(ready: ReadyList) -> (KernelFuture<T>, KernelPromise<T>) {
    let inner = Rc::new(RefCell::new(Inner::new()));
    (
        KernelFuture {
            inner: Some(Rc::clone(&inner)),
            ready: ready.clone(),
        },
        KernelPromise {
            inner,
            ready,
            future_taken: false,
        },
    )
}

impl<T> KernelFuture<T> {
    #[must_use]
    pub fn valid(&self) -> bool {
        self.inner.is_some()
    }

    /// Non-blocking inspection: has the promise been satisfied?
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.borrow().status != Status::NotReady)
    }

    /// Returns the value, or rethrows the stored exception.
    ///
    /// Fails with [`SimError::NoState`] if the handle is invalid, or
    /// [`SimError::Deadlock`] if the future is not yet ready. Never blocks;
    /// restricted to kernel context by construction (there is no actor-side
    /// API that returns a `KernelFuture`).
    pub fn get(mut self) -> Result<T, SimError> {
        let Some(inner) = self.inner.take() else {
            return Err(SimError::NoState);
        };
        let mut guard = inner.borrow_mut();
        match guard.status {
            Status::NotReady => Err(SimError::Deadlock),
            Status::Ready | Status::Done => {
                guard.status = Status::Done;
                if let Some(value) = guard.value.take() {
                    Ok(value)
                } else {
                    Err(guard.exception.take().expect(
                        "future is ready but has neither a value nor an exception stored",
                    ))
                }
            }
        }
    }

    /// Attaches a continuation, returning a new future for its result.
    ///
    /// The continuation always receives the future itself, not the unwrapped
    /// value, so it can observe an exception via `get()`. It is **never**
    /// called inline: if the state is already ready, it is scheduled onto the
    /// ready list as part of the current or next event-processing step.
    pub fn then<R>(mut self, f: impl FnOnce(KernelFuture<T>) -> R + 'static) -> KernelFuture<R>
    where
        T: 'static,
        R: 'static,
    {
        let inner = self.inner.take().expect("then() called on an invalid future");
        let ready = self.ready.clone();
        let (next_future, next_promise) = channel::<R>(ready.clone());

        let run = {
            let inner = Rc::clone(&inner);
            let ready_for_chain = ready.clone();
            move || {
                let future = KernelFuture {
                    inner: Some(inner),
                    ready: ready_for_chain,
                };
                let result = panic::catch_unwind(AssertUnwindSafe(|| f(future)));
                match result {
                    Ok(value) => next_promise.set_value(value),
                    Err(payload) => {
                        let _ = next_promise.set_exception(SimError::fatal(panic_payload_msg(&payload)));
                    }
                }
            }
        };

        attach_or_schedule(&inner, &ready, Box::new(run));
        next_future
    }

    /// Like [`Self::then`] but discards the result and does not allocate a
    /// new future: the cheaper chain terminator used when nothing downstream
    /// cares about the outcome.
    pub fn then_void(mut self, f: impl FnOnce(KernelFuture<T>) + 'static)
    where
        T: 'static,
    {
        let inner = self.inner.take().expect("then_void() called on an invalid future");
        let ready = self.ready.clone();
        let run = {
            let inner = Rc::clone(&inner);
            let ready_for_chain = ready.clone();
            move || {
                let future = KernelFuture {
                    inner: Some(inner),
                    ready: ready_for_chain,
                };
                let _ = panic::catch_unwind(AssertUnwindSafe(|| f(future)));
            }
        };
        attach_or_schedule(&inner, &ready, Box::new(run));
    }
}

fn attach_or_schedule<T>(inner: &Rc<RefCell<Inner<T>>>, ready: &ReadyList, run: Box<dyn FnOnce()>) {
    let mut guard = inner.borrow_mut();
    if guard.status == Status::NotReady {
        guard.continuation = Some(run);
    } else {
        drop(guard);
        ready.push(run);
    }
}

fn panic_payload_msg(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "continuation panicked".to_string()
    }
}

impl<T> KernelPromise<T> {
    /// Returns the paired future. Callable at most once; a second call
    /// panics, mirroring the "single-use future handle" design note.
    pub fn get_future(&mut self) -> KernelFuture<T> {
        assert!(!self.future_taken, "get_future() called twice on the same promise");
        self.future_taken = true;
        KernelFuture {
            inner: Some(Rc::clone(&self.inner)),
            ready: self.ready.clone(),
        }
    }

    /// Satisfies the future with `value`. Fails with
    /// [`SimError::AlreadySatisfied`] if the promise was already set.
    pub fn set_value(self, value: T) -> Result<(), SimError> {
        self.satisfy(Ok(value))
    }

    /// Satisfies the future with an exception, to be rethrown by `get()`.
    pub fn set_exception(self, exception: SimError) -> Result<(), SimError> {
        self.satisfy(Err(exception))
    }

    fn satisfy(self, outcome: Result<T, SimError>) -> Result<(), SimError> {
        let mut guard = self.inner.borrow_mut();
        if guard.status != Status::NotReady {
            return Err(SimError::AlreadySatisfied);
        }
        match outcome {
            Ok(value) => guard.value = Some(value),
            Err(exception) => guard.exception = Some(exception),
        }
        guard.status = Status::Ready;
        // The scheduling rule: never invoke the continuation here. Move it
        // onto the ready list so the scheduler's drain step calls it between
        // well-defined rounds.
        if let Some(continuation) = guard.continuation.take() {
            drop(guard);
            self.ready.push(continuation);
        }
        Ok(())
    }
}

impl<T> Drop for KernelPromise<T> {
    fn drop(&mut self) {
        if !self.future_taken {
            return;
        }
        let mut guard = self.inner.borrow_mut();
        if guard.status == Status::NotReady {
            guard.status = Status::Ready;
            guard.exception = Some(SimError::NoState);
            if let Some(continuation) = guard.continuation.take() {
                drop(guard);
                self.ready.push(continuation);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn value_round_trip() {
        let ready = ReadyList::new();
        let (future, promise) = channel::<i32>(ready);
        promise.set_value(7).unwrap();
        assert_eq!(future.get().unwrap(), 7);
    }

    #[test]
    fn exception_round_trip() {
        let ready = ReadyList::new();
        let (future, promise) = channel::<i32>(ready);
        promise.set_exception(SimError::Timeout).unwrap();
        match future.get() {
            Err(SimError::Timeout) => {}
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[test]
    fn double_satisfy_fails() {
        let ready = ReadyList::new();
        let (_future, promise) = channel::<i32>(ready);
        let promise2_inner = Rc::clone(&promise.inner);
        let ready2 = promise.ready.clone();
        promise.set_value(1).unwrap();

        let stray_promise = KernelPromise {
            inner: promise2_inner,
            ready: ready2,
            future_taken: true,
        };
        assert!(matches!(
            stray_promise.set_value(2),
            Err(SimError::AlreadySatisfied)
        ));
    }

    #[test]
    fn continuation_never_runs_inline() {
        let ready = ReadyList::new();
        let (future, promise) = channel::<i32>(ready.clone());
        let ran = Rc::new(Cell::new(false));
        let ran_clone = Rc::clone(&ran);
        future.then_void(move |f| {
            ran_clone.set(true);
            assert_eq!(f.get().unwrap(), 9);
        });

        promise.set_value(9).unwrap();
        // Not run yet: satisfying the promise only enqueues it.
        assert!(!ran.get());
        ready.drain();
        assert!(ran.get());
    }

    #[test]
    fn then_schedules_even_if_already_ready() {
        let ready = ReadyList::new();
        let (future, promise) = channel::<i32>(ready.clone());
        promise.set_value(1).unwrap();

        let ran = Rc::new(Cell::new(false));
        let ran_clone = Rc::clone(&ran);
        future.then_void(move |f| {
            ran_clone.set(true);
            assert_eq!(f.get().unwrap(), 1);
        });
        assert!(!ran.get(), "continuation must not run inline from then()");
        ready.drain();
        assert!(ran.get());
    }

    #[test]
    fn fan_out_two_chains_see_independent_results() {
        let ready = ReadyList::new();
        let (future, promise) = channel::<i32>(ready.clone());
        let shared = Rc::new(RefCell::new(Vec::new()));

        let (f1, f2) = {
            let run = |n: i32| {
                let shared = Rc::clone(&shared);
                move |f: KernelFuture<i32>| {
                    let v = f.get().unwrap();
                    shared.borrow_mut().push((n, v));
                    v * n
                }
            };
            (future.then(run(2)), {
                // second independent chain needs its own future; build it
                // from a second promise sharing the same ready list.
                let (future2, promise2) = channel::<i32>(ready.clone());
                promise2.set_value(21).unwrap();
                future2.then(run(3))
            })
        };

        promise.set_value(21).unwrap();
        ready.drain();

        assert_eq!(f1.get().unwrap(), 42);
        assert_eq!(f2.get().unwrap(), 63);
        assert_eq!(*shared.borrow(), vec![(3, 21), (2, 21)]);
    }
}
