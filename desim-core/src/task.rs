// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Small helpers shared by the simcall boundary and the kernel future
//! machinery: a move-only callable wrapper, a value-or-exception holder, and
//! glue to transport a closure's outcome into a promise-shaped sink.

use crate::error::SimError;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

/// A type-erased, move-only, run-exactly-once callable.
///
/// This is the closure embedded in a [`crate::simcall::SimcallRecord`]: the
/// kernel owns it and runs it exactly once in maestro context. `FnOnce` boxes
/// already have these semantics; this alias just gives the concept a name
/// that matches the vocabulary of `spec.md` §4.4 ("a pointer to a type-erased
/// nullary closure").
pub type BoxedTask = Box<dyn FnOnce(&mut crate::kernel::Kernel)>;

/// A single slot holding either a value or an exception, set exactly once and
/// consumed exactly once.
///
/// This is distinct from the kernel future/promise pair in [`crate::future`]:
/// it has no continuation, no scheduling, and is meant to transport the
/// outcome of a single [`crate::simcall::run_immediate`] call back to the
/// actor that issued it, across exactly one context switch.
pub struct Outcome<T>(Rc<RefCell<Option<Result<T, SimError>>>>);

impl<T> Clone for Outcome<T> {
    fn clone(&self) -> Self {
        Outcome(Rc::clone(&self.0))
    }
}

impl<T> Default for Outcome<T> {
    fn default() -> Self {
        Outcome(Rc::new(RefCell::new(None)))
    }
}

impl<T> Outcome<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fills the slot. Intended to be called exactly once; a second call
    /// silently overwrites, since (unlike promises) nothing downstream
    /// depends on `already_satisfied` semantics for this transport-only type.
    pub fn fill(&self, result: Result<T, SimError>) {
        *self.0.borrow_mut() = Some(result);
    }

    /// Runs `f`, capturing a panic as a [`SimError::Fatal`] instead of
    /// unwinding into the kernel, and stores the outcome.
    pub fn fill_with(&self, f: impl FnOnce() -> Result<T, SimError>) {
        let result = panic::catch_unwind(AssertUnwindSafe(f))
            .unwrap_or_else(|payload| Err(SimError::fatal(panic_message(&payload))));
        self.fill(result);
    }

    /// Consumes the slot. Panics if it was never filled: that would mean the
    /// issuing actor resumed before its simcall closure ran, which is a
    /// scheduler bug.
    #[must_use]
    pub fn take(&self) -> Result<T, SimError> {
        self.0
            .borrow_mut()
            .take()
            .expect("Outcome consumed before it was filled")
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "actor code panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_round_trip() {
        let outcome: Outcome<i32> = Outcome::new();
        outcome.fill(Ok(42));
        assert_eq!(outcome.take().unwrap(), 42);
    }

    #[test]
    fn outcome_captures_panics_as_fatal() {
        let outcome: Outcome<i32> = Outcome::new();
        outcome.fill_with(|| panic!("boom"));
        match outcome.take() {
            Err(SimError::Fatal { detail, .. }) => assert_eq!(detail, "boom"),
            other => panic!("expected Fatal, got {other:?}"),
        }
    }
}
