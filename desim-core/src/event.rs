// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The pending-event queue (`spec.md` §3, §6): a time-ordered min-heap of
//! callbacks that advance the simulated clock when fired.
//!
//! This module is deliberately the only thing the kernel needs from an
//! "event source" (`spec.md` §6): schedule a callback at an absolute
//! simulated time, and cancel it by handle. The physical/network resource
//! models that `spec.md` §1 calls out of scope would sit on top of this as a
//! separate crate, producing their own completion times and driving this
//! same `schedule_at`/`cancel` pair.

use crate::clock::{Duration, TimePoint};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A handle to a scheduled event, usable to cancel it before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHandle(u64);

struct Entry {
    at: TimePoint,
    seq: u64,
    cancelled: bool,
    callback: Box<dyn FnOnce()>,
}

// Reverse order by (time, sequence) so the heap is a min-heap on both keys:
// earliest time first, and at equal times, the event inserted first fires
// first (spec.md's "deterministic, insertion-order tie-breaking").
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// The kernel's min-heap of future callbacks.
#[derive(Default)]
pub struct EventQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl EventQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `callback` to fire at `at`. Firing is idempotent if
    /// cancelled first: [`Self::cancel`] simply marks the entry so that when
    /// its turn comes up it is popped and discarded without running.
    pub fn schedule_at(&mut self, at: TimePoint, callback: Box<dyn FnOnce()>) -> EventHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            at,
            seq,
            cancelled: false,
            callback,
        });
        EventHandle(seq)
    }

    /// Cancels a previously scheduled event. No-op if it already fired or
    /// does not exist (e.g. a stale handle from a prior run).
    pub fn cancel(&mut self, handle: EventHandle) {
        // `BinaryHeap` has no O(log n) "cancel arbitrary element" operation,
        // so cancellation is represented as a tombstone: we rebuild the heap
        // with the matching entry marked. This runs in O(n), which is
        // acceptable for the rate of timeout/cancellation events a
        // simulation actually issues (cancellations are driven by actor
        // timeouts, not by every event).
        let mut rebuilt = BinaryHeap::with_capacity(self.heap.len());
        for mut entry in self.heap.drain() {
            if entry.seq == handle.0 {
                entry.cancelled = true;
            }
            rebuilt.push(entry);
        }
        self.heap = rebuilt;
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[must_use]
    pub fn peek_time(&self) -> Option<TimePoint> {
        self.heap.peek().map(|e| e.at)
    }

    /// Pops and returns the earliest non-cancelled callback together with
    /// its scheduled time, skipping any cancelled entries it encounters.
    pub fn pop(&mut self) -> Option<(TimePoint, Box<dyn FnOnce()>)> {
        loop {
            let entry = self.heap.pop()?;
            if entry.cancelled {
                continue;
            }
            return Some((entry.at, entry.callback));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn fires_in_time_then_insertion_order() {
        let mut q = EventQueue::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let push = |q: &mut EventQueue, order: &Rc<RefCell<Vec<i32>>>, at: f64, tag: i32| {
            let order = Rc::clone(order);
            q.schedule_at(TimePoint::from_secs_f64(at), Box::new(move || order.borrow_mut().push(tag)));
        };

        push(&mut q, &order, 5.0, 1);
        push(&mut q, &order, 1.0, 2);
        push(&mut q, &order, 1.0, 3);
        push(&mut q, &order, 3.0, 4);

        while let Some((_, cb)) = q.pop() {
            cb();
        }
        assert_eq!(*order.borrow(), vec![2, 3, 4, 1]);
    }

    #[test]
    fn cancelled_event_is_skipped() {
        let mut q = EventQueue::new();
        let fired = Rc::new(RefCell::new(false));
        let fired2 = Rc::clone(&fired);
        let handle = q.schedule_at(TimePoint::from_secs_f64(1.0), Box::new(move || *fired2.borrow_mut() = true));
        q.cancel(handle);
        assert!(q.pop().is_none());
        assert!(!*fired.borrow());
    }
}
