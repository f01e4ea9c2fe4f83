// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The monotone simulated clock, and the strongly-typed duration/time-point
//! pair that arithmetic against it is expressed in.
//!
//! Unlike a wall-clock `Instant`, [`TimePoint`] never advances on its own: it
//! only changes when the [`crate::kernel::Kernel`] fires the next entry of
//! the pending-event queue (step 5 of the maestro round).

use std::cell::Cell;
use std::cmp::Ordering;
use std::ops::{Add, AddAssign, Sub};

/// A duration of simulated time, in seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct Duration(f64);

impl Duration {
    pub const ZERO: Duration = Duration(0.0);

    #[must_use]
    pub fn from_secs_f64(secs: f64) -> Self {
        Duration(secs)
    }

    #[must_use]
    pub fn as_secs_f64(self) -> f64 {
        self.0
    }

    #[must_use]
    pub fn is_positive(self) -> bool {
        self.0 > 0.0
    }
}

impl PartialEq for Duration {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl PartialOrd for Duration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.0.partial_cmp(&other.0)
    }
}

impl Add for Duration {
    type Output = Duration;
    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0 + rhs.0)
    }
}

/// A point in simulated time: seconds elapsed since the start of the
/// simulation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimePoint(f64);

impl TimePoint {
    pub const ZERO: TimePoint = TimePoint(0.0);

    #[must_use]
    pub fn from_secs_f64(secs: f64) -> Self {
        TimePoint(secs)
    }

    #[must_use]
    pub fn as_secs_f64(self) -> f64 {
        self.0
    }
}

impl PartialEq for TimePoint {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

// Simulated time is a total order in practice: the clock is only ever set
// from values produced by this module's own arithmetic, so NaN never
// appears. We implement `Ord`/`Eq` on that assumption, which the
// pending-event queue's `BinaryHeap` relies on.
impl Eq for TimePoint {}
impl PartialOrd for TimePoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimePoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.partial_cmp(&other.0).expect("simulated time is NaN")
    }
}

impl Add<Duration> for TimePoint {
    type Output = TimePoint;
    fn add(self, rhs: Duration) -> TimePoint {
        TimePoint(self.0 + rhs.0)
    }
}

impl AddAssign<Duration> for TimePoint {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs.0;
    }
}

impl Sub for TimePoint {
    type Output = Duration;
    fn sub(self, rhs: TimePoint) -> Duration {
        Duration(self.0 - rhs.0)
    }
}

impl TimePoint {
    /// Like `-`, but clamped to `Duration::ZERO` if `earlier` is actually
    /// later than `self`, mirroring `std::time::Instant`'s method of the same
    /// name. Used to turn an absolute deadline into a relative timeout.
    #[must_use]
    pub fn saturating_duration_since(self, earlier: TimePoint) -> Duration {
        if self.0 <= earlier.0 {
            Duration::ZERO
        } else {
            self - earlier
        }
    }
}

/// The kernel's view of the current simulated instant.
///
/// Owned exclusively by the [`crate::kernel::Kernel`]; only advanced between
/// rounds, in step 5 of the maestro loop. A `Clock` handed out to actor code
/// only ever exposes `now()`.
#[derive(Debug, Default)]
pub struct Clock {
    now: Cell<TimePoint>,
}

impl Clock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Cell::new(TimePoint::ZERO),
        }
    }

    #[must_use]
    pub fn now(&self) -> TimePoint {
        self.now.get()
    }

    /// Advances the clock. Panics if `t` is in the past: the pending-event
    /// queue guarantees its minimum key is always `>= now()`.
    pub(crate) fn advance_to(&self, t: TimePoint) {
        assert!(
            t >= self.now.get(),
            "simulated clock must not move backwards"
        );
        self.now.set(t);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_arithmetic() {
        let t0 = TimePoint::from_secs_f64(1.0);
        let d = Duration::from_secs_f64(4.5);
        assert_eq!((t0 + d).as_secs_f64(), 5.5);
        assert_eq!((t0 + d) - t0, d);
    }

    #[test]
    fn clock_is_monotone() {
        let clock = Clock::new();
        assert_eq!(clock.now().as_secs_f64(), 0.0);
        clock.advance_to(TimePoint::from_secs_f64(3.0));
        assert_eq!(clock.now().as_secs_f64(), 3.0);
        clock.advance_to(TimePoint::from_secs_f64(3.0));
        assert_eq!(clock.now().as_secs_f64(), 3.0);
    }

    #[test]
    #[should_panic(expected = "must not move backwards")]
    fn clock_rejects_backwards_motion() {
        let clock = Clock::new();
        clock.advance_to(TimePoint::from_secs_f64(3.0));
        clock.advance_to(TimePoint::from_secs_f64(1.0));
    }
}
