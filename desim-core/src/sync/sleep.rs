// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Parking an actor for a span of simulated time (`spec.md` §4.6), built
//! directly on the kernel's pending-event queue rather than its own
//! machinery: a sleep is just an event scheduled to resolve a kernel future.

use crate::clock::{Duration, TimePoint};

pub(crate) fn sleep_for(duration: Duration) {
    sleep_until_computed(move |now| now + duration);
}

pub(crate) fn sleep_until(at: TimePoint) {
    sleep_until_computed(move |_now| at);
}

fn sleep_until_computed(compute_at: impl FnOnce(TimePoint) -> TimePoint + 'static) {
    crate::simcall::kernel_sync(move |kernel| {
        let now = kernel.clock.now();
        let at = compute_at(now);
        let ready = kernel.ready_list();
        let (future, promise) = crate::future::channel::<()>(ready);
        if at <= now {
            promise
                .set_value(())
                .expect("freshly created promise cannot already be satisfied");
        } else {
            kernel.events_mut().schedule_at(
                at,
                Box::new(move || {
                    let _ = promise.set_value(());
                }),
            );
        }
        future
    })
    .expect("sleep's kernel future never resolves with an exception");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;

    #[test]
    fn sleep_target_time_accounts_for_now() {
        let clock = Clock::new();
        clock.advance_to(TimePoint::from_secs_f64(2.0));
        let at = clock.now() + Duration::from_secs_f64(3.0);
        assert_eq!(at.as_secs_f64(), 5.0);
    }
}
