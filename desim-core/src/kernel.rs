// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The maestro: the single-threaded (or, with [`ContextFactory::Parallel`],
//! bounded-parallel) scheduling loop described in `spec.md` §4.3.
//!
//! Each round:
//!   1. Drain the ready list (kernel future continuations scheduled since
//!      the last round).
//!   2. Resume every runnable actor via the active [`ContextFactory`].
//!   3. Dispatch the simcalls that resumption yielded, which may mark more
//!      actors runnable or blocked.
//!   4. Repeat 1-3 until no actor is runnable and the ready list is empty.
//!   5. If the pending-event queue is non-empty, pop its earliest entry, run
//!      it, and advance the clock to its time; otherwise the run is either
//!      finished (no actors left alive) or deadlocked (actors remain, all
//!      blocked, with nothing left to wake them).

use crate::actor::{Actor, ActorHandle, ActorId, ActorState};
use crate::clock::{Clock, TimePoint};
use crate::context::{ActorContext, ActorOutcome, Resume};
use crate::event::EventQueue;
use crate::ready::ReadyList;
use crate::simcall::{SimcallKind, SimcallRecord, Yielded};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace, warn};

/// How the kernel resumes a batch of runnable actors each round.
pub enum ContextFactory {
    /// Resume actors one at a time, in batch order, on the calling thread.
    Serial,
    /// Partition the batch across `worker_count` scoped threads. Sound only
    /// because each worker touches a disjoint subset of the batch and the
    /// scope fully joins before the next round begins (see the safety
    /// comment on `unsafe impl Send for ActorContext`).
    Parallel { worker_count: usize },
}

impl Default for ContextFactory {
    fn default() -> Self {
        ContextFactory::Serial
    }
}

enum StepOutcome {
    Simcall(SimcallRecord),
    Finished,
    Stopped,
    Panicked(String),
}

// Safety: a `SimcallRecord`'s boxed task closure typically captures `Rc`-based
// shared state (mutex/condvar/future internals), making it `!Send` by the
// compiler's conservative analysis. `resume_batch_parallel` constructs one on
// a worker thread and returns it as part of that worker's `thread::scope`
// result, which requires `Send`. This is sound: the record is built and
// handed back across the scope's join — a happens-before edge — without ever
// being touched from two threads at once, and it is only ever executed
// afterwards on the single OS thread that owns the `Kernel` (`dispatch_simcall`,
// always called from `process_round`, never from a worker). No `Rc` clone of
// the captured state survives on the worker thread past the point the record
// is handed back.
unsafe impl Send for StepOutcome {}

/// Whether a round needs to run again immediately, has settled (nothing
/// runnable, ready list empty), or uncovered a fatal actor panic that aborts
/// the whole run.
enum RoundOutcome {
    Continue,
    Settled,
    Panicked { actor: ActorId, detail: String },
}

fn resume_one(actor: &mut Actor, input: Resume) -> StepOutcome {
    match actor.context.resume(input) {
        fiber::FiberResult::Yield(Yielded::Simcall(record)) => StepOutcome::Simcall(record),
        fiber::FiberResult::Return(ActorOutcome::Finished) => StepOutcome::Finished,
        fiber::FiberResult::Return(ActorOutcome::Stopped) => StepOutcome::Stopped,
        fiber::FiberResult::Return(ActorOutcome::Panicked(msg)) => StepOutcome::Panicked(msg),
    }
}

struct SendPtr<T>(*mut T);
// Safety: see `ContextFactory::Parallel` and the safety comment on
// `unsafe impl Send for ActorContext` in `context.rs` — the pointers this
// wraps are always disjoint across the threads that receive them, and never
// outlive the `std::thread::scope` call that created them.
unsafe impl<T> Send for SendPtr<T> {}
// Safety: a `SendPtr` is only ever read (the raw pointer value is copied,
// never the pointee), so sharing `&SendPtr<T>` across the worker threads that
// borrow a chunk of `ptrs` is sound regardless of `T`; only one worker ever
// dereferences any given pointer, per the disjointness argument above.
unsafe impl<T> Sync for SendPtr<T> {}

/// The discrete-event simulation kernel: owns every actor, the pending-event
/// queue, the simulated clock, and the ready list their kernel futures
/// schedule continuations onto.
pub struct Kernel {
    pub(crate) clock: Clock,
    actors: HashMap<ActorId, Actor>,
    runnable: VecDeque<ActorId>,
    ready: ReadyList,
    events: EventQueue,
    context_factory: ContextFactory,
}

/// How a run ended, per `spec.md` §4.3's termination conditions and §7's
/// "a user exception escaping actor code ... is fatal".
#[derive(Debug)]
pub enum RunOutcome {
    /// Every actor ran to completion (or was stopped) and no events remain.
    Finished,
    /// Actors remain, none are runnable, and the pending-event queue is
    /// empty: nothing in the simulation could ever make progress again.
    Deadlocked { blocked: Vec<ActorId> },
    /// An actor's code panicked with something other than the stop signal.
    /// The whole run aborts at the point of discovery rather than silently
    /// dropping the offending actor and continuing.
    Panicked { actor: ActorId, detail: String },
}

impl Kernel {
    #[must_use]
    pub fn new() -> Self {
        Self::with_context_factory(ContextFactory::Serial)
    }

    #[must_use]
    pub fn with_context_factory(context_factory: ContextFactory) -> Self {
        Kernel {
            clock: Clock::new(),
            actors: HashMap::new(),
            runnable: VecDeque::new(),
            ready: ReadyList::new(),
            events: EventQueue::new(),
            context_factory,
        }
    }

    #[must_use]
    pub fn now(&self) -> TimePoint {
        self.clock.now()
    }

    #[must_use]
    pub fn ready_list(&self) -> ReadyList {
        self.ready.clone()
    }

    /// Direct access to the pending-event queue (`spec.md` §6's event-source
    /// boundary): `schedule_at`/`cancel` are the two operations a
    /// hand-written `kernel_sync`/`kernel_async` closure needs to build its
    /// own kernel future atop a timer, the way [`crate::sync::sleep`] and the
    /// condition variable's timeout do internally.
    #[must_use]
    pub fn events_mut(&mut self) -> &mut EventQueue {
        &mut self.events
    }

    /// Spawns a new actor that will run `code` (handed an [`ActorHandle`] for
    /// itself) starting from the next round.
    pub fn spawn(&mut self, code: impl FnOnce(ActorHandle) + 'static) -> ActorId {
        let id = ActorId::fresh();
        let handle = ActorHandle::new(id);
        let body: Box<dyn FnOnce()> = Box::new(move || code(handle));
        let context = ActorContext::new(id, body, None);
        self.actors.insert(id, Actor::new(id, context));
        self.runnable.push_back(id);
        debug!(actor = %id, "spawned actor");
        id
    }

    /// Requests that `actor` stop. Delivered the next time it is resumed,
    /// *unless* a blocking simcall's kernel future for it has already (or
    /// later, before that resumption happens) resolved for real —
    /// `resume_input_for` always prefers a pending real result over a
    /// requested stop, so `stop()` can never cancel a callback that runs.
    pub fn stop(&mut self, actor: ActorId) {
        if let Some(a) = self.actors.get_mut(&actor) {
            a.stop_requested = true;
            if a.state == ActorState::Blocked {
                a.state = ActorState::Runnable;
                self.runnable.push_back(actor);
            }
        }
    }

    /// Marks `actor` runnable because one of its blocking simcalls actually
    /// resolved. Idempotent against a concurrently-requested `stop()`: if
    /// `stop()` already forced the actor into the runnable queue, this just
    /// records that a real result is waiting rather than pushing again.
    pub(crate) fn wake_actor(&mut self, actor: ActorId) {
        if let Some(a) = self.actors.get_mut(&actor) {
            if a.state == ActorState::Terminated {
                return;
            }
            a.pending_real_wake = true;
            if a.state != ActorState::Runnable {
                a.state = ActorState::Runnable;
                self.runnable.push_back(actor);
            }
        }
    }

    /// Runs the simulation to completion (or deadlock), per `spec.md`
    /// §4.3. Consumes `self` since there is no meaningful way to keep using a
    /// kernel after its run has ended.
    pub fn run(mut self) -> RunOutcome {
        loop {
            loop {
                match self.process_round() {
                    RoundOutcome::Continue => continue,
                    RoundOutcome::Settled => break,
                    RoundOutcome::Panicked { actor, detail } => {
                        warn!(%actor, %detail, "actor panicked, aborting run");
                        return RunOutcome::Panicked { actor, detail };
                    }
                }
            }

            if self.actors.is_empty() {
                return RunOutcome::Finished;
            }

            match self.events.pop() {
                Some((at, callback)) => {
                    trace!(t = at.as_secs_f64(), "advancing clock to next event");
                    self.clock.advance_to(at);
                    crate::simcall::enter_kernel(&mut self, || callback());
                }
                None => {
                    let blocked: Vec<ActorId> = self.actors.keys().copied().collect();
                    warn!(count = blocked.len(), "deadlock: no runnable actors and no pending events");
                    return RunOutcome::Deadlocked { blocked };
                }
            }
        }
    }

    /// Runs one round's worth of ready-list drain + actor resumption +
    /// simcall dispatch.
    fn process_round(&mut self) -> RoundOutcome {
        let ready = self.ready.clone();
        crate::simcall::enter_kernel(self, || ready.drain());

        let batch: Vec<ActorId> = self.runnable.drain(..).collect();
        if batch.is_empty() {
            return if self.ready.is_empty() {
                RoundOutcome::Settled
            } else {
                RoundOutcome::Continue
            };
        }

        let outcomes = self.resume_batch(&batch);
        for (actor, outcome) in outcomes {
            if let StepOutcome::Panicked(detail) = outcome {
                return RoundOutcome::Panicked { actor, detail };
            }
            self.handle_step_outcome(actor, outcome);
        }

        if self.runnable.is_empty() && self.ready.is_empty() {
            RoundOutcome::Settled
        } else {
            RoundOutcome::Continue
        }
    }

    fn resume_batch(&mut self, batch: &[ActorId]) -> Vec<(ActorId, StepOutcome)> {
        match self.context_factory {
            ContextFactory::Serial => batch
                .iter()
                .map(|id| {
                    let input = self.resume_input_for(*id);
                    let actor = self.actors.get_mut(id).expect("batch contains unknown actor id");
                    (*id, resume_one(actor, input))
                })
                .collect(),
            ContextFactory::Parallel { worker_count } => self.resume_batch_parallel(batch, worker_count.max(1)),
        }
    }

    fn resume_input_for(&mut self, id: ActorId) -> Resume {
        let Some(a) = self.actors.get_mut(&id) else {
            return Resume::Run;
        };
        if a.pending_real_wake {
            a.pending_real_wake = false;
            return Resume::Run;
        }
        if a.stop_requested {
            return Resume::Stop;
        }
        Resume::Run
    }

    fn resume_batch_parallel(&mut self, batch: &[ActorId], worker_count: usize) -> Vec<(ActorId, StepOutcome)> {
        let inputs: Vec<Resume> = batch.iter().map(|id| self.resume_input_for(*id)).collect();
        let ptrs: Vec<(ActorId, Resume, SendPtr<Actor>)> = batch
            .iter()
            .zip(inputs)
            .map(|(id, input)| {
                let actor = self.actors.get_mut(id).expect("batch contains unknown actor id");
                (*id, input, SendPtr(std::ptr::from_mut(actor)))
            })
            .collect();

        let chunk_size = ptrs.len().div_ceil(worker_count);
        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for chunk in ptrs.chunks(chunk_size) {
                handles.push(scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|(id, input, ptr)| {
                            // Safety: see `ContextFactory::Parallel`; each
                            // `ptr` in this chunk is disjoint from every
                            // pointer handed to every other chunk.
                            let actor = unsafe { &mut *ptr.0 };
                            (*id, resume_one(actor, *input))
                        })
                        .collect::<Vec<_>>()
                }));
            }
            handles
                .into_iter()
                .flat_map(|h| h.join().expect("actor worker thread panicked"))
                .collect()
        })
    }

    fn handle_step_outcome(&mut self, actor: ActorId, outcome: StepOutcome) {
        match outcome {
            StepOutcome::Simcall(record) => self.dispatch_simcall(record),
            StepOutcome::Finished | StepOutcome::Stopped => {
                debug!(actor = %actor, "actor terminated");
                self.actors.remove(&actor);
            }
            StepOutcome::Panicked(_) => {
                unreachable!("panics are intercepted in process_round before reaching here")
            }
        }
    }

    fn dispatch_simcall(&mut self, record: SimcallRecord) {
        let SimcallRecord { actor, kind, task } = record;
        match kind {
            SimcallKind::Immediate => {
                crate::simcall::enter_kernel(self, || {
                    crate::simcall::with_current_kernel(|kernel| task(kernel));
                });
                self.runnable.push_back(actor);
                if let Some(a) = self.actors.get_mut(&actor) {
                    a.state = ActorState::Runnable;
                }
            }
            SimcallKind::Blocking => {
                if let Some(a) = self.actors.get_mut(&actor) {
                    a.state = ActorState::Blocked;
                }
                crate::simcall::enter_kernel(self, || {
                    crate::simcall::with_current_kernel(|kernel| task(kernel));
                });
            }
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_noop(kernel: &mut Kernel) -> ActorId {
        kernel.spawn(|_handle| {})
    }

    #[test]
    fn stop_on_a_blocked_actor_with_no_pending_wake_fires_immediately() {
        let mut kernel = Kernel::new();
        let id = spawn_noop(&mut kernel);
        kernel.actors.get_mut(&id).unwrap().state = ActorState::Blocked;

        kernel.stop(id);

        assert_eq!(kernel.resume_input_for(id), Resume::Stop);
    }

    #[test]
    fn a_real_wake_is_honored_even_if_stop_already_forced_the_actor_runnable() {
        // Mirrors the race `spec.md` §4.1 calls out: `stop()` can force an
        // actor into the runnable queue before the kernel future it was
        // really blocked on gets around to resolving. The resolution must
        // still be delivered once it does.
        let mut kernel = Kernel::new();
        let id = spawn_noop(&mut kernel);
        kernel.actors.get_mut(&id).unwrap().state = ActorState::Blocked;

        kernel.stop(id);
        assert!(kernel.actors.get(&id).unwrap().stop_requested);

        // The actor's real blocking call resolves only now, after `stop()`
        // already forced it runnable.
        kernel.wake_actor(id);

        assert_eq!(kernel.resume_input_for(id), Resume::Run);
        // Consumed: the resumption right after the honored wake is the one
        // that finally carries the stop signal.
        assert_eq!(kernel.resume_input_for(id), Resume::Stop);
    }

    #[test]
    fn stop_before_any_wake_ever_fires_still_stops_on_next_resume() {
        let mut kernel = Kernel::new();
        let id = spawn_noop(&mut kernel);
        kernel.actors.get_mut(&id).unwrap().state = ActorState::Blocked;

        kernel.stop(id);

        assert_eq!(kernel.resume_input_for(id), Resume::Stop);
    }

    #[test]
    fn run_reports_panicked_actor_as_fatal() {
        let mut kernel = Kernel::new();
        kernel.spawn(|_handle| panic!("actor blew up"));

        match kernel.run() {
            RunOutcome::Panicked { detail, .. } => assert!(detail.contains("actor blew up")),
            other => panic!("expected Panicked, got {other:?}"),
        }
    }
}
