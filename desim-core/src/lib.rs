// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A cooperative, single-threaded discrete-event simulation kernel for
//! distributed-systems actors.
//!
//! Actor code runs on a stack-switched [`fiber::Fiber`] and reaches the
//! kernel only through the simcall boundary ([`simcall`]): every operation
//! that touches shared state — spawning, synchronization, sleeping, kernel
//! futures — traps into the maestro ([`kernel::Kernel`]) rather than
//! mutating anything directly. [`actor::ActorHandle`] is the one entry point
//! actor code is given; everything else in this crate exists to implement
//! the operations it exposes.
//!
//! ```no_run
//! use desim_core::kernel::Kernel;
//!
//! let mut kernel = Kernel::new();
//! kernel.spawn(|actor| {
//!     println!("hello from {} at {:?}", actor.id(), actor.now());
//!     actor.sleep_for(desim_core::clock::Duration::from_secs_f64(1.0));
//!     println!("goodbye from {} at {:?}", actor.id(), actor.now());
//! });
//! kernel.run();
//! ```

pub mod actor;
pub mod actor_future;
pub mod clock;
pub mod context;
pub mod error;
pub mod event;
pub mod future;
pub mod kernel;
pub mod ready;
pub mod replay;
pub mod simcall;
pub mod sync;
pub mod task;

pub use actor::{ActorHandle, ActorId};
pub use error::SimError;
pub use kernel::{ContextFactory, Kernel, RunOutcome};
