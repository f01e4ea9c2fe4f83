// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::actor::ActorId;

/// The error taxonomy for the whole simulation kernel.
///
/// Every fallible operation in this crate resolves to one of these variants;
/// there is deliberately no `From<io::Error>` or similar impls here, since the
/// kernel itself never touches the outside world (see the platform/event
/// source boundary in the external interfaces).
#[derive(Debug, onlyerror::Error)]
pub enum SimError {
    /// Operation on a future/promise that has no associated shared state
    /// (moved-from, or the handle was already consumed).
    #[error("no associated shared state")]
    NoState,
    /// A promise was satisfied a second time.
    #[error("promise already satisfied")]
    AlreadySatisfied,
    /// `get()` was called on a kernel future that is not yet ready, or the
    /// scheduler reached quiescence with actors still blocked.
    #[error("deadlock: no ready actors and no pending events")]
    Deadlock,
    /// A timed wait (future or condition variable) expired before completion.
    #[error("timed wait expired")]
    Timeout,
    /// A context received the stop signal. Caught at the context boundary;
    /// escaping past it is a bug.
    #[error("actor received the stop signal")]
    Stopped,
    /// Internal invariant violation, allocation failure, or worker-thread
    /// error in the parallel context factory. Always fatal to the whole run.
    #[error("fatal error: {detail}")]
    Fatal {
        actor: Option<ActorId>,
        detail: String,
    },
}

impl SimError {
    #[must_use]
    pub fn fatal(detail: impl Into<String>) -> Self {
        SimError::Fatal {
            actor: None,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn fatal_in(actor: ActorId, detail: impl Into<String>) -> Self {
        SimError::Fatal {
            actor: Some(actor),
            detail: detail.into(),
        }
    }
}
