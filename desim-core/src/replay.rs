// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The replay harness (`spec.md` §2, §6): drives a simulation from a
//! pre-recorded trace instead of hand-written actor code, so the same kernel
//! can be exercised from the `desim-replay` binary or from a test fixture.
//!
//! A trace is plain text, one instruction per line:
//!
//! ```text
//! # comment
//! alice send bob hello
//! bob recv
//! alice sleep 1.5
//! ```
//!
//! Each distinct first-column name becomes one actor, executing its lines in
//! file order; the second column names a registered handler, looked up in
//! the [`Replay`] the trace is run against.
//!
//! A trace can also be split across one file per actor (`spec.md` §6:
//! "otherwise each actor reads its own file"), via [`Trace::load_dir`]. In
//! that layout the actor column is dropped — the file's name, minus
//! extension, names the actor — so each line is just `command arg...`.

use crate::actor::ActorHandle;
use crate::error::SimError;
use crate::kernel::{ContextFactory, Kernel, RunOutcome};
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

/// One parsed trace instruction.
#[derive(Debug, Clone)]
pub struct TraceStep {
    pub actor: String,
    pub command: String,
    pub args: Vec<String>,
}

/// A parsed replay trace: steps grouped by the actor that issues them,
/// preserving each actor's original line order.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    by_actor: BTreeMap<String, Vec<TraceStep>>,
}

impl Trace {
    /// Parses `input`. Blank lines and lines starting with `#` are ignored.
    /// Fails with [`SimError::fatal`] on a line with no command column.
    pub fn parse(input: &str) -> Result<Self, SimError> {
        let mut trace = Trace::default();
        for (lineno, line) in input.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut words = line.split_whitespace();
            let actor = words
                .next()
                .ok_or_else(|| SimError::fatal(format!("line {}: empty instruction", lineno + 1)))?
                .to_string();
            let command = words
                .next()
                .ok_or_else(|| SimError::fatal(format!("line {}: missing command for actor {actor:?}", lineno + 1)))?
                .to_string();
            let args: Vec<String> = words.map(str::to_string).collect();
            trace
                .by_actor
                .entry(actor.clone())
                .or_default()
                .push(TraceStep { actor, command, args });
        }
        Ok(trace)
    }

    /// Loads one trace file per actor out of `dir`: each file's name, minus
    /// extension, names the actor, and its lines carry just `command
    /// arg...` rather than `actor command arg...` (`spec.md` §6's per-actor
    /// file mode). Files are read in sorted-path order, though actor
    /// identity — not file order — is what matters downstream.
    pub fn load_dir(dir: &Path) -> Result<Self, SimError> {
        let mut entries: Vec<_> = std::fs::read_dir(dir)
            .map_err(|err| SimError::fatal(format!("reading trace directory {}: {err}", dir.display())))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| SimError::fatal(format!("reading trace directory {}: {err}", dir.display())))?;
        entries.sort_by_key(std::fs::DirEntry::path);

        let mut trace = Trace::default();
        for entry in entries {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let actor = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| SimError::fatal(format!("trace file {} has no usable actor name", path.display())))?
                .to_string();
            let input = std::fs::read_to_string(&path)
                .map_err(|err| SimError::fatal(format!("reading trace file {}: {err}", path.display())))?;
            let steps = parse_actor_lines(&actor, &input)?;
            trace.by_actor.entry(actor).or_default().extend(steps);
        }
        Ok(trace)
    }

    #[must_use]
    pub fn actor_names(&self) -> Vec<&str> {
        self.by_actor.keys().map(String::as_str).collect()
    }
}

/// Parses the per-actor-file line format: `command arg...`, actor identity
/// supplied by the caller rather than read off the line.
fn parse_actor_lines(actor: &str, input: &str) -> Result<Vec<TraceStep>, SimError> {
    let mut steps = Vec::new();
    for (lineno, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut words = line.split_whitespace();
        let command = words
            .next()
            .ok_or_else(|| SimError::fatal(format!("{actor}: line {}: empty instruction", lineno + 1)))?
            .to_string();
        let args: Vec<String> = words.map(str::to_string).collect();
        steps.push(TraceStep {
            actor: actor.to_string(),
            command,
            args,
        });
    }
    Ok(steps)
}

type Handler = Rc<dyn Fn(ActorHandle, &[String])>;

/// A table of named step handlers, run against a [`Trace`] to drive a
/// simulation (`spec.md` §6's "handlers are registered via
/// `Replay::register(name, handler)`").
#[derive(Clone, Default)]
pub struct Replay {
    handlers: BTreeMap<String, Handler>,
}

impl Replay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler invoked for every trace step whose command
    /// matches `name`. Registering the same name twice replaces the handler.
    pub fn register(&mut self, name: impl Into<String>, handler: impl Fn(ActorHandle, &[String]) + 'static) {
        self.handlers.insert(name.into(), Rc::new(handler));
    }

    /// Spawns one actor per distinct name in `trace`, each running its steps
    /// in order through this replay's registered handlers, then runs the
    /// kernel to completion.
    ///
    /// Fails with [`SimError::fatal`] if the trace references a command with
    /// no registered handler; that failure is detected before the kernel
    /// runs, so a bad trace never produces a partial run.
    pub fn run(&self, trace: &Trace) -> Result<RunOutcome, SimError> {
        self.run_with(trace, ContextFactory::Serial)
    }

    /// Like [`Self::run`] but with an explicit [`ContextFactory`], e.g. to
    /// replay the same trace under [`ContextFactory::Parallel`] and confirm
    /// it produces identical actor-visible behavior (`spec.md` §9's
    /// "parallel contexts are a scheduling optimisation, not a concurrency
    /// model").
    pub fn run_with(&self, trace: &Trace, context_factory: ContextFactory) -> Result<RunOutcome, SimError> {
        for steps in trace.by_actor.values() {
            for step in steps {
                if !self.handlers.contains_key(&step.command) {
                    return Err(SimError::fatal(format!(
                        "no handler registered for command {:?} (actor {:?})",
                        step.command, step.actor
                    )));
                }
            }
        }

        let mut kernel = Kernel::with_context_factory(context_factory);
        for steps in trace.by_actor.values() {
            let steps = steps.clone();
            let handlers = self.handlers.clone();
            kernel.spawn(move |actor| {
                for step in steps {
                    let handler = handlers
                        .get(&step.command)
                        .expect("missing handlers were rejected before the kernel started");
                    handler(actor, &step.args);
                }
            });
        }
        Ok(kernel.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_blank_and_comment_lines() {
        let trace = Trace::parse("\n# a comment\nalice sleep 1.0\n\nbob wake\n").unwrap();
        assert_eq!(trace.actor_names().len(), 2);
    }

    #[test]
    fn parse_rejects_missing_command() {
        assert!(Trace::parse("alice").is_err());
    }

    #[test]
    fn run_rejects_unregistered_command() {
        let trace = Trace::parse("alice nope").unwrap();
        let replay = Replay::new();
        match replay.run(&trace) {
            Err(SimError::Fatal { .. }) => {}
            other => panic!("expected Fatal, got {other:?}"),
        }
    }

    #[test]
    fn run_drives_registered_handlers_to_completion() {
        let trace = Trace::parse("alice noop\nbob noop\n").unwrap();
        let mut replay = Replay::new();
        replay.register("noop", |_actor, _args| {});
        match replay.run(&trace).unwrap() {
            RunOutcome::Finished => {}
            other => panic!("expected Finished, got {other:?}"),
        }
    }

    #[test]
    fn load_dir_names_actors_from_file_stems() {
        let dir = std::env::temp_dir().join(format!("desim-replay-test-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("alice.trace"), "sleep 1.0\nnoop\n").unwrap();
        std::fs::write(dir.join("bob.trace"), "# comment\nnoop\n").unwrap();

        let trace = Trace::load_dir(&dir).unwrap();
        let mut names = trace.actor_names();
        names.sort_unstable();
        assert_eq!(names, vec!["alice", "bob"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn load_dir_runs_through_registered_handlers() {
        let dir = std::env::temp_dir().join(format!("desim-replay-test-run-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("alice.trace"), "noop\n").unwrap();

        let trace = Trace::load_dir(&dir).unwrap();
        let mut replay = Replay::new();
        replay.register("noop", |_actor, _args| {});
        match replay.run(&trace).unwrap() {
            RunOutcome::Finished => {}
            other => panic!("expected Finished, got {other:?}"),
        }

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
