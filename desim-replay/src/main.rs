// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Drives a [`desim_core::replay`] trace from the command line: a thin
//! process-boundary wrapper around the library, in the spirit of the
//! teacher's own `build/xtask` binary (`clap` for argument parsing,
//! `color-eyre` for top-level error reporting, `tracing` for progress).
//!
//! Registers a small built-in vocabulary of trace commands that exercise the
//! core's own primitives directly — `sleep`, `yield`, `log` — rather than any
//! communication/IO simcall, which this crate deliberately leaves
//! unspecified (`spec.md` §1's out-of-scope list).

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{Context, Result};
use desim_core::clock::Duration;
use desim_core::kernel::ContextFactory;
use desim_core::replay::{Replay, Trace};
use desim_core::RunOutcome;
use tracing_subscriber::EnvFilter;

/// Replay a textual action trace against the desim kernel.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Path to the trace: either a single file (lines are `actor command
    /// arg...`, partitioned by actor) or a directory of one `<actor>.trace`
    /// file per actor (`spec.md` §6 replay input format).
    trace: PathBuf,

    /// Number of worker threads to resume actors with, via
    /// `ContextFactory::Parallel`. Omit for the serial context factory.
    #[clap(long)]
    workers: Option<usize>,
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("desim_replay=info,warn")))
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| color_eyre::eyre::eyre!("failed to install tracing subscriber: {err}"))
}

fn builtin_replay() -> Replay {
    let mut replay = Replay::new();
    replay.register("sleep", |actor, args| {
        let secs: f64 = args
            .first()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| panic!("actor {}: `sleep` requires a numeric duration argument", actor.id()));
        actor.sleep_for(Duration::from_secs_f64(secs));
    });
    replay.register("yield", |actor, _args| {
        actor.yield_now();
    });
    replay.register("log", |actor, args| {
        tracing::info!(actor = %actor.id(), message = %args.join(" "), "log");
    });
    replay
}

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing()?;

    let cli = Cli::parse();

    let trace = if cli.trace.is_dir() {
        Trace::load_dir(&cli.trace).with_context(|| format!("loading trace directory {}", cli.trace.display()))?
    } else {
        let input = std::fs::read_to_string(&cli.trace)
            .with_context(|| format!("reading trace file {}", cli.trace.display()))?;
        Trace::parse(&input).with_context(|| format!("parsing trace file {}", cli.trace.display()))?
    };

    let context_factory = match cli.workers {
        Some(worker_count) => ContextFactory::Parallel { worker_count },
        None => ContextFactory::Serial,
    };

    let replay = builtin_replay();
    let outcome = replay
        .run_with(&trace, context_factory)
        .map_err(|err| color_eyre::eyre::eyre!(err))?;

    match outcome {
        RunOutcome::Finished => {
            tracing::info!("replay finished");
            Ok(())
        }
        RunOutcome::Deadlocked { blocked } => {
            color_eyre::eyre::bail!("replay deadlocked with {} actor(s) still blocked", blocked.len())
        }
        RunOutcome::Panicked { actor, detail } => {
            color_eyre::eyre::bail!("actor {actor} panicked: {detail}")
        }
    }
}
