// pipeline.rs — Runner for the async splitting pipeline.
//
// Executes the five stages in dependency order over one statement tree.
// The pipeline is a pure in-process library call: no configuration beyond
// the `verbose` flag, no persisted state.
//
// Preconditions: `stmt` is a fully-lowered statement tree; `env` resolves
//   every `Realize` name in it.
// Postconditions: every async stage is split; no semaphore constructor call
//   remains. Checked against `verify::verify_split` in debug builds.
// Failure modes: internal-invariant violations from the fork and lowering
//   stages.
// Side effects: per-stage timing on stderr when `verbose` is set.

use std::time::Instant;

use crate::diag::InternalError;
use crate::ir::Stmt;
use crate::pass::{descriptor, required_passes, PassId};
use crate::semaphore;
use crate::split;
use crate::stage::StageEnv;
use crate::tighten;

/// Split every async stage in `stmt` into a task-parallel producer/consumer
/// pair coordinated by counting semaphores.
pub fn split_async_stages(stmt: &Stmt, env: &StageEnv) -> Result<Stmt, InternalError> {
    run_stages(stmt, env, false)
}

/// [`split_async_stages`] with per-stage timing on stderr.
pub fn run_stages(stmt: &Stmt, env: &StageEnv, verbose: bool) -> Result<Stmt, InternalError> {
    let mut current = stmt.clone();

    for &pass in &required_passes(PassId::LowerSemaphores) {
        let t = Instant::now();
        current = match pass {
            PassId::TightenConsume => tighten::tighten_consume_regions(&current),
            PassId::ForkProducers => split::fork_async_producers(&current, env)?,
            PassId::ExpandAcquire => tighten::expand_acquire_nodes(&current),
            PassId::TightenFork => tighten::tighten_fork_nodes(&current),
            PassId::LowerSemaphores => semaphore::lower_semaphores(&current)?,
        };
        if verbose {
            eprintln!(
                "rcc: {} complete, {:.1}ms",
                descriptor(pass).name,
                t.elapsed().as_secs_f64() * 1000.0
            );
        }
    }

    #[cfg(debug_assertions)]
    {
        use crate::pass::StageCert;
        let cert = crate::verify::verify_split(&current);
        if !cert.all_pass() {
            let failed: Vec<_> = cert
                .obligations()
                .iter()
                .filter(|(_, ok)| !ok)
                .map(|(name, _)| *name)
                .collect();
            panic!("async split verification failed: {}", failed.join(", "));
        }
    }

    Ok(current)
}

// ── Tests ──────────────────────────────────────────────────────────────────
