//! Watch-retry loop for `koans run`.

use std::io::Write;

use anyhow::Result;
use tracing::{debug, info};

use crate::core::progress::ProgressState;
use crate::core::types::{CycleOutcome, Diagnostic};
use crate::engine::Engine;
use crate::io::build::Toolchain;
use crate::io::watch::ChangeWaiter;
use crate::report::Reporter;

/// Summary of a finished curriculum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub cycles: u64,
    /// Cases executed by cycles that ran to completion.
    pub cases_run: usize,
    /// Diagnostics reported along the way, in order.
    pub failures: Vec<Diagnostic>,
    pub progress: ProgressState,
}

/// Run cycles until every selected exercise module is complete.
///
/// Each failed cycle is reported and followed by a wait for a relevant source
/// change. A completed cycle has marked every selected module complete, so it
/// ends the loop. Only process-fatal conditions end the loop early, as errors.
pub fn run_loop<T: Toolchain, C: ChangeWaiter, W: Write>(
    engine: &Engine<'_, T>,
    waiter: &mut C,
    reporter: &mut Reporter<W>,
) -> Result<LoopOutcome> {
    let mut progress = ProgressState::new();
    let mut cycles = 0u64;
    let mut cases_run = 0usize;
    let mut failures = Vec::new();

    loop {
        cycles += 1;
        match engine.run_cycle(cycles, &mut progress, reporter)? {
            CycleOutcome::Completed {
                cases_run: ran,
                modules,
            } => {
                cases_run += ran;
                debug_assert!(progress.all_complete(modules.iter().map(String::as_str)));
                info!(
                    cycles,
                    cases_run,
                    modules = progress.completed_modules(),
                    cases = progress.completed_cases(),
                    "curriculum complete"
                );
                reporter.finished()?;
                return Ok(LoopOutcome {
                    cycles,
                    cases_run,
                    failures,
                    progress,
                });
            }
            CycleOutcome::Failed(diagnostic) => {
                debug!(cycles, kind = diagnostic.kind.as_str(), subject = %diagnostic.subject, "cycle failed");
                reporter.diagnostic(&diagnostic)?;
                failures.push(diagnostic);
                reporter.waiting()?;
                waiter.wait_for_change()?;
            }
        }
    }
}
