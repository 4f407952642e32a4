//! Incremental exercise runner for Rust koans.
//!
//! Learners fix small exercise functions one at a time. The runner compiles
//! each exercise module, discovers its cases from the source text, runs them in
//! declaration order and halts at the first failure with a diagnostic. When a
//! source file is saved it resumes, skipping everything already verified.
//!
//! - **[`core`]**: Pure, deterministic logic (listings, membership, case
//!   extraction, failure classification, progress). No I/O.
//! - **[`io`]**: Side-effecting stages (discovery, compiler, harness processes,
//!   file watching). Trait seams allow scripted stand-ins in tests.
//!
//! [`engine`] runs one cycle, [`looping`] repeats cycles until the curriculum is
//! done, and [`report`] renders everything the learner reads.

pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod report;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
