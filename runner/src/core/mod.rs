//! Deterministic, pure logic shared by the runner.
//!
//! Core modules must be free of I/O side effects. They operate on source text,
//! listings and reports already read into memory and return deterministic
//! outputs suitable for tests.

pub mod cfg;
pub mod classifier;
pub mod compiler_output;
pub mod extractor;
pub mod manifest;
pub mod membership;
pub mod progress;
pub mod types;
