//! Stable exit codes for the `koans` CLI.

/// The curriculum is finished, or the command succeeded.
pub const OK: i32 = 0;
/// Process-fatal error: unreadable config or listings, bad build directory,
/// watcher or toolchain failure.
pub const INVALID: i32 = 1;
/// `koans check` found listings that disagree with the source tree.
pub const VALIDATION_FAILED: i32 = 2;
