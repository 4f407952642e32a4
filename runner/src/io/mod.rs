//! Side-effecting stages of the runner: filesystem, compiler and child processes.

pub mod build;
pub mod config;
pub mod discovery;
pub mod harness;
pub mod load;
pub mod process;
pub mod watch;
