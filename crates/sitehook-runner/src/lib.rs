//! Build orchestration for sitehook.
//!
//! One [`BuildRunner`] per deployment target owns a single-worker job queue.
//! Every pipeline run (sync, build, install) and every working directory
//! cleanup for that target executes on that worker, so git and build
//! subprocesses never touch the same working copy concurrently.

pub mod error;
mod job;
pub mod pipeline;
pub mod runner;
pub mod schedule;

#[cfg(test)]
mod test_helpers;

pub use error::RunnerError;
pub use pipeline::BuildOutcome;
pub use runner::{BuildOptions, BuildRunner};
pub use schedule::Scheduler;
