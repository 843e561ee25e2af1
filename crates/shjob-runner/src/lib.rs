//! Asynchronous execution of shell command lines
//!
//! A [`JobRunner`] launches one command line per job through the platform
//! shell, optionally feeds it stdin, captures stdout and stderr line by line
//! on concurrent readers and enforces a timeout by killing the whole process
//! tree. Every accepted job produces exactly one immutable [`JobResult`],
//! delivered through a [`Dispatcher`] to the execution context the caller
//! chose.
//!
//! # Result shape
//!
//! A result carries an exit code if and only if the process ran to completion
//! within its timeout. Timed-out and never-launched jobs carry no exit code
//! and no output; [`JobOutcome`] tells them apart.

pub mod descriptor;
pub mod dispatch;
pub mod error;
mod io;
pub mod job;
pub mod line_buffer;
mod platform;
pub mod result;
pub mod runner;

pub use descriptor::{LaunchDescriptor, Shell};
pub use dispatch::{ContextDispatcher, DispatchTask, Dispatcher, ExecutionContext, InlineDispatcher};
pub use error::{LaunchError, ProcessTreeError, SubmitError};
pub use job::{Job, JobId, JobState, ResultCallback, timeout_from_secs};
pub use line_buffer::{CapturedLines, LineBuffer};
pub use result::{JobOutcome, JobResult, SuccessPolicy};
pub use runner::{JobRequest, JobRunner, JobRunnerBuilder, RunnerOptions};
