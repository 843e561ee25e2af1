//! shjob - run shell command lines as jobs
//!
//! Each job launches one command line through the platform shell, captures
//! stdout and stderr line by line, enforces an optional timeout by killing the
//! whole process tree, and delivers exactly one immutable result to the
//! execution context the caller chose.
//!
//! shjob can be used in two ways:
//! - **CLI**: `shjob run -- make test`, `shjob batch jobs.txt`, `shjob config`
//! - **Library**: embed [`JobRunner`] directly
//!
//! # Quick Start (Library)
//!
//! ```rust,no_run
//! use shjob::{JobRequest, JobRunner, LaunchDescriptor};
//!
//! let runner = JobRunner::new()?;
//! runner
//!     .submit(
//!         JobRequest::new(LaunchDescriptor::new("git status --short").cwd("/work/repo"))
//!             .timeout_secs(30.0)
//!             .on_complete(|result| {
//!                 for line in result.stdout().iter() {
//!                     println!("{line}");
//!                 }
//!             }),
//!     )
//!     .expect("valid request");
//! # Ok::<(), std::io::Error>(())
//! ```

pub mod cli;
pub mod exit_codes;
pub mod logging;

pub use exit_codes::ExitCode;

pub use shjob_config::{CliArgs, Config, ConfigError, ConfigSource};
pub use shjob_runner::{
    CapturedLines, ContextDispatcher, Dispatcher, ExecutionContext, InlineDispatcher, JobId,
    JobOutcome, JobRequest, JobResult, JobRunner, JobRunnerBuilder, JobState, LaunchDescriptor,
    LaunchError, LineBuffer, RunnerOptions, Shell, SubmitError, SuccessPolicy,
};
