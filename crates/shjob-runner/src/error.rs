//! Error types for job submission and launch

use serde::Serialize;
use std::io;
use thiserror::Error;

/// Caller contract violations, reported synchronously by `submit`.
///
/// None of these ever produce a job: no identifier is allocated and no
/// callback is invoked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Command line is empty")]
    EmptyCommandLine,

    #[error("Invalid environment variable '{key}': {reason}")]
    InvalidEnvironment { key: String, reason: String },

    #[error("Invalid timeout {value}: must be a finite number of seconds >= 0")]
    InvalidTimeout { value: String },

    #[error("{field} contains a NUL byte")]
    NulByte { field: String },

    #[error("Synchronous submission cannot block a current-thread tokio runtime")]
    SynchronousInRuntime,
}

/// Why a process could not be started.
///
/// Carried inside [`JobOutcome::LaunchFailed`](crate::JobOutcome::LaunchFailed)
/// so callers can tell a launch failure apart from a timeout.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaunchError {
    #[error("Shell not found: {program}")]
    ShellNotFound { program: String },

    #[error("Working directory is not usable: {path}: {reason}")]
    WorkingDirectory { path: String, reason: String },

    #[error("Permission denied launching {program}: {reason}")]
    PermissionDenied { program: String, reason: String },

    #[error("Failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Failed to capture {stream} of spawned process")]
    PipeUnavailable { stream: &'static str },
}

/// Failure to group a spawned process for tree termination.
///
/// Not fatal to the job: the runner falls back to killing only the shell.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessTreeError {
    #[error("Failed to create job object: {reason}")]
    CreateJob { reason: String },

    #[error("Failed to configure job object: {reason}")]
    ConfigureJob { reason: String },

    #[error("Failed to open process {pid}: {reason}")]
    OpenProcess { pid: u32, reason: String },

    #[error("Failed to assign process {pid} to job object: {reason}")]
    AssignProcess { pid: u32, reason: String },
}

impl LaunchError {
    /// Classify a spawn error from the OS.
    pub(crate) fn from_spawn(
        err: &io::Error,
        program: &str,
        working_directory: Option<&std::path::Path>,
    ) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => match working_directory {
                Some(dir) if !dir.is_dir() => Self::WorkingDirectory {
                    path: dir.display().to_string(),
                    reason: err.to_string(),
                },
                _ => Self::ShellNotFound {
                    program: program.to_string(),
                },
            },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                program: program.to_string(),
                reason: err.to_string(),
            },
            _ => Self::SpawnFailed {
                program: program.to_string(),
                reason: err.to_string(),
            },
        }
    }
}
