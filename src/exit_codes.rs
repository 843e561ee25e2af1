//! Exit codes for the shjob binary
//!
//! A job's own exit code is reported in its result; the binary collapses the
//! outcome into one of these.

use shjob_runner::{JobOutcome, JobResult, SuccessPolicy};

/// Process exit code returned by `shjob`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExitCode(i32);

impl ExitCode {
    /// Every job completed with a successful exit code
    pub const SUCCESS: ExitCode = ExitCode(0);

    /// A job completed with an exit code outside the success policy
    pub const JOB_FAILED: ExitCode = ExitCode(1);

    /// CLI arguments or configuration rejected
    pub const CLI_ARGS: ExitCode = ExitCode(2);

    /// A job exceeded its timeout and was killed
    pub const JOB_TIMEOUT: ExitCode = ExitCode(10);

    /// The runner itself could not start
    pub const INTERNAL: ExitCode = ExitCode(70);

    /// A job's process could not be launched
    pub const LAUNCH_FAILED: ExitCode = ExitCode(127);

    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Exit code for one result under `policy`.
    #[must_use]
    pub fn for_result(result: &JobResult, policy: &SuccessPolicy) -> Self {
        match result.outcome() {
            JobOutcome::Completed { .. } if policy.is_success(result) => Self::SUCCESS,
            JobOutcome::Completed { .. } => Self::JOB_FAILED,
            JobOutcome::TimedOut { .. } => Self::JOB_TIMEOUT,
            JobOutcome::LaunchFailed { .. } => Self::LAUNCH_FAILED,
        }
    }

    /// The more severe of two codes: launch failure, then timeout, then failure.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        let rank = |code: Self| match code {
            Self::LAUNCH_FAILED => 4,
            Self::JOB_TIMEOUT => 3,
            Self::SUCCESS => 0,
            _ => 2,
        };
        if rank(other) > rank(self) { other } else { self }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::SUCCESS.as_i32(), 0);
        assert_eq!(ExitCode::JOB_FAILED.as_i32(), 1);
        assert_eq!(ExitCode::CLI_ARGS.as_i32(), 2);
        assert_eq!(ExitCode::JOB_TIMEOUT.as_i32(), 10);
        assert_eq!(ExitCode::LAUNCH_FAILED.as_i32(), 127);
        assert_eq!(i32::from(ExitCode::INTERNAL), 70);
    }

    #[test]
    fn test_worst_prefers_launch_failure_then_timeout() {
        let codes = [
            ExitCode::SUCCESS,
            ExitCode::JOB_FAILED,
            ExitCode::JOB_TIMEOUT,
            ExitCode::LAUNCH_FAILED,
        ];
        let worst = codes.into_iter().fold(ExitCode::SUCCESS, ExitCode::worst);
        assert_eq!(worst, ExitCode::LAUNCH_FAILED);

        assert_eq!(
            ExitCode::JOB_FAILED.worst(ExitCode::JOB_TIMEOUT),
            ExitCode::JOB_TIMEOUT
        );
        assert_eq!(
            ExitCode::JOB_FAILED.worst(ExitCode::SUCCESS),
            ExitCode::JOB_FAILED
        );
        assert_eq!(ExitCode::SUCCESS.worst(ExitCode::SUCCESS), ExitCode::SUCCESS);
    }
}
