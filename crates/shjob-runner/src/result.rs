//! Immutable job results

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::LaunchError;
use crate::job::JobId;
use crate::line_buffer::{CapturedLines, LineBuffer};

/// How a run ended.
///
/// Timeout and launch failure share the same observable result shape (no
/// exit code, no captured output) but remain distinguishable here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The process exited within the timeout
    Completed { exit_code: i32 },
    /// The timeout elapsed and the process was killed
    TimedOut {
        #[serde(serialize_with = "serialize_secs")]
        timeout: Duration,
    },
    /// The process never started
    LaunchFailed { error: LaunchError },
}

impl JobOutcome {
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Completed { exit_code } => Some(*exit_code),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    #[must_use]
    pub const fn is_launch_failure(&self) -> bool {
        matches!(self, Self::LaunchFailed { .. })
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::TimedOut { .. } => "timed_out",
            Self::LaunchFailed { .. } => "launch_failed",
        }
    }
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Outcome snapshot of one job.
///
/// `exit_code` is present if and only if the process ran to completion within
/// the timeout. When it is absent, `stdout` and `stderr` are empty.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    job_id: JobId,
    command_line: String,
    stdout: CapturedLines,
    stderr: CapturedLines,
    exit_code: Option<i32>,
    outcome: JobOutcome,
    started_at: DateTime<Utc>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    duration: Duration,
    stdout_truncated: bool,
    stderr_truncated: bool,
}

impl JobResult {
    /// Result of a process that exited on its own.
    pub(crate) fn completed(
        job_id: JobId,
        command_line: String,
        stdout: LineBuffer,
        stderr: LineBuffer,
        exit_code: i32,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        let stdout_truncated = stdout.was_truncated();
        let stderr_truncated = stderr.was_truncated();
        Self {
            job_id,
            command_line,
            stdout: stdout.freeze(),
            stderr: stderr.freeze(),
            exit_code: Some(exit_code),
            outcome: JobOutcome::Completed { exit_code },
            started_at,
            duration,
            stdout_truncated,
            stderr_truncated,
        }
    }

    /// Result of a run that did not complete: no exit code, no output.
    pub(crate) fn indeterminate(
        job_id: JobId,
        command_line: String,
        outcome: JobOutcome,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        debug_assert!(outcome.exit_code().is_none());
        Self {
            job_id,
            command_line,
            stdout: CapturedLines::empty(),
            stderr: CapturedLines::empty(),
            exit_code: None,
            outcome,
            started_at,
            duration,
            stdout_truncated: false,
            stderr_truncated: false,
        }
    }

    #[must_use]
    pub const fn job_id(&self) -> JobId {
        self.job_id
    }

    #[must_use]
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    #[must_use]
    pub const fn stdout(&self) -> &CapturedLines {
        &self.stdout
    }

    #[must_use]
    pub const fn stderr(&self) -> &CapturedLines {
        &self.stderr
    }

    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    #[must_use]
    pub const fn outcome(&self) -> &JobOutcome {
        &self.outcome
    }

    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// Whether the stdout retention cap dropped lines
    #[must_use]
    pub const fn stdout_truncated(&self) -> bool {
        self.stdout_truncated
    }

    /// Whether the stderr retention cap dropped lines
    #[must_use]
    pub const fn stderr_truncated(&self) -> bool {
        self.stderr_truncated
    }

    /// Success under the default policy (exit code 0).
    #[must_use]
    pub fn success(&self) -> bool {
        SuccessPolicy::default().is_success(self)
    }
}

/// Which exit codes count as success. Lives with the caller, not the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessPolicy {
    success_codes: BTreeSet<i32>,
}

impl SuccessPolicy {
    /// Build a policy from the accepted exit codes.
    #[must_use]
    pub fn new(codes: impl IntoIterator<Item = i32>) -> Self {
        Self {
            success_codes: codes.into_iter().collect(),
        }
    }

    /// An absent exit code is never a success.
    #[must_use]
    pub fn is_success(&self, result: &JobResult) -> bool {
        result
            .exit_code()
            .is_some_and(|code| self.success_codes.contains(&code))
    }

    #[must_use]
    pub fn codes(&self) -> impl Iterator<Item = i32> + '_ {
        self.success_codes.iter().copied()
    }
}

impl Default for SuccessPolicy {
    fn default() -> Self {
        Self::new([0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> LineBuffer {
        let mut buffer = LineBuffer::new();
        for item in items {
            buffer.append(Some((*item).to_string()));
        }
        buffer.append(None);
        buffer
    }

    fn completed(exit_code: i32) -> JobResult {
        JobResult::completed(
            JobId::next(),
            "echo a".to_string(),
            lines(&["a"]),
            lines(&[]),
            exit_code,
            Utc::now(),
            Duration::from_millis(5),
        )
    }

    #[test]
    fn test_completed_result_fields() {
        let result = completed(3);
        assert_eq!(result.exit_code(), Some(3));
        assert_eq!(result.outcome(), &JobOutcome::Completed { exit_code: 3 });
        assert_eq!(result.stdout(), &["a"]);
        assert!(result.stderr().is_empty());
        assert_eq!(result.command_line(), "echo a");
        assert!(!result.success());
        assert!(completed(0).success());
    }

    #[test]
    fn test_timed_out_result_is_empty() {
        let result = JobResult::indeterminate(
            JobId::next(),
            "sleep 10".to_string(),
            JobOutcome::TimedOut {
                timeout: Duration::from_secs(1),
            },
            Utc::now(),
            Duration::from_secs(1),
        );
        assert_eq!(result.exit_code(), None);
        assert!(result.stdout().is_empty());
        assert!(result.stderr().is_empty());
        assert!(result.outcome().is_timed_out());
        assert!(!result.success());
    }

    #[test]
    fn test_launch_failure_distinct_from_timeout() {
        let result = JobResult::indeterminate(
            JobId::next(),
            "x".to_string(),
            JobOutcome::LaunchFailed {
                error: LaunchError::ShellNotFound {
                    program: "nosh".to_string(),
                },
            },
            Utc::now(),
            Duration::ZERO,
        );
        assert!(result.outcome().is_launch_failure());
        assert!(!result.outcome().is_timed_out());
        assert_eq!(result.outcome().as_str(), "launch_failed");
    }

    #[test]
    fn test_truncation_flags_survive_freeze() {
        let mut stdout = LineBuffer::with_max_lines(Some(1));
        stdout.append(Some("1".to_string()));
        stdout.append(Some("2".to_string()));
        let result = JobResult::completed(
            JobId::next(),
            "seq 2".to_string(),
            stdout,
            LineBuffer::new(),
            0,
            Utc::now(),
            Duration::ZERO,
        );
        assert!(result.stdout_truncated());
        assert!(!result.stderr_truncated());
        assert_eq!(result.stdout(), &["2"]);
    }

    #[test]
    fn test_success_policy() {
        let policy = SuccessPolicy::new([0, 1]);
        assert!(policy.is_success(&completed(0)));
        assert!(policy.is_success(&completed(1)));
        assert!(!policy.is_success(&completed(2)));
        assert_eq!(policy.codes().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(SuccessPolicy::default(), SuccessPolicy::new([0]));
    }

    #[test]
    fn test_result_serializes() {
        let json = serde_json::to_value(completed(0)).unwrap();
        assert_eq!(json["exit_code"], 0);
        assert_eq!(json["stdout"], serde_json::json!(["a"]));
        assert_eq!(json["outcome"]["status"], "completed");
        assert_eq!(json["duration_ms"], 5);
    }

    #[test]
    fn test_outcome_serializes_launch_error() {
        let outcome = JobOutcome::LaunchFailed {
            error: LaunchError::ShellNotFound {
                program: "nosh".to_string(),
            },
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "launch_failed");
        assert_eq!(json["error"]["kind"], "shell_not_found");
        assert_eq!(json["error"]["program"], "nosh");
    }
}
