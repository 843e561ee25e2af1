//! Jobs, job identifiers and the job lifecycle

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::descriptor::LaunchDescriptor;
use crate::error::SubmitError;
use crate::result::JobResult;

/// Next identifier handed out. The only state shared by all jobs.
static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique job identifier, strictly increasing from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    /// Allocate the next identifier. Never returns the same value twice.
    pub(crate) fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Callback receiving the one result of a job.
pub type ResultCallback = Box<dyn FnOnce(JobResult) + Send + 'static>;

/// Lifecycle states of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Running,
    Completed,
    TimedOut,
    LaunchFailed,
    ResultDispatched,
}

impl JobState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::LaunchFailed => "launch_failed",
            Self::ResultDispatched => "result_dispatched",
        }
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Running)
                | (Self::Running, Self::Completed | Self::TimedOut | Self::LaunchFailed)
                | (
                    Self::Completed | Self::TimedOut | Self::LaunchFailed,
                    Self::ResultDispatched
                )
        )
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::ResultDispatched)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convert a timeout in seconds to a bound. `0` means unbounded.
///
/// Negative, NaN and infinite values are rejected.
pub fn timeout_from_secs(seconds: f64) -> Result<Option<Duration>, SubmitError> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(SubmitError::InvalidTimeout {
            value: seconds.to_string(),
        });
    }
    if seconds == 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(seconds)
        .map(Some)
        .map_err(|_| SubmitError::InvalidTimeout {
            value: seconds.to_string(),
        })
}

/// One invocation of an external process.
///
/// Immutable once constructed; the runner consumes it and tracks its state.
pub struct Job {
    id: JobId,
    descriptor: LaunchDescriptor,
    timeout: Option<Duration>,
    callback: Option<ResultCallback>,
    state: JobState,
}

impl Job {
    pub(crate) fn new(
        id: JobId,
        descriptor: LaunchDescriptor,
        timeout: Option<Duration>,
        callback: Option<ResultCallback>,
    ) -> Self {
        Self {
            id,
            descriptor,
            timeout,
            callback,
            state: JobState::Created,
        }
    }

    #[must_use]
    pub const fn id(&self) -> JobId {
        self.id
    }

    #[must_use]
    pub const fn descriptor(&self) -> &LaunchDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub const fn state(&self) -> JobState {
        self.state
    }

    /// Move to `next`, refusing transitions the lifecycle does not allow.
    pub(crate) fn advance(&mut self, next: JobState) {
        if self.state.can_transition_to(next) {
            tracing::trace!(job_id = %self.id, from = %self.state, to = %next, "Job state change");
            self.state = next;
        } else {
            tracing::error!(
                job_id = %self.id,
                from = %self.state,
                to = %next,
                "Illegal job state transition ignored"
            );
        }
    }

    pub(crate) fn take_callback(&mut self) -> Option<ResultCallback> {
        self.callback.take()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor)
            .field("timeout", &self.timeout)
            .field("has_callback", &self.callback.is_some())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_strictly_increase() {
        let a = JobId::next();
        let b = JobId::next();
        let c = JobId::next();
        assert!(a < b && b < c);
        assert!(a.get() >= 1);
    }

    #[test]
    fn test_job_ids_unique_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| (0..100).map(|_| JobId::next()).collect::<Vec<_>>()))
            .collect();

        let mut all: Vec<JobId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let count = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), count);
    }

    #[test]
    fn test_job_id_display() {
        let id = JobId(42);
        assert_eq!(id.to_string(), "#42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
    }

    #[test]
    fn test_timeout_conversion() {
        assert_eq!(timeout_from_secs(0.0).unwrap(), None);
        assert_eq!(
            timeout_from_secs(1.5).unwrap(),
            Some(Duration::from_millis(1500))
        );
        assert!(timeout_from_secs(-1.0).is_err());
        assert!(timeout_from_secs(f64::NAN).is_err());
        assert!(timeout_from_secs(f64::INFINITY).is_err());
    }

    #[test]
    fn test_state_machine_transitions() {
        use JobState::*;
        assert!(Created.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(TimedOut));
        assert!(Running.can_transition_to(LaunchFailed));
        assert!(Completed.can_transition_to(ResultDispatched));
        assert!(TimedOut.can_transition_to(ResultDispatched));
        assert!(LaunchFailed.can_transition_to(ResultDispatched));

        assert!(!Created.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!ResultDispatched.can_transition_to(Running));
        assert!(!Running.can_transition_to(Running));
        assert!(ResultDispatched.is_terminal());
        assert!(!Completed.is_terminal());
    }

    #[test]
    fn test_job_advance_ignores_illegal_transition() {
        let mut job = Job::new(JobId(7), LaunchDescriptor::new("true"), None, None);
        assert_eq!(job.state(), JobState::Created);

        job.advance(JobState::Completed);
        assert_eq!(job.state(), JobState::Created);

        job.advance(JobState::Running);
        job.advance(JobState::Completed);
        job.advance(JobState::ResultDispatched);
        assert_eq!(job.state(), JobState::ResultDispatched);

        job.advance(JobState::Running);
        assert_eq!(job.state(), JobState::ResultDispatched);
    }

    #[test]
    fn test_take_callback_once() {
        let mut job = Job::new(
            JobId(8),
            LaunchDescriptor::new("true"),
            None,
            Some(Box::new(|_| {})),
        );
        assert!(job.take_callback().is_some());
        assert!(job.take_callback().is_none());
    }
}
