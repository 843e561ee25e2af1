use chrono::Utc;
use std::fmt;
use std::future::Future;
use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

use crate::descriptor::{LaunchDescriptor, Shell};
use crate::dispatch::{Dispatcher, InlineDispatcher};
use crate::error::{LaunchError, SubmitError};
use crate::io::{ReaderOutput, StreamKind, pump_lines};
use crate::job::{Job, JobId, JobState, ResultCallback, timeout_from_secs};
use crate::line_buffer::LineBuffer;
use crate::platform::ProcessTree;
use crate::result::{JobOutcome, JobResult};

/// How long readers may keep draining once the process has exited before
/// the rest of its process group is killed.
const READER_DRAIN_GRACE: Duration = Duration::from_millis(500);

// ============================================================================
// Options and requests
// ============================================================================

/// Runner-wide settings
#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    /// Worker threads for the owned runtime (`None` = tokio's default)
    pub worker_threads: Option<usize>,
    /// Upper bound on asynchronous jobs running at once (`None` = unbounded)
    pub max_concurrent_jobs: Option<usize>,
    /// Lines retained per stream (`None` = unbounded)
    pub max_captured_lines: Option<usize>,
    /// Keep an unterminated final line instead of discarding it
    pub flush_partial_lines: bool,
    /// Interpreter for command lines
    pub shell: Shell,
    /// Timeout applied when a request does not give one (`None` = unbounded)
    pub default_timeout: Option<Duration>,
}

/// One submission: what to run, how long to allow, who gets the result.
///
/// # Example
///
/// ```rust
/// use shjob_runner::{JobRequest, LaunchDescriptor};
///
/// let request = JobRequest::new(LaunchDescriptor::new("echo hello"))
///     .timeout_secs(30.0)
///     .on_complete(|result| println!("{:?}", result.stdout()))
///     .synchronous(true);
/// # let _ = request;
/// ```
pub struct JobRequest {
    descriptor: LaunchDescriptor,
    timeout_secs: Option<f64>,
    callback: Option<ResultCallback>,
    synchronous: bool,
}

impl JobRequest {
    /// An asynchronous request with no callback and the runner's default timeout.
    #[must_use]
    pub fn new(descriptor: LaunchDescriptor) -> Self {
        Self {
            descriptor,
            timeout_secs: None,
            callback: None,
            synchronous: false,
        }
    }

    /// Bound the run. `0.0` means unbounded.
    #[must_use]
    pub const fn timeout_secs(mut self, seconds: f64) -> Self {
        self.timeout_secs = Some(seconds);
        self
    }

    /// Receive the result on the runner's execution context.
    #[must_use]
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(JobResult) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Run on the calling thread; `submit` returns after dispatch.
    #[must_use]
    pub const fn synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    #[must_use]
    pub const fn descriptor(&self) -> &LaunchDescriptor {
        &self.descriptor
    }
}

impl fmt::Debug for JobRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRequest")
            .field("descriptor", &self.descriptor)
            .field("timeout_secs", &self.timeout_secs)
            .field("has_callback", &self.callback.is_some())
            .field("synchronous", &self.synchronous)
            .finish()
    }
}

// ============================================================================
// JobRunner
// ============================================================================

/// State shared by every job task. Holds no runtime, so tasks never keep
/// the runtime alive.
struct Shared {
    options: RunnerOptions,
    dispatcher: Arc<dyn Dispatcher>,
    limiter: Option<Arc<Semaphore>>,
    in_flight: AtomicUsize,
}

/// Shuts an owned runtime down without blocking, from any context.
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// Runs external processes and delivers each result exactly once.
///
/// Cloning is cheap; clones share the worker pool, dispatcher and limits.
/// Dropping every clone does not cancel accepted jobs: each asynchronous job
/// keeps an owned worker pool alive until its result has been dispatched.
///
/// # Example
///
/// ```rust,no_run
/// use shjob_runner::{ExecutionContext, JobRequest, JobRunner, LaunchDescriptor};
/// use std::time::{Duration, Instant};
///
/// let context = ExecutionContext::new();
/// let runner = JobRunner::builder()
///     .dispatcher(context.dispatcher())
///     .build()?;
///
/// let id = runner
///     .submit(
///         JobRequest::new(LaunchDescriptor::new("echo hello"))
///             .timeout_secs(10.0)
///             .on_complete(|result| assert_eq!(result.stdout(), &["hello"])),
///     )
///     .expect("valid request");
///
/// // Results arrive on whichever thread pumps the context.
/// context.run_until(1, Instant::now() + Duration::from_secs(10));
/// # let _ = id;
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Clone)]
pub struct JobRunner {
    shared: Arc<Shared>,
    handle: Handle,
    runtime: Option<Arc<OwnedRuntime>>,
}

impl JobRunner {
    /// A runner with default options, its own worker pool and inline dispatch.
    pub fn new() -> io::Result<Self> {
        Self::builder().build()
    }

    #[must_use]
    pub fn builder() -> JobRunnerBuilder {
        JobRunnerBuilder::default()
    }

    #[must_use]
    pub fn options(&self) -> &RunnerOptions {
        &self.shared.options
    }

    /// Jobs submitted whose result has not been dispatched yet
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Submit a job.
    ///
    /// The request is validated first; a rejected request allocates no job
    /// id and never calls back. Otherwise the job id is returned, and the
    /// callback (if any) will run exactly once on the dispatcher's context.
    ///
    /// A synchronous request runs on the calling thread. Inside a
    /// multi-thread tokio runtime the worker is handed off while it blocks;
    /// inside a current-thread runtime the request is rejected with
    /// [`SubmitError::SynchronousInRuntime`].
    pub fn submit(&self, request: JobRequest) -> Result<JobId, SubmitError> {
        let JobRequest {
            descriptor,
            timeout_secs,
            callback,
            synchronous,
        } = request;

        descriptor.validate()?;
        let timeout = match timeout_secs {
            Some(seconds) => timeout_from_secs(seconds)?,
            None => self.shared.options.default_timeout,
        };
        let blocking = if synchronous {
            Some(BlockingMode::for_current_thread()?)
        } else {
            None
        };

        let id = JobId::next();
        let job = Job::new(id, descriptor, timeout, callback);
        let span = tracing::info_span!("job", job_id = %id);
        let guard = InFlight::enter(&self.shared);
        let shared = Arc::clone(&self.shared);

        if let Some(mode) = blocking {
            debug!(parent: &span, "Running job synchronously");
            mode.block_on(
                &self.handle,
                shared.execute_and_deliver(job).instrument(span),
            );
            drop(guard);
        } else {
            debug!(parent: &span, "Queueing job on worker pool");
            let limiter = shared.limiter.clone();
            let keep_alive = self.runtime.clone();
            self.handle.spawn(
                async move {
                    let _permit = match limiter {
                        Some(limiter) => limiter.acquire_owned().await.ok(),
                        None => None,
                    };
                    shared.execute_and_deliver(job).await;
                    drop(guard);
                    // The last job out may be the last owner of the pool
                    drop(keep_alive);
                }
                .instrument(span),
            );
        }

        Ok(id)
    }

    /// Run `descriptor` on the calling thread and return its result directly.
    ///
    /// Bypasses the dispatcher. Useful for callers with no thread affinity.
    pub fn run_to_completion(
        &self,
        descriptor: LaunchDescriptor,
        timeout_secs: f64,
    ) -> Result<JobResult, SubmitError> {
        descriptor.validate()?;
        let timeout = timeout_from_secs(timeout_secs)?;
        let mode = BlockingMode::for_current_thread()?;
        let id = JobId::next();
        let mut job = Job::new(id, descriptor, timeout, None);
        let span = tracing::info_span!("job", job_id = %id);
        let result = mode.block_on(&self.handle, self.shared.execute(&mut job).instrument(span));
        job.advance(JobState::ResultDispatched);
        Ok(result)
    }
}

impl fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRunner")
            .field("options", &self.shared.options)
            .field("in_flight", &self.in_flight())
            .field("owns_runtime", &self.runtime.is_some())
            .finish()
    }
}

/// How the calling thread waits for a synchronous job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockingMode {
    /// Not inside a runtime: block the thread directly.
    Direct,
    /// On a multi-thread runtime: hand the worker off first.
    InPlace,
}

impl BlockingMode {
    fn for_current_thread() -> Result<Self, SubmitError> {
        match Handle::try_current() {
            Err(_) => Ok(Self::Direct),
            Ok(current) => match current.runtime_flavor() {
                RuntimeFlavor::CurrentThread => Err(SubmitError::SynchronousInRuntime),
                _ => Ok(Self::InPlace),
            },
        }
    }

    fn block_on<F: Future>(self, handle: &Handle, future: F) -> F::Output {
        match self {
            Self::Direct => handle.block_on(future),
            Self::InPlace => tokio::task::block_in_place(|| handle.block_on(future)),
        }
    }
}

/// Counts a job as in flight until dropped.
struct InFlight(Arc<Shared>);

impl InFlight {
    fn enter(shared: &Arc<Shared>) -> Self {
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(shared))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`JobRunner`]
#[derive(Default)]
pub struct JobRunnerBuilder {
    options: RunnerOptions,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    handle: Option<Handle>,
}

impl JobRunnerBuilder {
    #[must_use]
    pub fn options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    /// Where result callbacks run. Defaults to [`InlineDispatcher`].
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: impl Dispatcher + 'static) -> Self {
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    /// Run jobs on an existing tokio runtime instead of an owned one.
    #[must_use]
    pub fn handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    #[must_use]
    pub fn shell(mut self, shell: Shell) -> Self {
        self.options.shell = shell;
        self
    }

    #[must_use]
    pub const fn max_concurrent_jobs(mut self, limit: Option<usize>) -> Self {
        self.options.max_concurrent_jobs = limit;
        self
    }

    #[must_use]
    pub const fn max_captured_lines(mut self, limit: Option<usize>) -> Self {
        self.options.max_captured_lines = limit;
        self
    }

    #[must_use]
    pub const fn flush_partial_lines(mut self, flush: bool) -> Self {
        self.options.flush_partial_lines = flush;
        self
    }

    #[must_use]
    pub const fn default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.default_timeout = timeout;
        self
    }

    /// Build the runner, starting a worker pool unless a handle was given.
    pub fn build(self) -> io::Result<JobRunner> {
        let (handle, runtime) = match self.handle {
            Some(handle) => (handle, None),
            None => {
                let mut builder = tokio::runtime::Builder::new_multi_thread();
                builder.enable_all().thread_name("shjob-worker");
                if let Some(threads) = self.options.worker_threads {
                    builder.worker_threads(threads.max(1));
                }
                let runtime = builder.build()?;
                (
                    runtime.handle().clone(),
                    Some(Arc::new(OwnedRuntime(Some(runtime)))),
                )
            }
        };

        let limiter = self
            .options
            .max_concurrent_jobs
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        Ok(JobRunner {
            shared: Arc::new(Shared {
                options: self.options,
                dispatcher: self.dispatcher.unwrap_or_else(|| Arc::new(InlineDispatcher)),
                limiter,
                in_flight: AtomicUsize::new(0),
            }),
            handle,
            runtime,
        })
    }
}

// ============================================================================
// Execution
// ============================================================================

impl Shared {
    async fn execute_and_deliver(&self, mut job: Job) {
        let result = self.execute(&mut job).await;
        self.deliver(job, result);
    }

    /// Hand the result to the dispatcher. Consumes the job.
    fn deliver(&self, mut job: Job, result: JobResult) {
        let callback = job.take_callback();
        job.advance(JobState::ResultDispatched);

        match callback {
            Some(callback) => self
                .dispatcher
                .dispatch(Box::new(move || callback(result))),
            None => debug!(job_id = %job.id(), "No callback registered; result dropped"),
        }
    }

    /// Launch the process, pump its output and wait for it within the timeout.
    async fn execute(&self, job: &mut Job) -> JobResult {
        let id = job.id();
        let started_at = Utc::now();
        let clock = Instant::now();
        let command_line = job.descriptor().command_line.clone();
        let shell = &self.options.shell;
        job.advance(JobState::Running);

        let mut cmd = job.descriptor().to_command(shell);
        ProcessTree::prepare(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                let error = LaunchError::from_spawn(
                    &err,
                    &shell.program_name(),
                    job.descriptor().working_directory.as_deref(),
                );
                error!(job_id = %id, command = %command_line, error = %error, "Failed to launch process");
                job.advance(JobState::LaunchFailed);
                return JobResult::indeterminate(
                    id,
                    command_line,
                    JobOutcome::LaunchFailed { error },
                    started_at,
                    clock.elapsed(),
                );
            }
        };
        let mut tree = ProcessTree::attach(&child);
        debug!(job_id = %id, pid = ?child.id(), command = %command_line, "Process started");

        let (stdout_pipe, stderr_pipe) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            (stdout, _) => {
                let stream = if stdout.is_none() { "stdout" } else { "stderr" };
                tree.kill(&mut child);
                let _ = child.wait().await;
                let error = LaunchError::PipeUnavailable { stream };
                error!(job_id = %id, error = %error, "Failed to launch process");
                job.advance(JobState::LaunchFailed);
                return JobResult::indeterminate(
                    id,
                    command_line,
                    JobOutcome::LaunchFailed { error },
                    started_at,
                    clock.elapsed(),
                );
            }
        };

        let max_lines = self.options.max_captured_lines;
        let flush = self.options.flush_partial_lines;
        let mut stdout_task = tokio::spawn(pump_lines(
            stdout_pipe,
            LineBuffer::with_max_lines(max_lines),
            flush,
            StreamKind::Stdout,
        ));
        let mut stderr_task = tokio::spawn(pump_lines(
            stderr_pipe,
            LineBuffer::with_max_lines(max_lines),
            flush,
            StreamKind::Stderr,
        ));

        let stdin_pipe = child.stdin.take();
        let stdin_payload = job.descriptor().stdin.as_deref();
        let mut diagnostics: Vec<String> = Vec::new();

        let run = async {
            if let (Some(mut pipe), Some(payload)) = (stdin_pipe, stdin_payload) {
                match pipe.write_all(payload.as_bytes()).await {
                    Ok(()) => {
                        if let Err(err) = pipe.shutdown().await {
                            note_stdin_error(&mut diagnostics, &err);
                        }
                    }
                    Err(err) => note_stdin_error(&mut diagnostics, &err),
                }
                // Dropping the pipe closes stdin and signals end-of-input
                drop(pipe);
                debug!(job_id = %id, bytes = payload.len(), "Stdin written and closed");
            }

            child.wait().await
        };

        let finished = match job.timeout() {
            Some(limit) => tokio::time::timeout(limit, run).await.ok(),
            None => Some(run.await),
        };

        let Some(status) = finished else {
            let limit = job.timeout().unwrap_or_default();
            tree.kill(&mut child);
            // Reap so the process is confirmed gone before anyone hears about it
            if let Err(err) = child.wait().await {
                warn!(job_id = %id, error = %err, "Failed to reap killed process");
            }
            stdout_task.abort();
            stderr_task.abort();
            warn!(
                job_id = %id,
                command = %command_line,
                timeout_secs = limit.as_secs_f64(),
                "Process timed out and was killed"
            );
            job.advance(JobState::TimedOut);
            return JobResult::indeterminate(
                id,
                command_line,
                JobOutcome::TimedOut { timeout: limit },
                started_at,
                clock.elapsed(),
            );
        };

        let (stdout, stderr) =
            drain_readers(&mut tree, &mut child, &mut stdout_task, &mut stderr_task).await;
        let stdout_buffer = absorb_reader(stdout, StreamKind::Stdout, &mut diagnostics);
        let mut stderr_buffer = absorb_reader(stderr, StreamKind::Stderr, &mut diagnostics);

        let exit_code = match status {
            Ok(status) => exit_code_of(status),
            Err(err) => {
                diagnostics.push(format!("shjob: failed to wait for process: {err}"));
                -1
            }
        };
        for line in diagnostics {
            stderr_buffer.push_diagnostic(line);
        }

        let duration = clock.elapsed();
        info!(
            job_id = %id,
            exit_code,
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            stdout_lines = stdout_buffer.total_lines(),
            stderr_lines = stderr_buffer.total_lines(),
            "Process completed"
        );
        job.advance(JobState::Completed);
        JobResult::completed(
            id,
            command_line,
            stdout_buffer,
            stderr_buffer,
            exit_code,
            started_at,
            duration,
        )
    }
}

/// Reader task result, or why there is none.
type Joined = Result<ReaderOutput, String>;

/// Collect both readers once the process has exited.
///
/// Readers normally reach end-of-file right after exit. If a background
/// process still holds a pipe when the grace period ends, the process group
/// is killed and the readers get one more grace period before being aborted.
async fn drain_readers(
    tree: &mut ProcessTree,
    child: &mut Child,
    stdout_task: &mut JoinHandle<ReaderOutput>,
    stderr_task: &mut JoinHandle<ReaderOutput>,
) -> (Joined, Joined) {
    let deadline = tokio::time::Instant::now() + READER_DRAIN_GRACE;
    let mut stdout = tokio::time::timeout_at(deadline, &mut *stdout_task).await.ok();
    let mut stderr = tokio::time::timeout_at(deadline, &mut *stderr_task).await.ok();

    if stdout.is_none() || stderr.is_none() {
        debug!("Output pipes still open after process exit; killing process group");
        tree.kill(child);
        let deadline = tokio::time::Instant::now() + READER_DRAIN_GRACE;
        if stdout.is_none() {
            stdout = tokio::time::timeout_at(deadline, &mut *stdout_task).await.ok();
        }
        if stderr.is_none() {
            stderr = tokio::time::timeout_at(deadline, &mut *stderr_task).await.ok();
        }
    }

    (
        settle_reader(stdout, stdout_task, StreamKind::Stdout),
        settle_reader(stderr, stderr_task, StreamKind::Stderr),
    )
}

fn settle_reader(
    joined: Option<Result<ReaderOutput, tokio::task::JoinError>>,
    task: &JoinHandle<ReaderOutput>,
    kind: StreamKind,
) -> Joined {
    match joined {
        Some(Ok(output)) => Ok(output),
        Some(Err(err)) => Err(format!("shjob: {} reader failed: {err}", kind.as_str())),
        None => {
            task.abort();
            Err(format!(
                "shjob: {} still open after process exit; output discarded",
                kind.as_str()
            ))
        }
    }
}

fn absorb_reader(joined: Joined, kind: StreamKind, diagnostics: &mut Vec<String>) -> LineBuffer {
    match joined {
        Ok(ReaderOutput { buffer, error }) => {
            if let Some(err) = error {
                diagnostics.push(format!("shjob: error reading {}: {err}", kind.as_str()));
            }
            buffer
        }
        Err(message) => {
            diagnostics.push(message);
            LineBuffer::new()
        }
    }
}

fn note_stdin_error(diagnostics: &mut Vec<String>, err: &io::Error) {
    if err.kind() == io::ErrorKind::BrokenPipe {
        // The process exited or closed stdin without reading everything
        debug!(error = %err, "Process did not consume all of stdin");
    } else {
        diagnostics.push(format!("shjob: failed to write stdin: {err}"));
    }
}

/// Exit code of a finished process. Death by signal maps to `128 + signal`.
fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}
