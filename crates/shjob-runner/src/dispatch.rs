//! Execution-context dispatch
//!
//! Jobs run on worker threads, but their result callbacks are handed to a
//! [`Dispatcher`] which decides where the callback actually executes. Callers
//! that own single-threaded state (an event loop, a UI thread) use an
//! [`ExecutionContext`] and drain it from the owning thread, so the callback
//! can touch that state without locking.

use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::{Duration, Instant};

/// A unit of work queued onto an execution context.
pub type DispatchTask = Box<dyn FnOnce() + Send + 'static>;

/// Delivers tasks to the context that should run them.
///
/// Implementations must be callable from many workers at once without
/// serialising unrelated jobs behind one lock.
pub trait Dispatcher: Send + Sync {
    /// Hand `task` to the execution context. Must not run it twice.
    fn dispatch(&self, task: DispatchTask);
}

/// Runs each task immediately on the worker that finished the job.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, task: DispatchTask) {
        task();
    }
}

/// Sending half of an [`ExecutionContext`]. Cheap to clone.
#[derive(Clone)]
pub struct ContextDispatcher {
    sender: Sender<DispatchTask>,
}

impl Dispatcher for ContextDispatcher {
    fn dispatch(&self, task: DispatchTask) {
        if self.sender.send(task).is_err() {
            tracing::warn!("Execution context is gone; dropping result callback");
        }
    }
}

impl fmt::Debug for ContextDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextDispatcher").finish_non_exhaustive()
    }
}

/// A queue of callbacks drained by the one thread that owns it.
///
/// The context is `Send` but not `Sync`: it can be moved to the owning thread
/// and is then only ever pumped from there.
///
/// # Example
///
/// ```rust
/// use shjob_runner::{Dispatcher, ExecutionContext};
///
/// let context = ExecutionContext::new();
/// let dispatcher = context.dispatcher();
///
/// std::thread::spawn(move || dispatcher.dispatch(Box::new(|| println!("on the owner"))))
///     .join()
///     .unwrap();
///
/// assert_eq!(context.run_pending(), 1);
/// ```
pub struct ExecutionContext {
    sender: Sender<DispatchTask>,
    receiver: Receiver<DispatchTask>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver }
    }

    /// A dispatcher that queues onto this context.
    #[must_use]
    pub fn dispatcher(&self) -> ContextDispatcher {
        ContextDispatcher {
            sender: self.sender.clone(),
        }
    }

    /// Run every task already queued, without blocking. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(task) => {
                    task();
                    ran += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return ran,
            }
        }
    }

    /// Wait up to `timeout` for one task and run it. Returns whether one ran.
    pub fn run_next(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(task) => {
                task();
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Run tasks as they arrive until `count` have run or `deadline` passes.
    ///
    /// Returns how many ran.
    pub fn run_until(&self, count: usize, deadline: Instant) -> usize {
        let mut ran = 0;
        while ran < count {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if self.run_next(deadline - now) {
                ran += 1;
            }
        }
        ran
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_inline_dispatcher_runs_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        InlineDispatcher.dispatch(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_context_runs_on_owner_thread() {
        let context = ExecutionContext::new();
        let owner = thread::current().id();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let dispatcher = context.dispatcher();
                let seen = Arc::clone(&seen);
                thread::spawn(move || {
                    dispatcher.dispatch(Box::new(move || {
                        seen.lock().unwrap().push(thread::current().id());
                    }));
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(context.run_pending(), 4);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|id| *id == owner));
    }

    #[test]
    fn test_run_pending_on_empty_context() {
        let context = ExecutionContext::new();
        assert_eq!(context.run_pending(), 0);
    }

    #[test]
    fn test_run_next_times_out() {
        let context = ExecutionContext::new();
        assert!(!context.run_next(Duration::from_millis(10)));
    }

    #[test]
    fn test_run_until_stops_at_count() {
        let context = ExecutionContext::new();
        let dispatcher = context.dispatcher();
        for _ in 0..3 {
            dispatcher.dispatch(Box::new(|| {}));
        }
        let ran = context.run_until(2, Instant::now() + Duration::from_secs(5));
        assert_eq!(ran, 2);
        assert_eq!(context.run_pending(), 1);
    }

    #[test]
    fn test_dispatch_after_context_dropped_does_not_panic() {
        let context = ExecutionContext::new();
        let dispatcher = context.dispatcher();
        drop(context);
        dispatcher.dispatch(Box::new(|| panic!("must not run")));
    }
}
