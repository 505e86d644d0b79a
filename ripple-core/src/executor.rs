//! Deferred Executors
//!
//! Watchers with [`FlushMode::Post`](crate::reactive::FlushMode::Post) do not
//! run their job inside `trigger`. They hand it to a [`DeferredExecutor`],
//! which runs it "after the current synchronous phase drains".
//!
//! Three executors are provided:
//!
//! - [`ManualExecutor`]: queues jobs until [`DeferredExecutor::flush`] is
//!   called. The runtime's default; deterministic in tests.
//! - [`ImmediateExecutor`]: runs the job inline, turning `post` into `sync`.
//! - [`TokioExecutor`]: spawns each job as a task on a tokio runtime.
//!
//! The runtime enqueues one job per trigger. Nothing is coalesced: two
//! triggers before a flush produce two jobs.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;

/// A unit of deferred work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Capability to run a job later.
pub trait DeferredExecutor: Send + Sync {
    /// Queue `job` for later execution.
    fn schedule(&self, job: Job);

    /// Run queued jobs, for executors that keep a queue.
    ///
    /// Returns the number of jobs that ran.
    fn flush(&self) -> usize {
        0
    }

    /// Number of jobs waiting to run.
    fn pending(&self) -> usize {
        0
    }
}

/// Queues jobs until they are pumped with [`flush`](DeferredExecutor::flush).
#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<VecDeque<Job>>,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeferredExecutor for ManualExecutor {
    fn schedule(&self, job: Job) {
        self.queue.lock().push_back(job);
    }

    /// Drains the queue, including jobs scheduled by jobs that ran.
    fn flush(&self) -> usize {
        let mut ran = 0;
        loop {
            // Pop under the lock, run without it: jobs may schedule more jobs.
            let next = self.queue.lock().pop_front();
            let Some(job) = next else {
                break;
            };
            job();
            ran += 1;
        }
        if ran > 0 {
            tracing::trace!(jobs = ran, "flushed deferred jobs");
        }
        ran
    }

    fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl fmt::Debug for ManualExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualExecutor")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Runs every job as soon as it is scheduled.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateExecutor;

impl DeferredExecutor for ImmediateExecutor {
    fn schedule(&self, job: Job) {
        job();
    }
}

/// Spawns each job onto a tokio runtime.
///
/// Each job runs to completion on whichever worker picks it up. Reads are
/// attributed per thread, so multi-thread runtimes work, but jobs from one
/// trigger may then run concurrently.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

impl TokioExecutor {
    /// Bind to the tokio runtime of the calling task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime; see [`Self::try_current`].
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }

    /// Bind to the calling task's tokio runtime, if there is one.
    pub fn try_current() -> Option<Self> {
        tokio::runtime::Handle::try_current()
            .ok()
            .map(|handle| Self { handle })
    }

    pub fn from_handle(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }
}

impl DeferredExecutor for TokioExecutor {
    fn schedule(&self, job: Job) {
        self.handle.spawn(async move { job() });
    }
}
