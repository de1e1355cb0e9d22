// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Serialized execution of named camera jobs.
//!
//! Camera operations finish asynchronously and on threads the application
//! does not control, but the engine needs them to behave like an ordered
//! sequence. The [`Orchestrator`] queues every job and only starts a job once
//! every earlier job on the same worker has completed, where "completed"
//! includes the future returned by the job and covers both success and
//! failure.
//!
//! Jobs never block their worker while they wait: a job returning a future is
//! polled on its worker runtime and the next job is started from the
//! completion of that future.
//!
//! The queue lock is only held to add, pick and remove jobs, never while a job
//! is running.

use crate::{error::JobError, worker::Worker};
use futures::{future::BoxFuture, FutureExt};
use std::{
    collections::{HashSet, VecDeque},
    future::Future,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    task::{Context, Poll},
    time::{Duration, Instant},
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Job name whose worker runs the timers of delayed jobs.
pub const SYNC_JOB: &str = "_sync";

/// Collaborators the orchestrator needs from the surrounding engine.
pub trait OrchestratorCallback: Send + Sync + 'static {
    /// Returns the worker that executes jobs called `job`.
    fn job_worker(&self, job: &str) -> Arc<Worker>;

    /// Receives failures of jobs scheduled with `dispatch_exceptions`.
    fn handle_job_exception(&self, job: &str, error: &JobError);
}

/// Completion handle of a scheduled job.
///
/// Resolves once the job and the future it returned have completed. Jobs that
/// are removed before running resolve with [`JobError::Cancelled`].
#[must_use = "dropping a JobHandle does not cancel the job"]
#[derive(Debug)]
pub struct JobHandle<T> {
    rx: oneshot::Receiver<Result<T, JobError>>,
}

impl<T> JobHandle<T> {
    /// Blocks the current thread until the job completes.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn wait(self) -> Result<T, JobError> {
        self.rx.blocking_recv().unwrap_or(Err(JobError::Cancelled))
    }
}

impl<T> Future for JobHandle<T> {
    type Output = Result<T, JobError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(JobError::Cancelled)))
    }
}

/// Calls `job` and awaits its future, turning panics in either step into
/// [`JobError::Panicked`].
pub(crate) async fn guarded<T, F, Fut>(job: F) -> Result<T, JobError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, JobError>>,
{
    let future = match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(future) => future,
        Err(payload) => return Err(JobError::panicked(payload)),
    };
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(JobError::panicked(payload)),
    }
}

/// What a job reports back to the queue once its future has completed.
struct Completion {
    error: Option<JobError>,
    /// Resolves the typed completion handle.
    resolve: Box<dyn FnOnce() + Send>,
}

type Runner = Box<dyn FnOnce() -> BoxFuture<'static, Completion> + Send>;

struct Job {
    id: u64,
    name: String,
    worker: Arc<Worker>,
    start: Instant,
    delayed: bool,
    dispatch_exceptions: bool,
    state_change: bool,
    /// Taken when the job starts; dropping it cancels the handle.
    runner: Option<Runner>,
}

impl Job {
    fn is_running(&self) -> bool {
        self.runner.is_none()
    }
}

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    next_id: u64,
}

struct Inner {
    callback: Arc<dyn OrchestratorCallback>,
    queue: Mutex<Queue>,
}

/// Options for [`Orchestrator::schedule_job`].
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct JobOptions {
    pub dispatch_exceptions: bool,
    pub delay: Duration,
    pub state_change: bool,
}

/// Serializes named jobs over engine-provided workers.
///
/// Cloning returns another handle to the same queue.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(callback: Arc<dyn OrchestratorCallback>) -> Self {
        Self {
            inner: Arc::new(Inner {
                callback,
                queue: Mutex::new(Queue::default()),
            }),
        }
    }

    /// Schedules a synchronous job.
    pub fn schedule<F>(&self, name: &str, dispatch_exceptions: bool, job: F) -> JobHandle<()>
    where
        F: FnOnce() -> Result<(), JobError> + Send + 'static,
    {
        self.schedule_delayed(name, dispatch_exceptions, Duration::ZERO, job)
    }

    /// Schedules a synchronous job that starts no sooner than `min_delay`
    /// from now.
    ///
    /// Delayed jobs coalesce: scheduling a delayed job cancels any delayed job
    /// with the same name that has not started yet.
    pub fn schedule_delayed<F>(
        &self,
        name: &str,
        dispatch_exceptions: bool,
        min_delay: Duration,
        job: F,
    ) -> JobHandle<()>
    where
        F: FnOnce() -> Result<(), JobError> + Send + 'static,
    {
        let options = JobOptions {
            dispatch_exceptions,
            delay: min_delay,
            state_change: false,
        };
        self.schedule_job(name, options, move || async move { job() })
    }

    /// Schedules a job that returns a future. The next job on the same worker
    /// does not start before that future completes.
    pub fn schedule_async<T, F, Fut>(
        &self,
        name: &str,
        dispatch_exceptions: bool,
        job: F,
    ) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, JobError>> + Send + 'static,
    {
        let options = JobOptions {
            dispatch_exceptions,
            ..JobOptions::default()
        };
        self.schedule_job(name, options, job)
    }

    pub(crate) fn schedule_job<T, F, Fut>(
        &self,
        name: &str,
        options: JobOptions,
        job: F,
    ) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, JobError>> + Send + 'static,
    {
        info!(job = %name, delay = ?options.delay, "scheduling");
        let (tx, rx) = oneshot::channel();
        let runner: Runner = Box::new(move || {
            async move {
                let result = guarded(job).await;
                let error = result.as_ref().err().cloned();
                Completion {
                    error,
                    resolve: Box::new(move || {
                        let _ = tx.send(result);
                    }),
                }
            }
            .boxed()
        });

        let worker = self.inner.callback.job_worker(name);
        {
            let mut queue = self.inner.lock();
            if !options.delay.is_zero() {
                queue.cancel(name, 0, |job| job.delayed);
            }
            let id = queue.next_id;
            queue.next_id += 1;
            queue.jobs.push_back(Job {
                id,
                name: name.to_string(),
                worker,
                start: Instant::now() + options.delay,
                delayed: !options.delay.is_zero(),
                dispatch_exceptions: options.dispatch_exceptions,
                state_change: options.state_change,
                runner: Some(runner),
            });
        }

        if options.delay.is_zero() {
            self.inner.sync();
        } else {
            let weak = Arc::downgrade(&self.inner);
            self.inner
                .callback
                .job_worker(SYNC_JOB)
                .post(options.delay, move || sync_weak(&weak));
        }
        JobHandle { rx }
    }

    /// Cancels every job called `name` that has not started yet, including
    /// pending delayed jobs. A running job is not interrupted.
    pub fn remove(&self, name: &str) {
        self.trim(name, 0);
    }

    /// Cancels the oldest not-started jobs called `name` so that at most
    /// `allowed` of them remain queued.
    pub fn trim(&self, name: &str, allowed: usize) {
        let removed = self.inner.lock().cancel(name, allowed, |_| true);
        debug!(job = %name, allowed, removed, "trim");
    }

    /// Cancels every job that has not started yet.
    pub fn reset(&self) {
        let removed = {
            let mut queue = self.inner.lock();
            let before = queue.jobs.len();
            queue.jobs.retain(Job::is_running);
            before - queue.jobs.len()
        };
        debug!(removed, "reset");
    }

    /// Number of queued or running jobs.
    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if a queued or running job is called `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().jobs.iter().any(|job| job.name == name)
    }

    pub(crate) fn has_pending_state_change(&self) -> bool {
        self.inner.lock().jobs.iter().any(|job| job.state_change)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.inner.lock();
        let names: Vec<&str> = queue.jobs.iter().map(|job| job.name.as_str()).collect();
        f.debug_struct("Orchestrator").field("jobs", &names).finish()
    }
}

impl Queue {
    /// Drops not-started jobs called `name` matching `filter`, oldest first,
    /// keeping the `allowed` most recent ones. Returns how many were dropped.
    fn cancel(&mut self, name: &str, allowed: usize, filter: impl Fn(&Job) -> bool) -> usize {
        let candidates: Vec<u64> = self
            .jobs
            .iter()
            .filter(|job| job.name == name && !job.is_running() && filter(job))
            .map(|job| job.id)
            .collect();
        let excess = candidates.len().saturating_sub(allowed);
        let doomed: HashSet<u64> = candidates.into_iter().take(excess).collect();
        self.jobs.retain(|job| !doomed.contains(&job.id));
        excess
    }
}

fn sync_weak(inner: &Weak<Inner>) {
    if let Some(inner) = inner.upgrade() {
        inner.sync();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts every job that is due and whose worker is idle.
    fn sync(self: &Arc<Self>) {
        let mut started = Vec::new();
        {
            let mut queue = self.lock();
            let now = Instant::now();
            let mut busy: HashSet<String> = queue
                .jobs
                .iter()
                .filter(|job| job.is_running())
                .map(|job| job.worker.name().to_string())
                .collect();

            for job in queue.jobs.iter_mut() {
                if job.is_running() || job.start > now || busy.contains(job.worker.name()) {
                    continue;
                }
                if let Some(runner) = job.runner.take() {
                    busy.insert(job.worker.name().to_string());
                    started.push((
                        job.id,
                        job.name.clone(),
                        job.dispatch_exceptions,
                        Arc::clone(&job.worker),
                        runner,
                    ));
                }
            }
        }

        // Spawning never runs the job inline, but keep it out of the lock
        // anyway so a slow spawn cannot stall producers.
        for (id, name, dispatch_exceptions, worker, runner) in started {
            self.execute(id, name, dispatch_exceptions, &worker, runner);
        }
    }

    fn execute(
        self: &Arc<Self>,
        id: u64,
        name: String,
        dispatch_exceptions: bool,
        worker: &Worker,
        runner: Runner,
    ) {
        let started = Started {
            inner: Arc::clone(self),
            id,
        };
        worker.spawn(async move {
            info!(job = %name, "executing");
            let completion = runner().await;
            match &completion.error {
                None => info!(job = %name, "finished"),
                Some(JobError::Cancelled) => info!(job = %name, "finished because aborted"),
                Some(err) => {
                    warn!(job = %name, error = %err, "finished with error");
                    if dispatch_exceptions {
                        let callback = &started.inner.callback;
                        let dispatch = || callback.handle_job_exception(&name, err);
                        if panic::catch_unwind(AssertUnwindSafe(dispatch)).is_err() {
                            warn!(job = %name, "exception handler panicked");
                        }
                    }
                }
            }
            // Observers woken by the handle must not find the job queued.
            started.inner.remove(id);
            (completion.resolve)();
            drop(started);
        });
    }

    fn remove(&self, id: u64) {
        self.lock().jobs.retain(|job| job.id != id);
    }
}

/// Owned by the task of a started job. Dropping it removes the job and starts
/// the next ones, whether the task completed, panicked or was dropped by a
/// worker that shut down.
struct Started {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for Started {
    fn drop(&mut self) {
        self.inner.remove(self.id);
        self.inner.sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guarded_catches_panics() {
        let res: Result<(), JobError> = guarded(|| -> futures::future::Ready<_> {
            panic!("sync boom");
        })
        .await;
        assert!(matches!(res, Err(JobError::Panicked(ref m)) if m == "sync boom"));

        let res: Result<(), JobError> = guarded(|| async { panic!("async boom") }).await;
        assert!(matches!(res, Err(JobError::Panicked(ref m)) if m == "async boom"));

        let res = guarded(|| async { Ok::<_, JobError>(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }
}
