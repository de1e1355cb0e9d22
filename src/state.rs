// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Device states and the state-gated orchestrator.

use crate::{
    error::JobError,
    orchestrator::{guarded, JobHandle, JobOptions, Orchestrator, OrchestratorCallback},
};
use std::{
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tracing::{debug, warn};

/// How much of the hardware session is currently set up.
///
/// States are totally ordered: `Off < Engine < Bind < Preview`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CameraState {
    #[default]
    Off,
    Engine,
    Bind,
    Preview,
}

impl CameraState {
    pub fn is_at_least(self, other: CameraState) -> bool {
        self >= other
    }
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CameraState::Off => "OFF",
            CameraState::Engine => "ENGINE",
            CameraState::Bind => "BIND",
            CameraState::Preview => "PREVIEW",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct States {
    current: CameraState,
    target: CameraState,
    change_count: u64,
}

#[derive(Debug, Default)]
struct SharedStates(Mutex<States>);

impl SharedStates {
    fn lock(&self) -> MutexGuard<'_, States> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> CameraState {
        self.lock().current
    }
}

/// An [`Orchestrator`] that tracks the [`CameraState`] and gates jobs on it.
///
/// Transitions are re-checked when they reach the front of the queue, not
/// when they are scheduled, so a teardown scheduled in between is observed.
#[derive(Clone)]
pub struct StateOrchestrator {
    orchestrator: Orchestrator,
    states: Arc<SharedStates>,
}

impl StateOrchestrator {
    pub fn new(callback: Arc<dyn OrchestratorCallback>) -> Self {
        Self {
            orchestrator: Orchestrator::new(callback),
            states: Arc::default(),
        }
    }

    /// The plain orchestrator underneath, sharing the same queue.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn current_state(&self) -> CameraState {
        self.states.current()
    }

    /// Destination of the most recently scheduled transition, or the current
    /// state once that transition has finished.
    pub fn target_state(&self) -> CameraState {
        self.states.lock().target
    }

    /// True while a scheduled transition has not completed. Callers use this
    /// to avoid submitting overlapping transitions.
    pub fn has_pending_state_change(&self) -> bool {
        self.orchestrator.has_pending_state_change()
    }

    /// Schedules a transition from `from` to `to`.
    ///
    /// When the job reaches the front of the queue and the current state is
    /// no longer `from`, the job is not run and the handle resolves with
    /// [`JobError::Cancelled`].
    ///
    /// An advancing transition only moves the state to `to` if the job
    /// succeeds. A teardown (where `to` is lower than `from`) always moves the
    /// state to `to`, even when the job fails: a failed teardown still leaves
    /// the hardware unusable at the higher state.
    pub fn schedule_state_change<T, F, Fut>(
        &self,
        from: CameraState,
        to: CameraState,
        dispatch_exceptions: bool,
        job: F,
    ) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, JobError>> + Send + 'static,
    {
        let change_id = {
            let mut states = self.states.lock();
            states.change_count += 1;
            states.target = to;
            states.change_count
        };

        let teardown = !to.is_at_least(from);
        let name = if teardown {
            format!("{from} << {to}")
        } else {
            format!("{from} >> {to}")
        };

        let states = Arc::clone(&self.states);
        let job_name = name.clone();
        let options = JobOptions {
            dispatch_exceptions,
            state_change: true,
            ..JobOptions::default()
        };
        self.orchestrator.schedule_job(&name, options, move || async move {
            let current = states.current();
            let result = if current != from {
                warn!(job = %job_name, %current, %from, %to, "state mismatch, aborting");
                Err(JobError::Cancelled)
            } else {
                let result = guarded(job).await;
                if result.is_ok() || teardown {
                    states.lock().current = to;
                    debug!(job = %job_name, state = %to, "state changed");
                }
                result
            };

            let mut states = states.lock();
            if states.change_count == change_id {
                states.target = states.current;
            }
            result
        })
    }

    /// Schedules a job that only runs if the current state is at least
    /// `at_least` when it is executed. Otherwise it completes successfully
    /// without running.
    pub fn schedule_stateful<F>(&self, name: &str, at_least: CameraState, job: F) -> JobHandle<()>
    where
        F: FnOnce() -> Result<(), JobError> + Send + 'static,
    {
        self.schedule_stateful_delayed(name, at_least, Duration::ZERO, job)
    }

    /// Delayed variant of [`StateOrchestrator::schedule_stateful`].
    pub fn schedule_stateful_delayed<F>(
        &self,
        name: &str,
        at_least: CameraState,
        delay: Duration,
        job: F,
    ) -> JobHandle<()>
    where
        F: FnOnce() -> Result<(), JobError> + Send + 'static,
    {
        let states = Arc::clone(&self.states);
        let job_name = name.to_string();
        self.orchestrator
            .schedule_delayed(name, true, delay, move || {
                let current = states.current();
                if current.is_at_least(at_least) {
                    job()
                } else {
                    debug!(job = %job_name, %current, %at_least, "skipped, state too low");
                    Ok(())
                }
            })
    }

    pub fn schedule<F>(&self, name: &str, dispatch_exceptions: bool, job: F) -> JobHandle<()>
    where
        F: FnOnce() -> Result<(), JobError> + Send + 'static,
    {
        self.orchestrator.schedule(name, dispatch_exceptions, job)
    }

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
        self.orchestrator
            .schedule_delayed(name, dispatch_exceptions, min_delay, job)
    }

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
        self.orchestrator.schedule_async(name, dispatch_exceptions, job)
    }

    pub fn remove(&self, name: &str) {
        self.orchestrator.remove(name);
    }

    pub fn trim(&self, name: &str, allowed: usize) {
        self.orchestrator.trim(name, allowed);
    }

    pub fn reset(&self) {
        self.orchestrator.reset();
    }
}

impl fmt::Debug for StateOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let states = self.states.lock();
        f.debug_struct("StateOrchestrator")
            .field("current", &states.current)
            .field("target", &states.target)
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_order() {
        assert!(CameraState::Preview.is_at_least(CameraState::Bind));
        assert!(CameraState::Off.is_at_least(CameraState::Off));
        assert!(!CameraState::Engine.is_at_least(CameraState::Bind));
        assert_eq!(CameraState::default(), CameraState::Off);
        assert_eq!(CameraState::Bind.to_string(), "BIND");
    }
}
