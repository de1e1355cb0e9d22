// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Named single-thread workers.
//!
//! Each [`Worker`] owns one OS thread driving a current-thread tokio runtime.
//! Everything spawned on a worker, including the continuations of a future
//! after each `.await`, runs on that thread. This is what lets the
//! orchestrator resume a suspended job on the same worker it started on.
//!
//! Workers are shared through a [`WorkerRegistry`] owned by the engine, so
//! that jobs with the same worker name reuse the same thread for the lifetime
//! of the registry.

use std::{
    collections::HashMap,
    future::Future,
    io,
    sync::{Arc, Mutex, PoisonError},
    thread::{self, JoinHandle, ThreadId},
    time::Duration,
};
use tokio::{
    runtime::{Builder, Handle},
    sync::oneshot,
    task::JoinHandle as TaskHandle,
};
use tracing::{debug, info, warn};

/// A named thread running a current-thread tokio runtime.
pub struct Worker {
    name: String,
    handle: Handle,
    thread_id: ThreadId,
    thread: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl Worker {
    /// Starts a new worker thread called `name`.
    ///
    /// The call returns once the runtime is ready to accept tasks.
    pub fn new(name: &str) -> io::Result<Arc<Self>> {
        let runtime = Builder::new_current_thread().enable_time().build()?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                // Resolves on an explicit shutdown or when the sender is
                // dropped along with the worker.
                let _ = runtime.block_on(shutdown_rx);
                debug!("worker runtime stopped");
            })?;

        info!(worker = %name, "worker started");
        Ok(Arc::new(Self {
            name: name.to_string(),
            handle,
            thread_id: thread.thread().id(),
            thread: Mutex::new(Some(thread)),
            shutdown: Mutex::new(Some(shutdown_tx)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when called from this worker's own thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// True until [`Worker::destroy`] is called or the thread exits.
    pub fn is_alive(&self) -> bool {
        let running = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished());
        running && self.shutdown_sender_present()
    }

    fn shutdown_sender_present(&self) -> bool {
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Spawns a future on this worker.
    pub fn spawn<F>(&self, future: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Runs `action` on this worker after `delay`.
    pub fn post<F>(&self, delay: Duration, action: F) -> TaskHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            action();
        })
    }

    /// Stops the runtime. Tasks that have not completed are dropped, which
    /// cancels any completion handle they were meant to resolve.
    pub fn destroy(&self) {
        let sender = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }

        // Joining from the worker thread itself would never return.
        if self.is_current() {
            return;
        }
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                warn!(worker = %self.name, "worker thread panicked");
            }
            debug!(worker = %self.name, "worker joined");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("thread", &self.thread_id)
            .finish()
    }
}

/// Engine-owned cache of workers keyed by name.
///
/// Repeated lookups of the same name return the same worker while it is
/// alive. A worker that has been destroyed is replaced on the next lookup.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: Mutex<HashMap<String, Arc<Worker>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the worker called `name`, starting it if needed.
    pub fn get(&self, name: &str) -> io::Result<Arc<Worker>> {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(worker) = workers.get(name) {
            if worker.is_alive() {
                return Ok(Arc::clone(worker));
            }
            warn!(worker = %name, "cached worker is not alive, replacing");
            workers.remove(name);
        }

        let worker = Worker::new(name)?;
        workers.insert(name.to_string(), Arc::clone(&worker));
        Ok(worker)
    }

    /// Number of cached workers.
    pub fn len(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops and forgets every worker.
    pub fn destroy(&self) {
        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, w)| w)
            .collect();
        for worker in workers {
            worker.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_post_runs_on_worker_thread() {
        let worker = Worker::new("test-worker").unwrap();
        let (tx, rx) = mpsc::channel();
        let w = Arc::clone(&worker);
        worker.post(Duration::ZERO, move || {
            tx.send((thread::current().name().map(str::to_owned), w.is_current()))
                .unwrap();
        });
        let (name, current) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("test-worker"));
        assert!(current);
        assert!(!worker.is_current());
    }

    #[test]
    fn test_registry_reuses_and_replaces() {
        let registry = WorkerRegistry::new();
        let a = registry.get("camera").unwrap();
        let b = registry.get("camera").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        a.destroy();
        assert!(!a.is_alive());
        let c = registry.get("camera").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert!(c.is_alive());
        assert_eq!(registry.len(), 1);
    }
}
