// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst Camera Engine Library
//!
//! This library provides the coordination backbone of a camera engine. Device
//! operations complete asynchronously and report back on threads the
//! application does not control; the engine uses these primitives to make
//! them behave like a deterministic, ordered sequence while it recycles the
//! large preview buffers the hardware fills.
//!
//! ## Features
//!
//! - **Job Orchestration**: Serialize named jobs over named worker threads,
//!   waiting on asynchronous jobs without blocking their worker.
//! - **State Gating**: Track the device state (`OFF < ENGINE < BIND <
//!   PREVIEW`) and drop transitions made stale by a concurrent teardown.
//! - **3A Locking**: Converge and lock auto exposure, auto focus and auto
//!   white balance from the per-frame capture results.
//! - **Rotation Offsets**: Reconcile the sensor, display, device and output
//!   coordinate systems.
//! - **Frame Pooling**: Bounded reuse of preview buffers with copy-on-freeze.
//!
//! ## Example
//!
//! ```no_run
//! use edgefirst_camera_engine::{
//!     error::JobError,
//!     orchestrator::OrchestratorCallback,
//!     state::{CameraState, StateOrchestrator},
//!     worker::{Worker, WorkerRegistry},
//! };
//! use std::sync::Arc;
//!
//! struct Engine {
//!     workers: WorkerRegistry,
//! }
//!
//! impl OrchestratorCallback for Engine {
//!     fn job_worker(&self, _job: &str) -> Arc<Worker> {
//!         self.workers.get("CameraEngine").expect("worker thread")
//!     }
//!
//!     fn handle_job_exception(&self, job: &str, error: &JobError) {
//!         eprintln!("{job} failed: {error}");
//!     }
//! }
//!
//! # fn main() -> Result<(), JobError> {
//! let engine = Arc::new(Engine { workers: WorkerRegistry::new() });
//! let orchestrator = StateOrchestrator::new(engine);
//! orchestrator
//!     .schedule_state_change(CameraState::Off, CameraState::Engine, true, || async {
//!         // open the device
//!         Ok(())
//!     })
//!     .wait()?;
//! assert_eq!(orchestrator.current_state(), CameraState::Engine);
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod error;
pub mod frame;
pub mod locking;
pub mod offset;
pub mod orchestrator;
pub mod state;
pub mod worker;
