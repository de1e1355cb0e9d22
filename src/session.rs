// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::args::Args;
use edgefirst_camera_engine::{
    capture::{
        AeMode, AeState, AfMode, AfState, AwbMode, AwbState, Capabilities, CaptureRequest,
        CaptureResult, HardwareLevel,
    },
    error::{BoxError, JobError},
    frame::{Frame, FrameManager, ImageFormat},
    locking::{Locker, LockerCallback, LockingCallback, MeteringPoint},
    offset::{Angles, Axis, Reference},
    orchestrator::OrchestratorCallback,
    state::{CameraState, StateOrchestrator},
    worker::{Worker, WorkerRegistry},
};
use std::{
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::{Duration, Instant},
};
use tracing::{debug, error, info, instrument, trace, warn};

pub const ENGINE_WORKER: &str = "CameraEngine";
pub const FRAME_WORKER: &str = "FrameProcessing";
const FRAME_JOB: &str = "frame";
const FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Maps job names to workers and reports failed jobs.
pub struct Engine {
    workers: WorkerRegistry,
    fallback: Arc<Worker>,
    failures: AtomicUsize,
}

impl Engine {
    pub fn new() -> io::Result<Self> {
        let workers = WorkerRegistry::new();
        let fallback = workers.get(ENGINE_WORKER)?;
        workers.get(FRAME_WORKER)?;
        Ok(Self {
            workers,
            fallback,
            failures: AtomicUsize::new(0),
        })
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn destroy(&self) {
        self.workers.destroy();
    }
}

impl OrchestratorCallback for Engine {
    fn job_worker(&self, job: &str) -> Arc<Worker> {
        let name = if job == FRAME_JOB {
            FRAME_WORKER
        } else {
            ENGINE_WORKER
        };
        match self.workers.get(name) {
            Ok(worker) => worker,
            Err(err) => {
                error!(worker = name, error = %err, "cannot start worker, using fallback");
                Arc::clone(&self.fallback)
            }
        }
    }

    fn handle_job_exception(&self, job: &str, error: &JobError) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        error!(job, %error, "camera job failed");
    }
}

/// Stand-in for the device: answers each request with a result whose 3A
/// states converge a fixed number of frames after the request last changed.
pub struct SimulatedSensor {
    converge_after: usize,
    frames: usize,
    since_change: usize,
    last_request: Option<CaptureRequest>,
}

impl SimulatedSensor {
    pub fn new(converge_after: usize) -> Self {
        Self {
            converge_after,
            frames: 0,
            since_change: 0,
            last_request: None,
        }
    }

    pub fn capture(&mut self, request: &CaptureRequest) -> CaptureResult {
        self.frames += 1;
        if self.last_request.as_ref() != Some(request) {
            self.since_change = 0;
            self.last_request = Some(request.clone());
        }
        self.since_change += 1;
        let converged = self.since_change >= self.converge_after;

        let ae_state = match (request.ae_mode, request.ae_lock, converged) {
            (None | Some(AeMode::Off), _, _) => AeState::Inactive,
            (_, true, true) => AeState::Locked,
            (_, false, true) => AeState::Converged,
            (_, _, false) => AeState::Searching,
        };
        let af_state = match (request.af_mode, converged) {
            (None | Some(AfMode::Off), _) => AfState::Inactive,
            (Some(AfMode::Auto), true) => AfState::FocusedLocked,
            (Some(AfMode::Auto), false) => AfState::ActiveScan,
            (_, true) => AfState::PassiveFocused,
            (_, false) => AfState::PassiveScan,
        };
        let awb_state = match (request.awb_mode, request.awb_lock, converged) {
            (Some(AwbMode::Auto), true, true) => AwbState::Locked,
            (Some(AwbMode::Auto), false, true) => AwbState::Converged,
            (Some(AwbMode::Auto), _, false) => AwbState::Searching,
            _ => AwbState::Inactive,
        };

        CaptureResult {
            // Every fourth result arrives split, with a partial first.
            partial: self.frames % 4 == 0,
            ae_state: Some(ae_state),
            af_mode: request.af_mode,
            af_state: Some(af_state),
            awb_state: Some(awb_state),
        }
    }
}

#[derive(Default)]
struct LockEvents {
    request_changes: AtomicUsize,
    outcome: Mutex<Option<bool>>,
}

impl LockingCallback for LockEvents {
    fn on_request_changed(&self) {
        self.request_changes.fetch_add(1, Ordering::Relaxed);
        debug!("request changed, resubmitting");
    }
}

impl LockerCallback for LockEvents {
    fn on_locked(&self, point: Option<MeteringPoint>, success: bool) {
        info!(?point, success, "3A locked");
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(success);
    }

    fn on_unlocked(&self, point: Option<MeteringPoint>) {
        info!(?point, "3A unlocked");
    }
}

fn default_capabilities() -> Capabilities {
    Capabilities {
        hardware_level: Some(HardwareLevel::Full),
        af_available_modes: vec![AfMode::Off, AfMode::Auto, AfMode::ContinuousPicture],
    }
}

fn preview_request() -> CaptureRequest {
    CaptureRequest {
        ae_mode: Some(AeMode::On),
        af_mode: Some(AfMode::ContinuousPicture),
        awb_mode: Some(AwbMode::Auto),
        ..CaptureRequest::default()
    }
}

/// Shared device side of the session, touched only from engine jobs.
struct Device {
    sensor: SimulatedSensor,
    request: CaptureRequest,
    last_result: Option<CaptureResult>,
    locker: Option<Locker<LockEvents>>,
}

impl Device {
    fn capture(&mut self) -> CaptureResult {
        let result = self.sensor.capture(&self.request);
        if !result.partial {
            self.last_result = Some(result.clone());
        }
        result
    }
}

fn lock_device(device: &Mutex<Device>) -> std::sync::MutexGuard<'_, Device> {
    device.lock().unwrap_or_else(PoisonError::into_inner)
}

#[instrument(skip_all, fields(time = frame.time()))]
fn process_frame(frame: Frame) {
    let data = frame.data();
    let sum: u64 = data.iter().take(4096).map(|&b| b as u64).sum();
    trace!(
        len = data.len(),
        sum,
        rotation = frame.rotation_to_user(),
        "processed frame"
    );
}

/// Runs one simulated session from `OFF` to `PREVIEW` and back.
pub async fn run(args: Args) -> Result<(), BoxError> {
    let angles = Arc::new(Angles::new());
    angles.set_sensor_offset(args.facing.into(), args.sensor_offset)?;
    angles.set_display_offset(args.display_offset)?;
    angles.set_device_orientation(args.device_orientation)?;

    let capabilities = match &args.capabilities {
        Some(path) => Capabilities::from_path(path)?,
        None => default_capabilities(),
    };
    info!(?capabilities, facing = %angles.sensor_facing(), "starting session");

    let engine = Arc::new(Engine::new()?);
    let orchestrator = StateOrchestrator::new(engine.clone());
    let manager = Arc::new(FrameManager::new(args.pool_size, None));
    let device = Arc::new(Mutex::new(Device {
        sensor: SimulatedSensor::new(args.converge_after.max(1)),
        request: preview_request(),
        last_result: None,
        locker: None,
    }));

    let result = stream(&args, &orchestrator, &manager, &device, &angles, capabilities).await;
    if let Err(err) = &result {
        warn!(error = %err, "session failed, tearing down");
    }

    teardown(&orchestrator, &manager).await;
    info!(
        state = %orchestrator.current_state(),
        failures = engine.failures(),
        "session finished"
    );
    engine.destroy();
    result
}

async fn stream(
    args: &Args,
    orchestrator: &StateOrchestrator,
    manager: &Arc<FrameManager>,
    device: &Arc<Mutex<Device>>,
    angles: &Arc<Angles>,
    capabilities: Capabilities,
) -> Result<(), BoxError> {
    orchestrator
        .schedule_state_change(CameraState::Off, CameraState::Engine, true, || async {
            info!("device opened");
            Ok(())
        })
        .await?;

    let format: ImageFormat = args.format.into();
    let size = args.preview_size();
    let bind_manager = Arc::clone(manager);
    let bind_angles = Arc::clone(angles);
    orchestrator
        .schedule_state_change(
            CameraState::Engine,
            CameraState::Bind,
            true,
            move || async move {
                let bytes = bind_manager.set_up(format, size, bind_angles);
                info!(%format, %size, bytes, "preview bound");
                Ok(())
            },
        )
        .await?;

    orchestrator
        .schedule_state_change(CameraState::Bind, CameraState::Preview, true, || async {
            info!("preview started");
            Ok(())
        })
        .await?;

    let start = Instant::now();
    for index in 0..args.frames {
        lock_device(device).capture();
        let Some(mut buffer) = manager.get_buffer()? else {
            debug!(index, "no buffer available, frame dropped");
            tokio::time::sleep(FRAME_INTERVAL).await;
            continue;
        };
        buffer.fill(index as u8);
        let frame = manager.get_frame(buffer, start.elapsed().as_nanos() as i64)?;
        let _ = orchestrator.schedule_stateful(FRAME_JOB, CameraState::Preview, move || {
            process_frame(frame);
            Ok(())
        });
        orchestrator.trim(FRAME_JOB, args.pool_size);
        tokio::time::sleep(FRAME_INTERVAL).await;
    }

    let success = lock(args, orchestrator, device, capabilities).await?;
    let frozen = capture(orchestrator, manager).await?;
    let rotation = angles.offset(Reference::Sensor, Reference::Output, Axis::RelativeToSensor);
    let output_size = if angles.flip(Reference::Sensor, Reference::Output) {
        frozen.size().flip()
    } else {
        frozen.size()
    };
    info!(
        success,
        rotation,
        size = %output_size,
        len = frozen.data().len(),
        "picture taken"
    );

    unlock(orchestrator, device).await?;
    Ok(())
}

async fn lock(
    args: &Args,
    orchestrator: &StateOrchestrator,
    device: &Arc<Mutex<Device>>,
    capabilities: Capabilities,
) -> Result<bool, JobError> {
    let device = Arc::clone(device);
    let timeout = args.lock_timeout();
    orchestrator
        .schedule_async("lock", true, move || async move {
            let events = Arc::new(LockEvents::default());
            let mut locker =
                Locker::new(capabilities, Arc::clone(&events)).with_forced_end_delay(timeout);
            {
                let mut device = lock_device(&device);
                let Device {
                    request,
                    last_result,
                    ..
                } = &mut *device;
                locker.lock(
                    request,
                    last_result.as_ref(),
                    Some(MeteringPoint { x: 0.5, y: 0.5 }),
                );
            }

            while locker.is_locking() {
                tokio::time::sleep(FRAME_INTERVAL).await;
                let mut device = lock_device(&device);
                let result = device.capture();
                locker.on_capture(&mut device.request, &result);
            }

            lock_device(&device).locker = Some(locker);
            let success = events
                .outcome
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .unwrap_or(false);
            debug!(
                request_changes = events.request_changes.load(Ordering::Relaxed),
                "lock finished"
            );
            Ok(success)
        })
        .await
}

async fn capture(
    orchestrator: &StateOrchestrator,
    manager: &Arc<FrameManager>,
) -> Result<Frame, JobError> {
    let manager = Arc::clone(manager);
    orchestrator
        .schedule_async("capture", true, move || async move {
            let bytes = manager.frame_bytes().ok_or(JobError::Cancelled)?;
            let buffer = match manager.get_buffer().map_err(JobError::failed)? {
                Some(buffer) => buffer,
                None => {
                    debug!("no idle preview buffer, allocating one for the picture");
                    vec![0; bytes]
                }
            };
            let mut frame = manager.get_frame(buffer, 0).map_err(JobError::failed)?;
            let frozen = frame.freeze();
            frame.release();
            Ok(frozen)
        })
        .await
}

async fn unlock(
    orchestrator: &StateOrchestrator,
    device: &Arc<Mutex<Device>>,
) -> Result<(), JobError> {
    let device = Arc::clone(device);
    orchestrator
        .schedule_async("unlock", true, move || async move {
            let mut device = lock_device(&device);
            let Some(mut locker) = device.locker.take() else {
                return Ok(());
            };
            locker.unlock(&mut device.request);
            device.request.af_mode = Some(AfMode::ContinuousPicture);
            Ok(())
        })
        .await
}

async fn teardown(orchestrator: &StateOrchestrator, manager: &Arc<FrameManager>) {
    orchestrator.remove(FRAME_JOB);
    let current = orchestrator.current_state();

    if current.is_at_least(CameraState::Preview) {
        let stop = orchestrator.schedule_state_change(
            CameraState::Preview,
            CameraState::Bind,
            true,
            || async {
                info!("preview stopped");
                Ok(())
            },
        );
        if let Err(err) = stop.await {
            warn!(error = %err, "stop preview failed");
        }
    }

    if orchestrator.current_state().is_at_least(CameraState::Bind) {
        let unbind_manager = Arc::clone(manager);
        let unbind = orchestrator.schedule_state_change(
            CameraState::Bind,
            CameraState::Engine,
            true,
            move || async move {
                unbind_manager.release();
                info!("preview unbound");
                Ok(())
            },
        );
        if let Err(err) = unbind.await {
            warn!(error = %err, "unbind failed");
        }
    }

    if orchestrator.current_state().is_at_least(CameraState::Engine) {
        let close = orchestrator.schedule_state_change(
            CameraState::Engine,
            CameraState::Off,
            true,
            || async {
                info!("device closed");
                Ok(())
            },
        );
        if let Err(err) = close.await {
            warn!(error = %err, "close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_converges_after_request_change() {
        let mut sensor = SimulatedSensor::new(2);
        let mut request = preview_request();
        let first = sensor.capture(&request);
        assert_eq!(first.ae_state, Some(AeState::Searching));
        let second = sensor.capture(&request);
        assert_eq!(second.ae_state, Some(AeState::Converged));
        assert_eq!(second.af_state, Some(AfState::PassiveFocused));

        request.ae_lock = true;
        assert_eq!(sensor.capture(&request).ae_state, Some(AeState::Searching));
        assert_eq!(sensor.capture(&request).ae_state, Some(AeState::Locked));
    }
}
