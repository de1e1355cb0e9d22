// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Converge-and-lock state machines for auto exposure, auto focus and auto
//! white balance.
//!
//! A [`Parameter`] is created for each lock attempt. [`Parameter::lock`]
//! decides whether locking is needed at all and, if so, edits the outgoing
//! request. Each following [`CaptureResult`] is fed to
//! [`Parameter::on_capture`] until the hardware reports a terminal
//! convergence state.
//!
//! A parameter the hardware cannot lock, or one that is already locked,
//! reports itself as locked and successful right away: "not applicable" never
//! blocks a capture.
//!
//! [`Locker`] drives the three parameters together and adds a deadline so a
//! stuck parameter cannot stall the engine forever.

use crate::capture::{
    AeMode, AeState, AfMode, AfState, AfTrigger, AwbMode, AwbState, Capabilities, CaptureRequest,
    CaptureResult,
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, info};

/// Default time after which [`Locker`] gives up on parameters that have not
/// converged.
pub const FORCED_END_DELAY: Duration = Duration::from_millis(2500);

/// Receives notifications that the outgoing request was modified and must be
/// resubmitted.
pub trait LockingCallback: Send + Sync {
    fn on_request_changed(&self);
}

/// Hooks distinguishing one lockable parameter from another.
pub trait Convergence {
    /// Does the device and current request allow locking this parameter?
    fn check_supports(&self, capabilities: &Capabilities, request: &CaptureRequest) -> bool;

    /// Is the parameter already in the locked state according to `last`?
    fn check_should_skip(&self, last: &CaptureResult) -> bool;

    /// Edits `request` to start locking.
    fn on_lock(&self, capabilities: &Capabilities, request: &mut CaptureRequest);

    /// Inspects a result. Returns `Some(successful)` once a terminal state is
    /// observed.
    fn process_capture(&self, result: &CaptureResult) -> Option<bool>;

    /// Final cleanup once locked.
    fn on_locked(&self, request: &mut CaptureRequest);

    /// Edits `request` to release the lock.
    fn on_unlock(&self, capabilities: &Capabilities, request: &mut CaptureRequest);
}

/// The three lockable 3A parameters.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    Exposure,
    Focus,
    WhiteBalance,
}

impl Convergence for ParameterKind {
    fn check_supports(&self, capabilities: &Capabilities, request: &CaptureRequest) -> bool {
        let result = match self {
            ParameterKind::Exposure => {
                let ae_on = matches!(
                    request.ae_mode,
                    Some(
                        AeMode::On
                            | AeMode::OnAutoFlash
                            | AeMode::OnAlwaysFlash
                            | AeMode::OnAutoFlashRedeye
                            | AeMode::OnExternalFlash
                    )
                );
                capabilities.is_not_legacy() && ae_on
            }
            // Locking switches focus to AUTO, where it holds until triggered.
            ParameterKind::Focus => capabilities.af_available_modes.contains(&AfMode::Auto),
            ParameterKind::WhiteBalance => {
                capabilities.is_not_legacy() && request.awb_mode == Some(AwbMode::Auto)
            }
        };
        debug!(kind = ?self, result, "check supports");
        result
    }

    fn check_should_skip(&self, last: &CaptureResult) -> bool {
        let result = match self {
            ParameterKind::Exposure => last.ae_state == Some(AeState::Locked),
            ParameterKind::Focus => {
                let state_ok = matches!(
                    last.af_state,
                    Some(
                        AfState::FocusedLocked
                            | AfState::NotFocusedLocked
                            | AfState::Inactive
                            | AfState::PassiveFocused
                            | AfState::PassiveUnfocused
                    )
                );
                state_ok && last.af_mode == Some(AfMode::Auto)
            }
            ParameterKind::WhiteBalance => last.awb_state == Some(AwbState::Locked),
        };
        debug!(kind = ?self, result, "check should skip");
        result
    }

    fn on_lock(&self, _capabilities: &Capabilities, request: &mut CaptureRequest) {
        match self {
            ParameterKind::Exposure => request.ae_lock = true,
            ParameterKind::Focus => {
                request.af_mode = Some(AfMode::Auto);
                request.af_trigger = Some(AfTrigger::Cancel);
            }
            ParameterKind::WhiteBalance => request.awb_lock = true,
        }
    }

    fn process_capture(&self, result: &CaptureResult) -> Option<bool> {
        match self {
            ParameterKind::Exposure => {
                debug!(ae_state = ?result.ae_state, "process capture");
                match result.ae_state? {
                    AeState::Locked => Some(true),
                    AeState::Inactive
                    | AeState::Searching
                    | AeState::Converged
                    | AeState::FlashRequired
                    | AeState::Precapture => None,
                }
            }
            ParameterKind::Focus => {
                debug!(af_state = ?result.af_state, af_mode = ?result.af_mode, "process capture");
                if result.af_mode? != AfMode::Auto {
                    return None;
                }
                match result.af_state? {
                    AfState::FocusedLocked | AfState::PassiveFocused | AfState::Inactive => {
                        Some(true)
                    }
                    // Locked, but focus was not achieved.
                    AfState::NotFocusedLocked | AfState::PassiveUnfocused => Some(false),
                    AfState::ActiveScan | AfState::PassiveScan => None,
                }
            }
            ParameterKind::WhiteBalance => {
                debug!(awb_state = ?result.awb_state, "process capture");
                match result.awb_state? {
                    AwbState::Locked => Some(true),
                    AwbState::Inactive | AwbState::Searching | AwbState::Converged => None,
                }
            }
        }
    }

    fn on_locked(&self, _request: &mut CaptureRequest) {}

    fn on_unlock(&self, _capabilities: &Capabilities, request: &mut CaptureRequest) {
        match self {
            ParameterKind::Exposure => request.ae_lock = false,
            ParameterKind::Focus => request.af_trigger = Some(AfTrigger::Idle),
            ParameterKind::WhiteBalance => request.awb_lock = false,
        }
    }
}

/// Lock progress of one 3A parameter.
pub struct Parameter<K = ParameterKind> {
    kind: K,
    callback: Arc<dyn LockingCallback>,
    is_locked: bool,
    is_successful: bool,
    should_skip: bool,
    supports_locking: bool,
}

impl<K: Convergence> Parameter<K> {
    pub fn new(kind: K, callback: Arc<dyn LockingCallback>) -> Self {
        Self {
            kind,
            callback,
            is_locked: false,
            is_successful: false,
            should_skip: false,
            supports_locking: false,
        }
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    /// True once the lock attempt finished, or if no lock was needed.
    pub fn is_locked(&self) -> bool {
        self.is_locked || !self.supports_locking || self.should_skip
    }

    /// True if the attempt reached its goal, or if no lock was needed.
    pub fn is_successful(&self) -> bool {
        self.is_successful || !self.supports_locking || self.should_skip
    }

    pub fn supports_locking(&self) -> bool {
        self.supports_locking
    }

    pub fn should_skip(&self) -> bool {
        self.should_skip
    }

    /// Starts a lock attempt. `last_result` is `None` before the first frame.
    pub fn lock(
        &mut self,
        capabilities: &Capabilities,
        request: &mut CaptureRequest,
        last_result: Option<&CaptureResult>,
    ) {
        self.is_successful = false;
        self.is_locked = false;
        self.should_skip = last_result.is_some_and(|last| self.kind.check_should_skip(last));
        self.supports_locking = self.kind.check_supports(capabilities, request);
        if !self.should_skip && self.supports_locking {
            self.kind.on_lock(capabilities, request);
            self.callback.on_request_changed();
        }
    }

    /// Feeds a capture result. Does nothing once locked.
    pub fn on_capture(&mut self, request: &mut CaptureRequest, result: &CaptureResult) {
        if self.is_locked() {
            return;
        }
        if let Some(successful) = self.kind.process_capture(result) {
            self.is_locked = true;
            self.is_successful = successful;
        }
        if self.is_locked() {
            self.kind.on_locked(request);
        }
    }

    /// Releases the lock on `request`. Runs even if locking was skipped, as
    /// long as the hardware supports it.
    pub fn unlock(&mut self, capabilities: &Capabilities, request: &mut CaptureRequest) {
        if self.supports_locking {
            self.kind.on_unlock(capabilities, request);
            self.callback.on_request_changed();
        }
    }
}

impl<K: std::fmt::Debug> std::fmt::Debug for Parameter<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parameter")
            .field("kind", &self.kind)
            .field("is_locked", &self.is_locked)
            .field("is_successful", &self.is_successful)
            .field("should_skip", &self.should_skip)
            .field("supports_locking", &self.supports_locking)
            .finish()
    }
}

/// Point of interest that triggered a lock, passed back untouched.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct MeteringPoint {
    pub x: f32,
    pub y: f32,
}

/// Receives [`Locker`] events.
pub trait LockerCallback: LockingCallback {
    /// Locking has ended. `success` is false if any parameter failed or the
    /// deadline was reached.
    fn on_locked(&self, point: Option<MeteringPoint>, success: bool);

    /// Locks have been released on the request.
    fn on_unlocked(&self, point: Option<MeteringPoint>);
}

/// Locks focus, exposure and white balance together.
///
/// Call [`Locker::lock`] to start, feed results through
/// [`Locker::on_capture`] while [`Locker::is_locking`], and call
/// [`Locker::unlock`] to restore automatic behavior.
pub struct Locker<C> {
    capabilities: Capabilities,
    callback: Arc<C>,
    forced_end_delay: Duration,
    point: Option<MeteringPoint>,
    started: Option<Instant>,
    focus: Parameter,
    exposure: Parameter,
    white_balance: Parameter,
}

impl<C: LockerCallback + 'static> Locker<C> {
    pub fn new(capabilities: Capabilities, callback: Arc<C>) -> Self {
        let notify: Arc<dyn LockingCallback> = callback.clone();
        Self {
            capabilities,
            focus: Parameter::new(ParameterKind::Focus, Arc::clone(&notify)),
            exposure: Parameter::new(ParameterKind::Exposure, Arc::clone(&notify)),
            white_balance: Parameter::new(ParameterKind::WhiteBalance, notify),
            callback,
            forced_end_delay: FORCED_END_DELAY,
            point: None,
            started: None,
        }
    }

    /// Overrides [`FORCED_END_DELAY`].
    pub fn with_forced_end_delay(mut self, delay: Duration) -> Self {
        self.forced_end_delay = delay;
        self
    }

    pub fn is_locking(&self) -> bool {
        self.started.is_some()
    }

    pub fn parameter(&self, kind: ParameterKind) -> &Parameter {
        match kind {
            ParameterKind::Exposure => &self.exposure,
            ParameterKind::Focus => &self.focus,
            ParameterKind::WhiteBalance => &self.white_balance,
        }
    }

    /// Starts locking all three parameters.
    pub fn lock(
        &mut self,
        request: &mut CaptureRequest,
        last_result: Option<&CaptureResult>,
        point: Option<MeteringPoint>,
    ) {
        info!(?point, "locking");
        self.point = point;
        self.started = Some(Instant::now());
        self.focus.lock(&self.capabilities, request, last_result);
        self.white_balance
            .lock(&self.capabilities, request, last_result);
        self.exposure.lock(&self.capabilities, request, last_result);
    }

    /// Feeds a result. Ignored while not locking and for partial results.
    pub fn on_capture(&mut self, request: &mut CaptureRequest, result: &CaptureResult) {
        let Some(started) = self.started else {
            return;
        };
        if result.partial {
            return;
        }

        self.focus.on_capture(request, result);
        self.exposure.on_capture(request, result);
        self.white_balance.on_capture(request, result);

        if self.focus.is_locked() && self.exposure.is_locked() && self.white_balance.is_locked() {
            let success = self.focus.is_successful()
                && self.exposure.is_successful()
                && self.white_balance.is_successful();
            info!(success, "all parameters have converged");
            self.dispatch_end(success);
        } else if started.elapsed() >= self.forced_end_delay {
            info!("forced end delay reached, some parameter is stuck");
            self.dispatch_end(false);
        }
    }

    fn dispatch_end(&mut self, success: bool) {
        self.started = None;
        self.callback.on_locked(self.point, success);
    }

    /// Releases every lock on `request` and notifies right away, without
    /// waiting for results.
    pub fn unlock(&mut self, request: &mut CaptureRequest) {
        info!("unlocking");
        self.started = None;
        self.focus.unlock(&self.capabilities, request);
        self.exposure.unlock(&self.capabilities, request);
        self.white_balance.unlock(&self.capabilities, request);
        self.callback.on_unlocked(self.point);
    }
}
