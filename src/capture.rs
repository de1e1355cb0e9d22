// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Narrow view of the capture pipeline consumed by the 3A lock parameters.
//!
//! The engine owns the real device; this module only models the pieces the
//! convergence state machines read and write:
//!
//! - [`Capabilities`]: a snapshot of what the device supports.
//! - [`CaptureRequest`]: the outgoing request, mutated by lock actions and
//!   resubmitted by the engine when it changes.
//! - [`CaptureResult`]: the per-frame result carrying the provider specific
//!   convergence states.

use crate::error::CapabilitiesError;
use serde_json::Value;
use std::{fs::File, path::Path};

/// Supported hardware level of the device.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HardwareLevel {
    Legacy,
    Limited,
    Full,
    Level3,
    External,
}

/// Auto-exposure mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AeMode {
    Off,
    On,
    OnAutoFlash,
    OnAlwaysFlash,
    OnAutoFlashRedeye,
    OnExternalFlash,
}

/// Auto-exposure convergence state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AeState {
    Inactive,
    Searching,
    Converged,
    Locked,
    FlashRequired,
    Precapture,
}

/// Auto-focus mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AfMode {
    Off,
    Auto,
    Macro,
    ContinuousVideo,
    ContinuousPicture,
    Edof,
}

/// Auto-focus trigger.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AfTrigger {
    Idle,
    Start,
    Cancel,
}

/// Auto-focus convergence state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AfState {
    Inactive,
    PassiveScan,
    PassiveFocused,
    ActiveScan,
    FocusedLocked,
    NotFocusedLocked,
    PassiveUnfocused,
}

/// Auto-white-balance mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AwbMode {
    Off,
    Auto,
    Incandescent,
    Fluorescent,
    Daylight,
    Cloudy,
}

/// Auto-white-balance convergence state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AwbState {
    Inactive,
    Searching,
    Converged,
    Locked,
}

/// Snapshot of the device capabilities relevant to 3A locking.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub hardware_level: Option<HardwareLevel>,
    pub af_available_modes: Vec<AfMode>,
}

impl Capabilities {
    /// True unless the device reports the legacy hardware level. An unknown
    /// level counts as not legacy.
    pub fn is_not_legacy(&self) -> bool {
        self.hardware_level != Some(HardwareLevel::Legacy)
    }

    /// Loads a capabilities snapshot from a JSON file.
    ///
    /// ```json
    /// { "hardware_level": "full", "af_available_modes": ["auto", "continuous_picture"] }
    /// ```
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CapabilitiesError> {
        let file = File::open(path)?;
        let json: Value = serde_json::from_reader(file)?;
        Self::try_from(&json)
    }
}

impl TryFrom<&Value> for Capabilities {
    type Error = CapabilitiesError;

    fn try_from(json: &Value) -> Result<Self, Self::Error> {
        let obj = json.as_object().ok_or(CapabilitiesError::NotAnObject)?;

        let hardware_level = match obj.get("hardware_level") {
            None | Some(Value::Null) => None,
            Some(Value::String(level)) => Some(match level.as_str() {
                "legacy" => HardwareLevel::Legacy,
                "limited" => HardwareLevel::Limited,
                "full" => HardwareLevel::Full,
                "level_3" => HardwareLevel::Level3,
                "external" => HardwareLevel::External,
                _ => {
                    return Err(CapabilitiesError::UnknownValue {
                        key: "hardware_level",
                        value: level.clone(),
                    })
                }
            }),
            Some(_) => {
                return Err(CapabilitiesError::WrongType {
                    key: "hardware_level",
                    expected: "a string",
                })
            }
        };

        let af_available_modes = match obj.get("af_available_modes") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(modes)) => modes
                .iter()
                .map(|mode| match mode.as_str() {
                    Some("off") => Ok(AfMode::Off),
                    Some("auto") => Ok(AfMode::Auto),
                    Some("macro") => Ok(AfMode::Macro),
                    Some("continuous_video") => Ok(AfMode::ContinuousVideo),
                    Some("continuous_picture") => Ok(AfMode::ContinuousPicture),
                    Some("edof") => Ok(AfMode::Edof),
                    Some(other) => Err(CapabilitiesError::UnknownValue {
                        key: "af_available_modes",
                        value: other.to_string(),
                    }),
                    None => Err(CapabilitiesError::WrongType {
                        key: "af_available_modes",
                        expected: "an array of strings",
                    }),
                })
                .collect::<Result<_, _>>()?,
            Some(_) => {
                return Err(CapabilitiesError::WrongType {
                    key: "af_available_modes",
                    expected: "an array of strings",
                })
            }
        };

        Ok(Self {
            hardware_level,
            af_available_modes,
        })
    }
}

/// The outgoing repeating request. Lock actions mutate it; the engine must
/// resubmit it to the device whenever it is reported as changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureRequest {
    pub ae_mode: Option<AeMode>,
    pub ae_lock: bool,
    pub af_mode: Option<AfMode>,
    pub af_trigger: Option<AfTrigger>,
    pub awb_mode: Option<AwbMode>,
    pub awb_lock: bool,
}

/// Result delivered once per captured frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureResult {
    /// Partial results are missing fields and are ignored by the locker.
    pub partial: bool,
    pub ae_state: Option<AeState>,
    pub af_mode: Option<AfMode>,
    pub af_state: Option<AfState>,
    pub awb_state: Option<AwbState>,
}
