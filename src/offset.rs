// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Rotation offsets between the coordinate systems of a camera session.
//!
//! Four reference frames are tracked:
//!
//! | Reference | Meaning |
//! |-----------|---------|
//! | [`Reference::Base`] | natural orientation of the device |
//! | [`Reference::Sensor`] | orientation of the image sensor |
//! | [`Reference::View`] | current orientation of the display |
//! | [`Reference::Output`] | orientation of the produced media |
//!
//! Every offset is derived from three inputs kept in [`Angles`]: the sensor
//! offset, the display offset and the device orientation. All of them are
//! stored in the [`Axis::Absolute`] reference, which means a front facing
//! sensor offset is mirrored when it is set.
//!
//! # Example
//!
//! ```
//! use edgefirst_camera_engine::offset::{Angles, Axis, Facing, Reference};
//!
//! let angles = Angles::new();
//! angles.set_sensor_offset(Facing::Back, 90).unwrap();
//! angles.set_device_orientation(180).unwrap();
//!
//! // rotation to apply to sensor data so it matches the output orientation
//! let rot = angles.offset(Reference::Sensor, Reference::Output, Axis::RelativeToSensor);
//! assert_eq!(rot, 270);
//! assert!(angles.flip(Reference::Sensor, Reference::Output));
//! ```

use crate::error::OffsetError;
use std::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};
use tracing::trace;

/// Direction the active sensor is facing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Facing {
    /// Sensor on the back of the device.
    #[default]
    Back,
    /// Sensor on the same side as the display.
    Front,
}

/// Bit of the packed sensor word set for front facing sensors. The low bits
/// hold the absolute sensor offset.
const FRONT_FACING: u32 = 1 << 16;

fn pack_sensor(facing: Facing, offset: u32) -> u32 {
    match facing {
        Facing::Back => offset,
        Facing::Front => FRONT_FACING | offset,
    }
}

fn unpack_sensor(word: u32) -> (Facing, u32) {
    let facing = if word & FRONT_FACING != 0 {
        Facing::Front
    } else {
        Facing::Back
    };
    (facing, word & !FRONT_FACING)
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facing::Back => write!(f, "back"),
            Facing::Front => write!(f, "front"),
        }
    }
}

/// A coordinate system in which rotation angles are expressed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Reference {
    /// Natural orientation of the device.
    Base,
    /// Orientation of the image sensor.
    Sensor,
    /// Current orientation of the display.
    View,
    /// Orientation of the final media.
    Output,
}

/// The axis around which an offset is measured.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Axis going out of the display towards the user.
    Absolute,
    /// Same as [`Axis::Absolute`] for back sensors, mirrored for front
    /// sensors. Needed by APIs that expect angles in the sensor reference.
    RelativeToSensor,
}

/// Checks that `value` is one of the four cardinal angles.
pub fn sanitize_input(value: u32) -> Result<u32, OffsetError> {
    match value {
        0 | 90 | 180 | 270 => Ok(value),
        _ => Err(OffsetError::NotCardinal(value)),
    }
}

/// Brings any angle (possibly negative) into `[0, 360)`.
fn sanitize_output(value: i32) -> u32 {
    value.rem_euclid(360) as u32
}

/// Shared rotation state of a camera session.
///
/// Setters are called from sensor and display callbacks while readers run on
/// capture threads. The sensor facing and its mirrored offset share one
/// atomic word so readers never see one without the other.
#[derive(Debug, Default)]
pub struct Angles {
    sensor: AtomicU32,
    display_offset: AtomicU32,
    device_orientation: AtomicU32,
}

/// Values of [`Angles`] read once for a single computation.
#[derive(Copy, Clone, Debug)]
struct Snapshot {
    facing: Facing,
    sensor_offset: u32,
    display_offset: u32,
    device_orientation: u32,
}

impl Angles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sensor offset as reported by the hardware.
    ///
    /// The offset is stored in the [`Axis::Absolute`] reference, so a front
    /// facing offset is mirrored before it is stored.
    ///
    /// # Errors
    ///
    /// Returns [`OffsetError::NotCardinal`] for anything other than 0, 90,
    /// 180 or 270. Nothing is modified in that case.
    pub fn set_sensor_offset(&self, facing: Facing, offset: u32) -> Result<(), OffsetError> {
        let offset = sanitize_input(offset)?;
        let stored = match facing {
            Facing::Back => offset,
            Facing::Front => sanitize_output(360 - offset as i32),
        };
        self.sensor.store(pack_sensor(facing, stored), Ordering::Release);
        trace!(%facing, offset, stored, "sensor offset");
        Ok(())
    }

    /// Sets the display rotation relative to the natural device orientation.
    pub fn set_display_offset(&self, offset: u32) -> Result<(), OffsetError> {
        let offset = sanitize_input(offset)?;
        self.display_offset.store(offset, Ordering::Release);
        Ok(())
    }

    /// Sets the physical device orientation.
    pub fn set_device_orientation(&self, orientation: u32) -> Result<(), OffsetError> {
        let orientation = sanitize_input(orientation)?;
        self.device_orientation.store(orientation, Ordering::Release);
        Ok(())
    }

    pub fn sensor_facing(&self) -> Facing {
        unpack_sensor(self.sensor.load(Ordering::Acquire)).0
    }

    /// Sensor offset in the absolute reference (already mirrored for front
    /// sensors).
    pub fn sensor_offset(&self) -> u32 {
        unpack_sensor(self.sensor.load(Ordering::Acquire)).1
    }

    pub fn display_offset(&self) -> u32 {
        self.display_offset.load(Ordering::Acquire)
    }

    pub fn device_orientation(&self) -> u32 {
        self.device_orientation.load(Ordering::Acquire)
    }

    /// Returns the clockwise offset between two reference systems, measured
    /// around `axis`. The result is always 0, 90, 180 or 270.
    pub fn offset(&self, from: Reference, to: Reference, axis: Axis) -> u32 {
        let angles = self.snapshot();
        let offset = angles.absolute_offset(from, to);
        match axis {
            Axis::RelativeToSensor if angles.facing == Facing::Front => {
                sanitize_output(360 - offset as i32)
            }
            _ => offset,
        }
    }

    /// True if the two reference systems are rotated by 90 or 270 degrees,
    /// meaning width and height must be swapped.
    pub fn flip(&self, from: Reference, to: Reference) -> bool {
        self.offset(from, to, Axis::Absolute) % 180 != 0
    }

    fn snapshot(&self) -> Snapshot {
        let (facing, sensor_offset) = unpack_sensor(self.sensor.load(Ordering::Acquire));
        Snapshot {
            facing,
            sensor_offset,
            display_offset: self.display_offset(),
            device_orientation: self.device_orientation(),
        }
    }
}

impl Snapshot {
    fn absolute_offset(&self, from: Reference, to: Reference) -> u32 {
        if from == to {
            0
        } else if to == Reference::Base {
            sanitize_output(360 - self.absolute_offset(Reference::Base, from) as i32)
        } else if from == Reference::Base {
            match to {
                Reference::View => sanitize_output(360 - self.display_offset as i32),
                Reference::Output => sanitize_output(self.device_orientation as i32),
                Reference::Sensor => sanitize_output(360 - self.sensor_offset as i32),
                Reference::Base => 0,
            }
        } else {
            sanitize_output(
                self.absolute_offset(Reference::Base, to) as i32
                    - self.absolute_offset(Reference::Base, from) as i32,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_output() {
        assert_eq!(sanitize_output(-90), 270);
        assert_eq!(sanitize_output(360), 0);
        assert_eq!(sanitize_output(450), 90);
    }

    #[test]
    fn test_failed_setter_keeps_value() {
        let angles = Angles::new();
        angles.set_display_offset(180).unwrap();
        assert!(angles.set_display_offset(45).is_err());
        assert_eq!(angles.display_offset(), 180);
    }

    #[test]
    fn test_sensor_word_packing() {
        for offset in [0, 90, 180, 270] {
            for facing in [Facing::Back, Facing::Front] {
                assert_eq!(unpack_sensor(pack_sensor(facing, offset)), (facing, offset));
            }
        }
        assert_eq!(unpack_sensor(0), (Facing::Back, 0));
    }
}
