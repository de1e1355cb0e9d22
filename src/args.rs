// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_camera_engine::{
    frame::{ImageFormat, Size},
    offset::Facing,
};
use std::{path::PathBuf, time::Duration};

/// Preview stream pixel format.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum FormatSetting {
    /// YUV 4:2:0 semi-planar, VU ordering
    Nv21,
    /// YUV 4:2:2 semi-planar
    Nv16,
    /// YUV 4:2:0 semi-planar, UV ordering
    Nv12,
    /// YUV 4:2:0 planar
    Yv12,
    /// YUV 4:2:2 packed
    Yuyv,
    /// RGB 16-bit, 5-6-5
    Rgb565,
    /// RGB 24-bit
    Rgb3,
    /// RGBA 32-bit
    Rgba,
}

impl From<FormatSetting> for ImageFormat {
    fn from(value: FormatSetting) -> Self {
        match value {
            FormatSetting::Nv21 => ImageFormat::Nv21,
            FormatSetting::Nv16 => ImageFormat::Nv16,
            FormatSetting::Nv12 => ImageFormat::Nv12,
            FormatSetting::Yv12 => ImageFormat::Yv12,
            FormatSetting::Yuyv => ImageFormat::Yuyv,
            FormatSetting::Rgb565 => ImageFormat::Rgb565,
            FormatSetting::Rgb3 => ImageFormat::Rgb3,
            FormatSetting::Rgba => ImageFormat::Rgba,
        }
    }
}

/// Which sensor the simulated session opens.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum FacingSetting {
    /// Sensor on the back of the device, facing away from the user
    Back,
    /// Sensor on the front of the device, facing the user
    Front,
}

impl From<FacingSetting> for Facing {
    fn from(value: FacingSetting) -> Self {
        match value {
            FacingSetting::Back => Facing::Back,
            FacingSetting::Front => Facing::Front,
        }
    }
}

/// Command-line arguments for the EdgeFirst Camera Engine demo.
///
/// The demo drives one simulated device session through the engine: it
/// opens the device, streams preview frames through the frame pool, locks 3A,
/// captures a frozen frame and tears everything down again. Arguments can be
/// specified via command line or environment variables.
///
/// # Example
///
/// ```bash
/// # Via command line
/// edgefirst-camera-engine --facing front --sensor-offset 270 --frames 60
///
/// # Via environment variables
/// export FACING=front
/// export FRAMES=60
/// edgefirst-camera-engine
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Number of preview buffers and frame wrappers kept by the frame pool
    #[arg(long, env = "POOL_SIZE", default_value = "2")]
    pub pool_size: usize,

    /// Preview resolution in pixels (width height)
    #[arg(
        long,
        env = "PREVIEW_SIZE",
        default_value = "640 480",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub preview_size: Vec<u32>,

    /// Preview pixel format
    #[arg(long, env = "FORMAT", default_value = "nv21", value_enum)]
    pub format: FormatSetting,

    /// Sensor facing
    #[arg(long, env = "FACING", default_value = "back", value_enum)]
    pub facing: FacingSetting,

    /// Sensor mounting offset in degrees (0, 90, 180 or 270)
    #[arg(long, env = "SENSOR_OFFSET", default_value = "90")]
    pub sensor_offset: u32,

    /// Display rotation in degrees (0, 90, 180 or 270)
    #[arg(long, env = "DISPLAY_OFFSET", default_value = "0")]
    pub display_offset: u32,

    /// Device orientation in degrees (0, 90, 180 or 270)
    #[arg(long, env = "DEVICE_ORIENTATION", default_value = "0")]
    pub device_orientation: u32,

    /// Number of preview frames streamed before capturing
    #[arg(long, env = "FRAMES", default_value = "30")]
    pub frames: usize,

    /// Number of results the simulated sensor needs to converge 3A
    #[arg(long, env = "CONVERGE_AFTER", default_value = "5")]
    pub converge_after: usize,

    /// Time after which an unfinished 3A lock is forced to end, in
    /// milliseconds
    #[arg(long, env = "LOCK_TIMEOUT", default_value = "2500")]
    pub lock_timeout: u64,

    /// Path to a device capabilities JSON file
    #[arg(long, env = "CAPABILITIES")]
    pub capabilities: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Send logs to the systemd journal
    #[arg(long, env = "JOURNALD")]
    pub journald: bool,

    /// Enable Tokio async runtime console for debugging
    #[arg(long, env = "TOKIO_CONSOLE")]
    pub tokio_console: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}

impl Args {
    pub fn preview_size(&self) -> Size {
        Size::new(self.preview_size[0], self.preview_size[1])
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout)
    }
}
