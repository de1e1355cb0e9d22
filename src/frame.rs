// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Preview frames and the bounded frame/buffer pool.
//!
//! The capture pipeline fills large byte buffers at frame rate. Allocating a
//! fresh buffer per frame would churn the allocator, so the [`FrameManager`]
//! hands a fixed set of buffers to the pipeline and takes them back once the
//! frame processor is done with them.
//!
//! A [`Frame`] wraps one buffer together with its metadata. Frames release
//! themselves on drop; a frame that must outlive the processing callback is
//! copied with [`Frame::freeze`], which detaches the copy from the pool.

use crate::{
    error::FrameError,
    offset::{Angles, Axis, Reference},
};
use std::{
    fmt,
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};
use tracing::{debug, info, trace, warn};

/// Frame dimensions in pixels.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Swaps width and height, for use with [`Angles::flip`].
    pub const fn flip(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel formats a preview stream can be configured with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ImageFormat {
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
    /// RGB 24-bit (8 bits per channel, no alpha)
    Rgb3,
    /// RGBA 32-bit (8 bits per channel, with alpha)
    Rgba,
}

impl ImageFormat {
    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            ImageFormat::Nv21 | ImageFormat::Nv12 | ImageFormat::Yv12 => 12,
            ImageFormat::Nv16 | ImageFormat::Yuyv | ImageFormat::Rgb565 => 16,
            ImageFormat::Rgb3 => 24,
            ImageFormat::Rgba => 32,
        }
    }

    pub const fn fourcc(self) -> [u8; 4] {
        match self {
            ImageFormat::Nv21 => *b"NV21",
            ImageFormat::Nv16 => *b"NV16",
            ImageFormat::Nv12 => *b"NV12",
            ImageFormat::Yv12 => *b"YV12",
            ImageFormat::Yuyv => *b"YUYV",
            ImageFormat::Rgb565 => *b"RGBP",
            ImageFormat::Rgb3 => *b"RGB3",
            ImageFormat::Rgba => *b"RGBA",
        }
    }

    /// Bytes needed to hold one frame of `size`, rounded up to whole bytes.
    pub const fn buffer_size(self, size: Size) -> usize {
        let bits = size.width as u64 * size.height as u64 * self.bits_per_pixel() as u64;
        bits.div_ceil(8) as usize
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let fourcc = self.fourcc();
        write!(f, "{}", String::from_utf8_lossy(&fourcc))
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NV21" => Ok(ImageFormat::Nv21),
            "NV16" => Ok(ImageFormat::Nv16),
            "NV12" => Ok(ImageFormat::Nv12),
            "YV12" => Ok(ImageFormat::Yv12),
            "YUYV" => Ok(ImageFormat::Yuyv),
            "RGB565" | "RGBP" => Ok(ImageFormat::Rgb565),
            "RGB3" => Ok(ImageFormat::Rgb3),
            "RGBA" => Ok(ImageFormat::Rgba),
            _ => Err(format!("unknown image format {s}")),
        }
    }
}

/// Receives buffers that are ready to be filled by the capture pipeline.
pub trait BufferCallback: Send + Sync {
    fn on_buffer_available(&self, buffer: Vec<u8>);
}

impl<F> BufferCallback for F
where
    F: Fn(Vec<u8>) + Send + Sync,
{
    fn on_buffer_available(&self, buffer: Vec<u8>) {
        self(buffer)
    }
}

enum BufferSink {
    /// Buffers are pushed to the callback.
    Dispatch(Arc<dyn BufferCallback>),
    /// Buffers are queued until polled with [`FrameManager::get_buffer`].
    Enqueue {
        tx: kanal::Sender<Vec<u8>>,
        rx: kanal::Receiver<Vec<u8>>,
    },
}

#[derive(Clone)]
struct Config {
    bytes: usize,
    size: Size,
    format: ImageFormat,
    angles: Arc<Angles>,
}

/// Frame content. Boxed so that recycling a wrapper moves a pointer.
struct FrameSlot {
    data: Vec<u8>,
    time: i64,
    rotation_to_user: u32,
    rotation_to_view: u32,
    size: Size,
    format: ImageFormat,
}

struct Shared {
    pool_size: usize,
    config: Mutex<Option<Config>>,
    slots_tx: kanal::Sender<Box<FrameSlot>>,
    slots_rx: kanal::Receiver<Box<FrameSlot>>,
    sink: BufferSink,
}

impl Shared {
    fn config(&self) -> MutexGuard<'_, Option<Config>> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn offer_buffer(&self, buffer: Vec<u8>) {
        match &self.sink {
            BufferSink::Dispatch(callback) => callback.on_buffer_available(buffer),
            BufferSink::Enqueue { tx, .. } => {
                if !matches!(tx.try_send(buffer), Ok(true)) {
                    trace!("buffer queue full, dropping buffer");
                }
            }
        }
    }

    fn drain_buffers(&self) {
        if let BufferSink::Enqueue { rx, .. } = &self.sink {
            while let Ok(Some(_)) = rx.try_recv() {}
        }
    }

    fn drain_slots(&self) {
        while let Ok(Some(_)) = self.slots_rx.try_recv() {}
    }

    /// Takes back a released frame. The wrapper is recycled if the pool has
    /// room, and only then is the buffer offered for reuse, provided its
    /// length still matches the current setup.
    ///
    /// In enqueue mode the buffer is queued under the config lock, so a
    /// concurrent reconfigure either drains it or rejects its length.
    fn on_frame_released(&self, mut slot: Box<FrameSlot>) {
        let config = self.config();
        let Some(bytes) = config.as_ref().map(|c| c.bytes) else {
            trace!("released frame after teardown, dropping");
            return;
        };

        let data = std::mem::take(&mut slot.data);
        let recycled = matches!(self.slots_tx.try_send(slot), Ok(true));
        if !recycled || data.len() != bytes {
            trace!(recycled, len = data.len(), bytes, "dropping buffer");
            return;
        }

        trace!(bytes, "recycling buffer");
        match &self.sink {
            BufferSink::Enqueue { .. } => self.offer_buffer(data),
            BufferSink::Dispatch(_) => {
                // The callback may call back into the manager.
                drop(config);
                self.offer_buffer(data);
            }
        }
    }
}

/// Bounded pool of preview frames and their byte buffers.
///
/// The buffer mode is fixed at construction: with a [`BufferCallback`] the
/// manager pushes buffers to it (dispatch mode), without one it keeps them in
/// a queue polled with [`FrameManager::get_buffer`] (enqueue mode).
///
/// # Example
///
/// ```
/// use edgefirst_camera_engine::frame::{FrameManager, ImageFormat, Size};
/// use edgefirst_camera_engine::offset::Angles;
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = FrameManager::new(2, None);
/// let bytes = manager.set_up(ImageFormat::Nv21, Size::new(640, 480), Arc::new(Angles::new()));
/// assert_eq!(bytes, 640 * 480 * 3 / 2);
///
/// let buffer = manager.get_buffer()?.expect("buffers are queued by set_up");
/// let frame = manager.get_frame(buffer, 0)?;
/// assert_eq!(frame.data().len(), bytes);
/// drop(frame);
/// assert_eq!(manager.buffer_count(), 2);
/// # Ok(())
/// # }
/// ```
pub struct FrameManager {
    shared: Arc<Shared>,
}

impl FrameManager {
    pub fn new(pool_size: usize, callback: Option<Arc<dyn BufferCallback>>) -> Self {
        let sink = match callback {
            Some(callback) => BufferSink::Dispatch(callback),
            None => {
                let (tx, rx) = kanal::bounded(pool_size);
                BufferSink::Enqueue { tx, rx }
            }
        };
        let (slots_tx, slots_rx) = kanal::bounded(pool_size);
        Self {
            shared: Arc::new(Shared {
                pool_size,
                config: Mutex::new(None),
                slots_tx,
                slots_rx,
                sink,
            }),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.shared.pool_size
    }

    /// Byte length of the buffers for the current setup, `None` if not set
    /// up.
    pub fn frame_bytes(&self) -> Option<usize> {
        self.shared.config().as_ref().map(|c| c.bytes)
    }

    pub fn is_set_up(&self) -> bool {
        self.shared.config().is_some()
    }

    /// Number of idle frame wrappers waiting to be reused.
    pub fn recycled_count(&self) -> usize {
        self.shared.slots_rx.len()
    }

    /// Number of buffers waiting in the queue. Always 0 in dispatch mode.
    pub fn buffer_count(&self) -> usize {
        match &self.shared.sink {
            BufferSink::Dispatch(_) => 0,
            BufferSink::Enqueue { rx, .. } => rx.len(),
        }
    }

    /// Configures the pool and makes `pool_size` fresh buffers available.
    /// Returns the byte length of each buffer.
    ///
    /// Calling this again reconfigures the pool: buffers still queued for the
    /// previous setup are dropped, and frames from the previous setup
    /// released afterwards do not return their buffers.
    pub fn set_up(&self, format: ImageFormat, size: Size, angles: Arc<Angles>) -> usize {
        let bytes = format.buffer_size(size);
        {
            let mut config = self.shared.config();
            let previous = config.replace(Config {
                bytes,
                size,
                format,
                angles,
            });
            if let Some(previous) = previous {
                debug!(from = previous.bytes, to = bytes, "reconfiguring frame pool");
                self.shared.drain_buffers();
            }
        }

        info!(%format, %size, bytes, pool_size = self.shared.pool_size, "frame pool set up");
        for _ in 0..self.shared.pool_size {
            self.shared.offer_buffer(vec![0; bytes]);
        }
        bytes
    }

    /// Wraps `data`, filled by the capture pipeline at `time`, into a frame.
    ///
    /// An idle wrapper is reused when available, otherwise a new one is
    /// allocated. Size and format come from the current setup and rotations
    /// from the angles it was given.
    pub fn get_frame(&self, data: Vec<u8>, time: i64) -> Result<Frame, FrameError> {
        let config = self.shared.config().clone().ok_or(FrameError::NotSetUp)?;
        let rotation_to_user =
            config
                .angles
                .offset(Reference::Sensor, Reference::Output, Axis::RelativeToSensor);
        let rotation_to_view =
            config
                .angles
                .offset(Reference::Sensor, Reference::View, Axis::RelativeToSensor);

        let mut slot = match self.shared.slots_rx.try_recv() {
            Ok(Some(slot)) => {
                trace!(time, "get frame, recycling");
                slot
            }
            _ => {
                trace!(time, "get frame, allocating");
                Box::new(FrameSlot {
                    data: Vec::new(),
                    time: 0,
                    rotation_to_user: 0,
                    rotation_to_view: 0,
                    size: Size::default(),
                    format: config.format,
                })
            }
        };
        slot.data = data;
        slot.time = time;
        slot.rotation_to_user = rotation_to_user;
        slot.rotation_to_view = rotation_to_view;
        slot.size = config.size;
        slot.format = config.format;

        Ok(Frame {
            slot: Some(slot),
            owner: Owner::Pool(Arc::downgrade(&self.shared)),
        })
    }

    /// Polls a buffer for the capture pipeline to fill. Enqueue mode only.
    pub fn get_buffer(&self) -> Result<Option<Vec<u8>>, FrameError> {
        match &self.shared.sink {
            BufferSink::Dispatch(_) => Err(FrameError::WrongBufferMode),
            BufferSink::Enqueue { rx, .. } => Ok(rx.try_recv().ok().flatten()),
        }
    }

    /// Returns a buffer obtained from [`FrameManager::get_buffer`] that was
    /// not used for a frame. Enqueue mode only. Buffers sized for a previous
    /// setup are dropped.
    pub fn on_buffer_unused(&self, buffer: Vec<u8>) -> Result<(), FrameError> {
        let BufferSink::Enqueue { tx, .. } = &self.shared.sink else {
            return Err(FrameError::WrongBufferMode);
        };
        let config = self.shared.config();
        match config.as_ref().map(|c| c.bytes) {
            Some(bytes) if bytes == buffer.len() => {
                let _ = tx.try_send(buffer);
            }
            Some(bytes) => {
                trace!(len = buffer.len(), bytes, "unused buffer from a previous setup");
            }
            None => warn!("buffer returned but the frame pool is not set up anymore"),
        }
        Ok(())
    }

    /// Tears down the pool. Idle wrappers and queued buffers are dropped, and
    /// frames released afterwards are discarded. [`FrameManager::set_up`]
    /// may be called again.
    pub fn release(&self) {
        let mut config = self.shared.config();
        if config.take().is_none() {
            warn!("frame pool release called twice, ignoring");
            return;
        }
        info!("frame pool released, clearing the frame and buffer queues");
        self.shared.drain_slots();
        self.shared.drain_buffers();
    }
}

impl fmt::Debug for FrameManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameManager")
            .field("pool_size", &self.pool_size())
            .field("frame_bytes", &self.frame_bytes())
            .field("recycled", &self.recycled_count())
            .field("buffers", &self.buffer_count())
            .finish()
    }
}

enum Owner {
    Pool(Weak<Shared>),
    Frozen,
}

/// A preview frame: one filled buffer plus its capture metadata.
///
/// Frames from a [`FrameManager`] go back to it when released or dropped.
/// Accessing a released frame is a programming error and panics.
pub struct Frame {
    slot: Option<Box<FrameSlot>>,
    owner: Owner,
}

impl Frame {
    fn slot(&self) -> &FrameSlot {
        match &self.slot {
            Some(slot) => slot,
            None => panic!("frame is dead, it was accessed after being released"),
        }
    }

    /// # Panics
    ///
    /// Panics if the frame has been released.
    pub fn data(&self) -> &[u8] {
        &self.slot().data
    }

    /// Capture timestamp as given to [`FrameManager::get_frame`].
    pub fn time(&self) -> i64 {
        self.slot().time
    }

    /// Rotation to apply for the frame to look upright to the user.
    pub fn rotation_to_user(&self) -> u32 {
        self.slot().rotation_to_user
    }

    /// Rotation to apply for the frame to match the view.
    pub fn rotation_to_view(&self) -> u32 {
        self.slot().rotation_to_view
    }

    pub fn size(&self) -> Size {
        self.slot().size
    }

    pub fn format(&self) -> ImageFormat {
        self.slot().format
    }

    pub fn is_released(&self) -> bool {
        self.slot.is_none()
    }

    /// True for copies made by [`Frame::freeze`].
    pub fn is_frozen(&self) -> bool {
        matches!(self.owner, Owner::Frozen)
    }

    /// Deep copies the frame into one not owned by any pool. This frame is
    /// unaffected and still needs to be released.
    pub fn freeze(&self) -> Frame {
        let slot = self.slot();
        Frame {
            slot: Some(Box::new(FrameSlot {
                data: slot.data.clone(),
                time: slot.time,
                rotation_to_user: slot.rotation_to_user,
                rotation_to_view: slot.rotation_to_view,
                size: slot.size,
                format: slot.format,
            })),
            owner: Owner::Frozen,
        }
    }

    /// Hands the buffer back to the pool. Calling it again does nothing.
    pub fn release(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        if let Owner::Pool(pool) = &self.owner {
            if let Some(pool) = pool.upgrade() {
                pool.on_frame_released(slot);
            }
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.slot {
            None => f.write_str("Frame(released)"),
            Some(slot) => f
                .debug_struct("Frame")
                .field("time", &slot.time)
                .field("size", &slot.size)
                .field("format", &slot.format)
                .field("len", &slot.data.len())
                .field("rotation_to_user", &slot.rotation_to_user)
                .field("frozen", &self.is_frozen())
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_size_rounds_up() {
        assert_eq!(ImageFormat::Nv21.buffer_size(Size::new(50, 50)), 3750);
        assert_eq!(ImageFormat::Nv16.buffer_size(Size::new(15, 15)), 450);
        // 3 * 3 * 12 = 108 bits
        assert_eq!(ImageFormat::Nv12.buffer_size(Size::new(3, 3)), 14);
        assert_eq!(ImageFormat::Rgba.buffer_size(Size::new(2, 2)), 16);
    }

    #[test]
    fn test_format_names() {
        assert_eq!(ImageFormat::Nv21.to_string(), "NV21");
        assert_eq!("yuyv".parse::<ImageFormat>(), Ok(ImageFormat::Yuyv));
        assert!("jpeg".parse::<ImageFormat>().is_err());
        assert_eq!(Size::new(640, 480).flip(), Size::new(480, 640));
    }
}
