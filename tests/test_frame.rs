// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_camera_engine::{
    error::FrameError,
    frame::{BufferCallback, FrameManager, ImageFormat, Size},
    offset::{Angles, Facing},
};
use std::{
    error::Error,
    sync::{Arc, Mutex},
};

/// Records every buffer handed back by the pool.
#[derive(Default)]
struct Buffers(Mutex<Vec<Vec<u8>>>);

impl Buffers {
    fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl BufferCallback for Buffers {
    fn on_buffer_available(&self, buffer: Vec<u8>) {
        self.0.lock().unwrap().push(buffer);
    }
}

fn dispatching(pool_size: usize) -> (FrameManager, Arc<Buffers>) {
    let buffers = Arc::new(Buffers::default());
    let manager = FrameManager::new(pool_size, Some(buffers.clone()));
    (manager, buffers)
}

#[test]
fn test_set_up_dispatches_pool_size_buffers() {
    let (manager, buffers) = dispatching(1);
    let bytes = manager.set_up(ImageFormat::Nv21, Size::new(50, 50), Arc::default());
    assert_eq!(bytes, 3750);
    assert_eq!(manager.frame_bytes(), Some(3750));
    assert_eq!(buffers.count(), 1);

    let (manager, buffers) = dispatching(5);
    manager.set_up(ImageFormat::Nv21, Size::new(50, 50), Arc::default());
    let dispatched = buffers.take();
    assert_eq!(dispatched.len(), 5);
    assert!(dispatched.iter().all(|b| b.len() == 3750));
}

#[test]
fn test_get_frame_before_set_up() {
    let (manager, _) = dispatching(1);
    assert!(!manager.is_set_up());
    assert_eq!(manager.get_frame(vec![0; 16], 0).err(), Some(FrameError::NotSetUp));
}

#[test]
fn test_release_same_length_recycles_buffer() -> Result<(), Box<dyn Error>> {
    let (manager, buffers) = dispatching(1);
    let bytes = manager.set_up(ImageFormat::Nv21, Size::new(50, 50), Arc::default());
    buffers.clear();

    let mut picture = vec![0; bytes];
    picture[0] = 42;
    let mut frame = manager.get_frame(picture, 0)?;
    frame.release();

    let returned = buffers.take();
    assert_eq!(returned.len(), 1);
    assert_eq!(returned[0][0], 42);
    assert_eq!(manager.recycled_count(), 1);
    Ok(())
}

#[test]
fn test_release_when_pool_full() -> Result<(), Box<dyn Error>> {
    let (manager, buffers) = dispatching(1);
    let bytes = manager.set_up(ImageFormat::Nv21, Size::new(50, 50), Arc::default());
    buffers.clear();

    let mut a = manager.get_frame(vec![1; bytes], 1)?;
    let mut b = manager.get_frame(vec![2; bytes], 2)?;
    assert_eq!(a.time(), 1);
    assert_eq!(b.time(), 2);
    assert_eq!(b.data()[0], 2);

    a.release();
    assert_eq!(buffers.count(), 1);

    buffers.clear();
    b.release();
    assert_eq!(buffers.count(), 0);
    assert_eq!(manager.recycled_count(), 1);
    Ok(())
}

#[test]
fn test_release_after_reconfigure_drops_buffer() -> Result<(), Box<dyn Error>> {
    let (manager, buffers) = dispatching(1);
    let bytes = manager.set_up(ImageFormat::Nv21, Size::new(50, 50), Arc::default());
    let frame = manager.get_frame(vec![0; bytes], 0)?;

    let new_bytes = manager.set_up(ImageFormat::Nv16, Size::new(15, 15), Arc::default());
    assert_eq!(new_bytes, 450);
    buffers.clear();

    drop(frame);
    assert_eq!(buffers.count(), 0);
    Ok(())
}

#[test]
fn test_recycled_wrapper_is_reused() -> Result<(), Box<dyn Error>> {
    let (manager, _) = dispatching(2);
    let bytes = manager.set_up(ImageFormat::Yuyv, Size::new(8, 8), Arc::default());
    drop(manager.get_frame(vec![0; bytes], 0)?);
    assert_eq!(manager.recycled_count(), 1);

    let frame = manager.get_frame(vec![0; bytes], 1)?;
    assert_eq!(manager.recycled_count(), 0);
    assert_eq!(frame.size(), Size::new(8, 8));
    assert_eq!(frame.format(), ImageFormat::Yuyv);
    Ok(())
}

#[test]
fn test_frame_rotations_follow_angles() -> Result<(), Box<dyn Error>> {
    let angles = Arc::new(Angles::new());
    angles.set_sensor_offset(Facing::Back, 90)?;
    angles.set_display_offset(0)?;
    angles.set_device_orientation(180)?;

    let (manager, _) = dispatching(1);
    let bytes = manager.set_up(ImageFormat::Nv21, Size::new(4, 4), angles.clone());
    let frame = manager.get_frame(vec![0; bytes], 0)?;
    assert_eq!(frame.rotation_to_user(), 270);
    assert_eq!(frame.rotation_to_view(), 90);

    angles.set_sensor_offset(Facing::Front, 0)?;
    let frame = manager.get_frame(vec![0; bytes], 0)?;
    assert_eq!(frame.rotation_to_user(), 180);
    assert_eq!(frame.rotation_to_view(), 0);
    Ok(())
}

#[test]
fn test_freeze_is_independent() -> Result<(), Box<dyn Error>> {
    let (manager, buffers) = dispatching(1);
    let bytes = manager.set_up(ImageFormat::Nv21, Size::new(50, 50), Arc::default());
    buffers.clear();

    let mut frame = manager.get_frame(vec![7; bytes], 99)?;
    let mut frozen = frame.freeze();
    assert!(frozen.is_frozen());
    assert!(!frame.is_frozen());
    assert_eq!(frozen.time(), 99);
    assert_eq!(frozen.data(), frame.data());

    frame.release();
    assert_eq!(buffers.count(), 1);
    assert_eq!(frozen.data()[0], 7);

    // Frozen frames never go back to the pool.
    buffers.clear();
    frozen.release();
    assert_eq!(buffers.count(), 0);
    assert_eq!(manager.recycled_count(), 1);
    Ok(())
}

#[test]
fn test_frozen_frame_moves_across_threads() -> Result<(), Box<dyn Error>> {
    let (manager, _) = dispatching(1);
    let bytes = manager.set_up(ImageFormat::Rgba, Size::new(2, 2), Arc::default());
    let frame = manager.get_frame(vec![3; bytes], 0)?;
    let frozen = frame.freeze();
    drop(frame);

    let sum = std::thread::spawn(move || frozen.data().iter().map(|&b| b as usize).sum::<usize>())
        .join()
        .unwrap();
    assert_eq!(sum, 3 * 16);
    Ok(())
}

#[test]
#[should_panic(expected = "frame is dead")]
fn test_released_frame_access_panics() {
    let (manager, _) = dispatching(1);
    let bytes = manager.set_up(ImageFormat::Nv21, Size::new(4, 4), Arc::default());
    let mut frame = manager.get_frame(vec![0; bytes], 0).unwrap();
    frame.release();
    assert!(frame.is_released());
    frame.release();
    let _ = frame.data();
}

#[test]
fn test_enqueue_mode() -> Result<(), Box<dyn Error>> {
    let manager = FrameManager::new(2, None);
    assert_eq!(manager.get_buffer(), Ok(None));
    let bytes = manager.set_up(ImageFormat::Nv12, Size::new(16, 16), Arc::default());
    assert_eq!(manager.buffer_count(), 2);

    let first = manager.get_buffer()?.unwrap();
    let second = manager.get_buffer()?.unwrap();
    assert_eq!(first.len(), bytes);
    assert_eq!(manager.get_buffer()?, None);

    manager.on_buffer_unused(second)?;
    assert_eq!(manager.buffer_count(), 1);

    let frame = manager.get_frame(first, 0)?;
    drop(frame);
    assert_eq!(manager.buffer_count(), 2);
    Ok(())
}

#[test]
fn test_wrong_buffer_mode() {
    let (manager, _) = dispatching(1);
    manager.set_up(ImageFormat::Nv21, Size::new(4, 4), Arc::default());
    assert_eq!(manager.get_buffer(), Err(FrameError::WrongBufferMode));
    assert_eq!(
        manager.on_buffer_unused(vec![0; 24]),
        Err(FrameError::WrongBufferMode)
    );
    assert_eq!(manager.buffer_count(), 0);
}

#[test]
fn test_reconfigure_drains_queued_buffers() {
    let manager = FrameManager::new(2, None);
    manager.set_up(ImageFormat::Nv21, Size::new(50, 50), Arc::default());
    manager.set_up(ImageFormat::Rgba, Size::new(10, 10), Arc::default());
    assert_eq!(manager.buffer_count(), 2);
    while let Ok(Some(buffer)) = manager.get_buffer() {
        assert_eq!(buffer.len(), 400);
    }
}

#[test]
fn test_release_manager() -> Result<(), Box<dyn Error>> {
    let manager = FrameManager::new(2, None);
    let bytes = manager.set_up(ImageFormat::Nv21, Size::new(8, 8), Arc::default());
    let buffer = manager.get_buffer()?.unwrap();
    let frame = manager.get_frame(buffer, 0)?;
    drop(manager.get_frame(vec![0; bytes], 0)?);
    assert_eq!(manager.recycled_count(), 1);

    manager.release();
    assert!(!manager.is_set_up());
    assert_eq!(manager.frame_bytes(), None);
    assert_eq!(manager.recycled_count(), 0);
    assert_eq!(manager.buffer_count(), 0);

    // Frames outliving the setup are discarded.
    drop(frame);
    assert_eq!(manager.buffer_count(), 0);
    assert_eq!(manager.recycled_count(), 0);

    // Buffers returned after teardown are dropped.
    manager.on_buffer_unused(vec![0; bytes])?;
    assert_eq!(manager.buffer_count(), 0);

    // A second release is ignored, and the pool can be set up again.
    manager.release();
    manager.set_up(ImageFormat::Nv21, Size::new(8, 8), Arc::default());
    assert_eq!(manager.buffer_count(), 2);
    Ok(())
}

#[test]
fn test_frame_outlives_manager() -> Result<(), Box<dyn Error>> {
    let (manager, _) = dispatching(1);
    let bytes = manager.set_up(ImageFormat::Nv21, Size::new(4, 4), Arc::default());
    let frame = manager.get_frame(vec![5; bytes], 0)?;
    drop(manager);
    assert_eq!(frame.data()[0], 5);
    drop(frame);
    Ok(())
}

#[test]
fn test_closure_callback() {
    let count = Arc::new(Mutex::new(0));
    let counter = count.clone();
    let manager = FrameManager::new(
        3,
        Some(Arc::new(move |_buffer: Vec<u8>| *counter.lock().unwrap() += 1)),
    );
    manager.set_up(ImageFormat::Nv21, Size::new(4, 4), Arc::default());
    assert_eq!(*count.lock().unwrap(), 3);
}

#[test]
fn test_unused_buffer_from_previous_setup_is_dropped() -> Result<(), Box<dyn Error>> {
    let manager = FrameManager::new(2, None);
    manager.set_up(ImageFormat::Nv21, Size::new(4, 4), Arc::default());
    let stale = manager.get_buffer()?.unwrap();

    let bytes = manager.set_up(ImageFormat::Rgba, Size::new(4, 4), Arc::default());
    assert_eq!(manager.buffer_count(), 2);
    manager.on_buffer_unused(stale)?;
    assert_eq!(manager.buffer_count(), 2);
    while let Some(buffer) = manager.get_buffer()? {
        assert_eq!(buffer.len(), bytes);
    }
    Ok(())
}

#[test]
fn test_reconfigure_racing_releases() -> Result<(), Box<dyn Error>> {
    use std::sync::atomic::{AtomicBool, Ordering};

    let manager = Arc::new(FrameManager::new(4, None));
    manager.set_up(ImageFormat::Nv21, Size::new(8, 8), Arc::default());
    let stop = Arc::new(AtomicBool::new(false));

    let streamers: Vec<_> = (0..2)
        .map(|_| {
            let manager = manager.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut time = 0;
                while !stop.load(Ordering::Relaxed) {
                    match manager.get_buffer() {
                        Ok(Some(buffer)) => {
                            time += 1;
                            if let Ok(frame) = manager.get_frame(buffer, time) {
                                drop(frame);
                            }
                        }
                        _ => std::thread::yield_now(),
                    }
                }
            })
        })
        .collect();

    let sizes = [Size::new(8, 8), Size::new(16, 8)];
    for i in 0..2_000 {
        manager.set_up(ImageFormat::Nv21, sizes[i % 2], Arc::default());
    }
    stop.store(true, Ordering::Relaxed);
    for streamer in streamers {
        streamer.join().unwrap();
    }

    let bytes = manager.frame_bytes().unwrap();
    while let Some(buffer) = manager.get_buffer()? {
        assert_eq!(buffer.len(), bytes);
    }
    Ok(())
}
