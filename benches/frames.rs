// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use criterion::{criterion_group, criterion_main, Criterion};
use edgefirst_camera_engine::{
    frame::{FrameManager, ImageFormat, Size},
    offset::Angles,
};
use std::{hint::black_box, sync::Arc};

pub fn benchmark_frames(c: &mut Criterion) {
    let fmts = [ImageFormat::Nv21, ImageFormat::Yuyv, ImageFormat::Rgba];
    let dims = [(640, 480), (1280, 720), (1920, 1080)];

    for fmt in fmts.iter() {
        let mut group = c.benchmark_group(format!("frames/{}", fmt));
        for dim in dims.iter() {
            let size = Size::new(dim.0, dim.1);
            let manager = FrameManager::new(4, None);
            manager.set_up(*fmt, size, Arc::new(Angles::new()));

            group.bench_function(format!("cycle/{}", size), |b| {
                b.iter(|| {
                    let buffer = manager.get_buffer().unwrap().unwrap();
                    let frame = manager.get_frame(buffer, 0).unwrap();
                    black_box(frame.data().len())
                })
            });

            group.bench_function(format!("freeze/{}", size), |b| {
                let buffer = manager.get_buffer().unwrap().unwrap();
                let frame = manager.get_frame(buffer, 0).unwrap();
                b.iter(|| black_box(frame.freeze()))
            });
        }
        group.finish();
    }
}

criterion_group!(benches, benchmark_frames);
criterion_main!(benches);
