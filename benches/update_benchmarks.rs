//! 更新与渲染阶段性能基准测试
//!
//! 测试不同网格尺寸下 CPU 更新过程、图元生成与合成的耗时

use cascade::config::PhysicsParams;
use cascade::render::{Compositor, RenderStage, RenderUniforms};
use cascade::simulation::{
    seed_particles, GridDims, MaskFrame, MaskSampler, StateBuffers, UpdateStage, UpdateUniforms,
    Viewport,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

const GRID_SIZES: [(u32, u32); 3] = [(200, 300), (512, 512), (1024, 2048)];

fn half_mask() -> MaskSampler {
    let values = (0..64 * 48)
        .map(|i| if i >= 64 * 24 { 1.0 } else { 0.0 })
        .collect();
    let mut sampler = MaskSampler::new();
    sampler.replace(Arc::new(MaskFrame::new(64, 48, values).unwrap()));
    sampler
}

fn bench_update_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_step");
    group.sample_size(20);
    let params = PhysicsParams::default();
    let mask = half_mask();
    let stage = UpdateStage::new();

    for (width, height) in GRID_SIZES {
        let dims = GridDims::new(width, height);
        let mut buffers = StateBuffers::new();
        buffers.allocate(width, height).unwrap();
        buffers
            .load(&seed_particles(dims, &mut StdRng::seed_from_u64(1)))
            .unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(dims), &dims, |b, &dims| {
            let mut time = 0.0;
            b.iter(|| {
                time += 1.0 / 60.0;
                let uniforms = UpdateUniforms::new(
                    &params,
                    dims,
                    mask.frame().map(|f| &**f),
                    1.0 / 60.0,
                    time,
                );
                let (current, next) = buffers.split();
                stage.run(current, next, &mask, &uniforms);
                buffers.swap();
                black_box(buffers.current().len())
            });
        });
    }

    group.finish();
}

fn bench_update_workers(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_workers");
    group.sample_size(20);
    let params = PhysicsParams::default();
    let mask = half_mask();
    let dims = GridDims::new(512, 512);
    let particles = seed_particles(dims, &mut StdRng::seed_from_u64(2));
    let mut next = particles.clone();
    let uniforms =
        UpdateUniforms::new(&params, dims, mask.frame().map(|f| &**f), 1.0 / 60.0, 1.0);

    for workers in [1, 2, 4, 8] {
        let stage = UpdateStage::with_workers(workers);
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, _| {
            b.iter(|| {
                stage.run(&particles, &mut next, &mask, &uniforms);
                black_box(next[0])
            });
        });
    }

    group.finish();
}

fn bench_render_and_composite(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_composite");
    group.sample_size(10);
    let params = PhysicsParams::default();
    let viewport = Viewport::new(1280, 720);

    for (width, height) in GRID_SIZES {
        let dims = GridDims::new(width, height);
        let particles = seed_particles(dims, &mut StdRng::seed_from_u64(3));
        let uniforms = RenderUniforms::new(&params, dims, viewport);

        group.bench_with_input(BenchmarkId::new("primitives", dims), &dims, |b, _| {
            b.iter(|| black_box(RenderStage::run(&particles, &uniforms).len()));
        });

        let prims = RenderStage::run(&particles, &uniforms);
        let mut compositor = Compositor::new(viewport);
        group.bench_with_input(BenchmarkId::new("trail", dims), &dims, |b, _| {
            b.iter(|| {
                compositor.advance(&prims, 0.1);
                black_box(compositor.trail().get(0, 0))
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_update_step,
    bench_update_workers,
    bench_render_and_composite
);
criterion_main!(benches);
