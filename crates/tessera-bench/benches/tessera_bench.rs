//! Benchmarks for the tessera kernels.
//!
//! Run with: `cargo bench`

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use tessera_compute::kernels::blur::box_blur_reference;
use tessera_compute::pattern;
use tessera_compute::{Backend, BlurStrategy, Processor, WorkgroupShape};

fn cpu(tile: WorkgroupShape) -> Processor {
    Processor::builder()
        .backend(Backend::Cpu)
        .tile(tile)
        .build()
        .expect("cpu processor")
}

/// Element-wise map throughput.
fn bench_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("map");
    let proc = cpu(WorkgroupShape::new(16, 16));

    for size in [64u32, 256, 1024] {
        let img = pattern::noise(size, size, 1);
        group.throughput(Throughput::Elements(img.data().len() as u64));
        group.bench_with_input(BenchmarkId::new("double", size), &img, |b, img| {
            b.iter(|| proc.double(black_box(img)).expect("map"))
        });
    }

    group.finish();
}

/// Naive vs tiled blur across radii.
fn bench_blur(c: &mut Criterion) {
    let mut group = c.benchmark_group("blur");
    group.sample_size(20);
    let proc = cpu(WorkgroupShape::new(16, 16));
    let img = pattern::noise(512, 512, 2);
    group.throughput(Throughput::Elements(img.pixel_count() as u64));

    for radius in [1u32, 3, 8] {
        group.bench_with_input(BenchmarkId::new("naive", radius), &radius, |b, &r| {
            b.iter(|| proc.blur_with(black_box(&img), r, BlurStrategy::Naive).expect("naive"))
        });
        if proc.blur_kernel(BlurStrategy::Tiled, radius, img.channels).is_ok() {
            group.bench_with_input(BenchmarkId::new("tiled", radius), &radius, |b, &r| {
                b.iter(|| proc.blur_with(black_box(&img), r, BlurStrategy::Tiled).expect("tiled"))
            });
        }
    }

    let small = pattern::noise(128, 128, 3);
    group.bench_function("host_reference_r3", |b| {
        b.iter(|| box_blur_reference(black_box(&small), 3))
    });

    group.finish();
}

/// Tile shape impact on the tiled blur.
fn bench_tile_shapes(c: &mut Criterion) {
    let mut group = c.benchmark_group("blur_tile");
    group.sample_size(20);
    let img = pattern::noise(512, 512, 4);

    for (tw, th) in [(8u32, 8u32), (16, 16), (32, 8)] {
        let proc = cpu(WorkgroupShape::new(tw, th));
        if proc.blur_kernel(BlurStrategy::Tiled, 3, img.channels).is_err() {
            continue;
        }
        let id = format!("{tw}x{th}");
        group.bench_function(BenchmarkId::new("tiled_r3", id), |b| {
            b.iter(|| proc.blur_with(black_box(&img), 3, BlurStrategy::Tiled).expect("tiled"))
        });
    }

    group.finish();
}

/// Game of Life step throughput.
fn bench_life(c: &mut Criterion) {
    let mut group = c.benchmark_group("life");
    group.sample_size(20);
    let proc = cpu(WorkgroupShape::new(16, 16));

    for size in [128u32, 512] {
        let board = pattern::random_cells(size, size, 0.3, 7);
        for steps in [1u32, 16] {
            group.throughput(Throughput::Elements(size as u64 * size as u64 * steps as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("{size}x{size}"), steps),
                &steps,
                |b, &n| b.iter(|| proc.life(black_box(&board), n).expect("life")),
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_map, bench_blur, bench_tile_shapes, bench_life);
criterion_main!(benches);
