//! Benchmarks for the Merge Path kernels
//!
//! Compares single-slice and multi-slice merges, and measures full tile
//! element-wise add (merge + reduce-by-key) at several densities.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use tessera_core::types::values_to_bytes;
use tessera_core::{CooBlock, FunctionBinary, Type};
use tessera_kernels::{ewise_add, intersect, merge};

/// Sorted unique keys with roughly `density` of `universe` present
fn random_keys(universe: u32, density: f64, mut seed: u64) -> Vec<u32> {
    let threshold = (density * 10_000.0) as u64;
    (0..universe)
        .filter(|_| {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            (seed >> 16) % 10_000 < threshold
        })
        .collect()
}

fn random_tile(size: u32, density: f64, seed: u64) -> Arc<CooBlock> {
    let keys = random_keys(size * size, density, seed);
    let rows = keys.iter().map(|k| k / size).collect();
    let cols = keys.iter().map(|k| k % size).collect();
    let vals: Vec<f32> = keys.iter().map(|&k| (k % 97) as f32).collect();
    Arc::new(
        CooBlock::new(size as usize, size as usize, rows, cols, values_to_bytes(&vals), 4)
            .expect("valid tile"),
    )
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_path");

    for &len in &[10_000u32, 100_000, 1_000_000] {
        let a = random_keys(len * 4, 0.25, 1);
        let b = random_keys(len * 4, 0.25, 2);
        group.throughput(Throughput::Elements((a.len() + b.len()) as u64));

        for &parts in &[1usize, 4, 16] {
            group.bench_with_input(
                BenchmarkId::new(format!("merge_p{parts}"), len),
                &(&a, &b),
                |bench, &(a, b)| bench.iter(|| black_box(merge(a.as_slice(), b.as_slice(), parts))),
            );
        }
        group.bench_with_input(BenchmarkId::new("intersect_p8", len), &(&a, &b), |bench, &(a, b)| {
            bench.iter(|| black_box(intersect(a.as_slice(), b.as_slice(), 8)))
        });
    }

    group.finish();
}

fn bench_ewise_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("ewise_add_tile");
    let plus = FunctionBinary::plus::<f32>(Type::f32());

    for &density in &[0.001, 0.01, 0.1] {
        let a = random_tile(1024, density, 11);
        let b = random_tile(1024, density, 13);
        group.throughput(Throughput::Elements((a.nvals() + b.nvals()) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(density),
            &(&a, &b),
            |bench, &(a, b)| bench.iter(|| black_box(ewise_add(Some(a), Some(b), &plus))),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_merge, bench_ewise_add);
criterion_main!(benches);
