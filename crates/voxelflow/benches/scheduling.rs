//! Scheduling and Decomposition Benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use voxelflow::prelude::*;

/// Layered units: each reads a few fields written by earlier layers.
fn layered_units(count: usize, seed: u64) -> Vec<UnitSpec> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let mut unit = UnitSpec::new(format!("u{}", i)).writes([format!("f{}", i)]);
            if i > 0 {
                for _ in 0..3 {
                    unit = unit.reads([format!("f{}", rng.gen_range(0..i))]);
                }
            }
            unit
        })
        .collect()
}

fn bench_build_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_graph");

    for count in [16, 128, 1024].iter() {
        let units = layered_units(*count, 7);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &units, |b, units| {
            b.iter(|| black_box(build_graph(units.iter().cloned()).unwrap()));
        });
    }

    group.finish();
}

fn bench_decompose(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompose");
    let config = DecompositionConfig::default();

    for size in [16, 32, 64].iter() {
        let coords = StaticGrid::cube(*size).active_voxels();
        group.throughput(Throughput::Elements(coords.len() as u64));
        for devices in [2, 8].iter() {
            group.bench_function(format!("cube_{}_devices_{}", size, devices), |b| {
                b.iter(|| black_box(decompose_domain(&coords, *devices, &config).unwrap()));
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_build_graph, bench_decompose);
criterion_main!(benches);
