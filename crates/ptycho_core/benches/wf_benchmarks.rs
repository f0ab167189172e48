//! Criterion benchmarks for WF/AWF core operations.
//!
//! Run with: cargo bench -p ptycho_core
//! Run specific: cargo bench -p ptycho_core -- object_step

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::{Array2, Array3};
use rustfft::num_complex::Complex;

use ptycho_core::synthetic::{perturb, random_complex_image, raster_scan, simulate_measurements};
use ptycho_core::{
    object_step, overlap_weight, wf_recon, FftNorm, FourierOps, PatchBounds, ReconConfig,
    ReconInputs,
};

// =============================================================================
// Helper Functions for Test Data Generation
// =============================================================================

struct Scan {
    object: Array2<Complex<f32>>,
    probe: Array2<Complex<f32>>,
    bounds: Vec<PatchBounds>,
    meas: Array3<f32>,
}

fn build_scan(image: usize, patch: usize, stride: usize, seed: u64) -> Scan {
    let object = random_complex_image::<f32>((image, image), (0.5, 1.0), 1.5, seed)
        .expect("object sampling");
    let probe = random_complex_image::<f32>((patch, patch), (0.8, 1.0), 3.0, seed + 1)
        .expect("probe sampling");
    let bounds = raster_scan((image, image), (patch, patch), (stride, stride)).expect("scan");
    let meas = simulate_measurements(object.view(), probe.view(), &bounds, FftNorm::Ortho, false)
        .expect("simulation");
    Scan {
        object,
        probe,
        bounds,
        meas,
    }
}

// =============================================================================
// Transform Benchmarks
// =============================================================================

fn bench_fourier(c: &mut Criterion) {
    let mut group = c.benchmark_group("fourier");

    for size in [16, 32, 64, 128] {
        let input = random_complex_image::<f32>((size, size), (0.1, 1.0), 3.0, 42)
            .expect("input sampling");
        let ops = FourierOps::<f32>::new((size, size), FftNorm::Ortho, false);

        group.throughput(Throughput::Elements((size * size) as u64));
        group.bench_with_input(BenchmarkId::new("forward", size), &size, |b, _| {
            b.iter(|| ops.forward(black_box(input.view())))
        });
        group.bench_with_input(BenchmarkId::new("roundtrip", size), &size, |b, _| {
            b.iter(|| {
                let f = ops.forward(black_box(input.view()));
                ops.inverse(f.view())
            })
        });
    }

    group.finish();
}

// =============================================================================
// Update Benchmarks
// =============================================================================

fn bench_object_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("object_step");
    group.sample_size(20);

    for (image, patch, stride) in [(64, 16, 4), (128, 32, 8), (256, 64, 16)] {
        let scan = build_scan(image, patch, stride, 7);
        let ops = FourierOps::<f32>::new((patch, patch), FftNorm::Ortho, false);
        let weight = overlap_weight(scan.probe.view(), &scan.bounds, (image, image))
            .expect("weight map");
        let start = perturb(scan.object.view(), 0.05, 8).expect("perturbation");

        group.throughput(Throughput::Elements(scan.bounds.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("positions", scan.bounds.len()),
            &image,
            |b, _| {
                b.iter(|| {
                    object_step(
                        black_box(start.view()),
                        scan.probe.view(),
                        scan.meas.view(),
                        &scan.bounds,
                        weight.view(),
                        &ops,
                        1.0,
                    )
                })
            },
        );
    }

    group.finish();
}

// =============================================================================
// End-to-End Benchmarks
// =============================================================================

fn bench_recon(c: &mut Criterion) {
    let mut group = c.benchmark_group("recon");
    group.sample_size(10);

    let scan = build_scan(64, 16, 4, 11);
    let start = perturb(scan.object.view(), 0.05, 12).expect("perturbation");

    for (name, accel, joint_recon) in [
        ("wf", false, false),
        ("awf", true, false),
        ("awf_joint", true, true),
    ] {
        let config = ReconConfig::<f32> {
            num_iter: 20,
            accel,
            joint_recon,
            ..ReconConfig::default()
        };
        group.bench_function(name, |b| {
            b.iter(|| {
                let inputs = ReconInputs::new(
                    scan.meas.view(),
                    &scan.bounds,
                    black_box(start.view()),
                    scan.probe.view(),
                );
                wf_recon(inputs, config.clone())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fourier, bench_object_step, bench_recon);
criterion_main!(benches);
