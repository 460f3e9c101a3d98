//! Criterion benchmarks for the exposure-response hot path.
//!
//! Covers: cached vs exact omega, hazard ratio, and attributable fraction.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ember_core::age::AgeGroup;
use ember_core::constants::{GEMM_MU, GEMM_NU};
use ember_core::traits::ExposureResponse;
use ember_model::sigmoid::omega_exact;
use ember_model::{GemmModel, OmegaCache};

fn bench_omega(c: &mut Criterion) {
    let cache = OmegaCache::default();

    c.bench_function("omega_cached", |b| b.iter(|| cache.omega(black_box(9.6))));
    c.bench_function("omega_exact", |b| {
        b.iter(|| omega_exact(black_box(9.6), GEMM_MU, GEMM_NU))
    });
}

fn bench_hazard_ratio(c: &mut Criterion) {
    let model = GemmModel::new();
    let Some(age) = AgeGroup::new(10) else {
        return;
    };

    c.bench_function("hazard_ratio", |b| {
        b.iter(|| model.hazard_ratio(black_box(9.6), age))
    });
}

fn bench_attributable_fraction_sweep(c: &mut Criterion) {
    let model = GemmModel::new();
    // One county-year: every band at a typical annual mean.
    c.bench_function("attributable_fraction_all_bands", |b| {
        b.iter(|| {
            AgeGroup::all()
                .map(|age| model.attributable_fraction_at(black_box(12.0), age))
                .sum::<f64>()
        })
    });
}

criterion_group!(
    benches,
    bench_omega,
    bench_hazard_ratio,
    bench_attributable_fraction_sweep,
);
criterion_main!(benches);
