use std::{sync::Arc, time::Duration};

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::ThreadPoolBuilder;
use repfit::prelude::*;

fn gaussian_model() -> PdfModel {
    PdfModel::new(
        Gaussian::new("gauss", Observable::new("x", -5.0, 5.0), "mean", "sigma"),
        vec![
            Parameter::new("mean", 0.0, -3.0, 3.0).unwrap(),
            Parameter::new("sigma", 1.0, 0.5, 3.0).unwrap(),
        ],
    )
    .unwrap()
}

fn toy_data(n: usize) -> Arc<Dataset> {
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    Arc::new(gaussian_model().generate(n, &mut rng).unwrap())
}

fn nll_benchmark(c: &mut Criterion) {
    let data = toy_data(100_000);
    let nll = gaussian_model().nll(&data).unwrap();
    let mut group = c.benchmark_group("Gaussian NLL Performance");
    let n_threads: Vec<usize> = (0..)
        .map(|x| 1 << x)
        .take_while(|&p| p <= rayon::current_num_threads())
        .collect();
    for threads in n_threads {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            &threads,
            |b, &_threads| {
                let mut rng = ChaCha8Rng::seed_from_u64(1);
                b.iter_batched(
                    || vec![rng.gen_range(-3.0..3.0), rng.gen_range(0.5..3.0)],
                    |p| pool.install(|| black_box(nll.evaluate(&p))),
                    BatchSize::SmallInput,
                )
            },
        );
    }
    group.finish();
}

fn repeated_fit_benchmark(c: &mut Criterion) {
    let data = toy_data(10_000);
    let mut group = c.benchmark_group("Repeated Fit Performance");
    for num_fits in [1, 4, 16] {
        group.bench_with_input(
            BenchmarkId::new("sequential", num_fits),
            &num_fits,
            |b, &num_fits| {
                b.iter_batched(
                    || {
                        RepeatedFit::builder(gaussian_model(), data.clone(), num_fits)
                            .seed(0)
                            .reporter(Silent)
                            .build()
                            .unwrap()
                    },
                    |mut repeated_fit| {
                        repeated_fit
                            .do_repeated_fit(&FitOptions::default())
                            .unwrap();
                        black_box(repeated_fit.best_result().map(|best| best.min_nll))
                    },
                    BatchSize::SmallInput,
                )
            },
        );
        group.bench_with_input(
            BenchmarkId::new("parallel", num_fits),
            &num_fits,
            |b, &num_fits| {
                b.iter_batched(
                    || {
                        RepeatedFit::builder(gaussian_model(), data.clone(), num_fits)
                            .seed(0)
                            .reporter(Silent)
                            .build()
                            .unwrap()
                    },
                    |mut repeated_fit| {
                        repeated_fit
                            .do_repeated_fit_parallel(&FitOptions::default())
                            .unwrap();
                        black_box(repeated_fit.best_result().map(|best| best.min_nll))
                    },
                    BatchSize::SmallInput,
                )
            },
        );
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(20)).sample_size(50);
    targets = nll_benchmark, repeated_fit_benchmark
}
criterion_main!(benches);
