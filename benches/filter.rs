//! Throughput of the signal path: live filtering, batch filtering and
//! pulse estimation at typical PPG sizes.

use biostream::dsp::filter::{FilterConfig, StreamingFilter};
use biostream::dsp::spectrum::estimate_pulse_rate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::f64::consts::PI;

fn ppg(n: usize, fs: f64) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let t = i as f64 / fs;
            512.0 + 80.0 * (2.0 * PI * 1.2 * t).sin() + 5.0 * (2.0 * PI * 50.0 * t).sin()
        })
        .collect()
}

fn bench_process_sample(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_sample");
    let signal = ppg(1000, 100.0);

    for order in [2usize, 4, 8] {
        let config = FilterConfig {
            order,
            ..FilterConfig::default()
        };
        group.bench_with_input(BenchmarkId::from_parameter(order), &config, |b, config| {
            let mut filter = StreamingFilter::new(*config).unwrap();
            b.iter(|| {
                for (i, &v) in signal.iter().enumerate() {
                    black_box(filter.process_sample(i as f64 * 0.01, v));
                }
            });
        });
    }
    group.finish();
}

fn bench_apply_to_array(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_to_array");
    let filter = StreamingFilter::new(FilterConfig::default()).unwrap();

    for len in [100usize, 1_000, 10_000] {
        let signal = ppg(len, 100.0);
        group.bench_with_input(BenchmarkId::from_parameter(len), &signal, |b, signal| {
            b.iter(|| black_box(filter.apply_to_array(black_box(signal))));
        });
    }
    group.finish();
}

fn bench_pulse_estimate(c: &mut Criterion) {
    let signal = ppg(1000, 100.0);
    c.bench_function("estimate_pulse_rate_10s", |b| {
        b.iter(|| black_box(estimate_pulse_rate(black_box(&signal), 100.0)));
    });
}

criterion_group!(
    benches,
    bench_process_sample,
    bench_apply_to_array,
    bench_pulse_estimate
);
criterion_main!(benches);
