//! Benchmarks for index-fetcher
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use index_fetcher::error::ProbeError;
use index_fetcher::fetcher::plan;
use index_fetcher::flag::builtin::{LEAPING, PENDING, RUNNING, STEPPING};
use index_fetcher::flag::{job_step_vocabulary, FlagGroup};
use index_fetcher::job::IndexJob;
use index_fetcher::span::StepSpan;

fn benchmark_flag_transitions(c: &mut Criterion) {
    c.bench_function("flag_phase_switch", |b| {
        let group = FlagGroup::new(job_step_vocabulary(), PENDING).unwrap();
        group.replace(PENDING, [RUNNING, STEPPING]).unwrap();

        b.iter(|| {
            group.replace(STEPPING, LEAPING).unwrap();
            group.replace(LEAPING, STEPPING).unwrap();
            black_box(group.has(STEPPING));
        })
    });
}

fn benchmark_traversal(c: &mut Criterion) {
    c.bench_function("dense_traversal_10k", |b| {
        b.iter(|| {
            let job = IndexJob::new(0, Some(9_999), 1).unwrap();
            black_box(job.run().unwrap());
        })
    });

    c.bench_function("sparse_traversal_10k", |b| {
        b.iter(|| {
            let mut job = IndexJob::new(0, Some(9_999), 1).unwrap();
            job.add_handler(|i: i64| {
                if (i / 100) % 3 == 0 {
                    Ok(())
                } else {
                    Err(ProbeError::skip("absent"))
                }
            });
            black_box(job.run().unwrap());
        })
    });
}

fn benchmark_plan(c: &mut Criterion) {
    c.bench_function("plan_64_weights", |b| {
        let span = StepSpan::new(0, Some(1_000_000_000), 7).unwrap();
        let weights: Vec<f64> = (1..=64).map(|w| w as f64 / 2080.0).collect();

        b.iter(|| black_box(plan(&span, &weights).unwrap()))
    });
}

criterion_group!(benches, benchmark_flag_transitions, benchmark_traversal, benchmark_plan);
criterion_main!(benches);
