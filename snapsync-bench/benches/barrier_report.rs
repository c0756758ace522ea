// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Completion barrier microbenchmarks.
//!
//! Cost of accounting a round in-process, without RPC, for count and
//! identity expectations and under contention from reporting threads.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use snapsync_core::{
    CompletionBarrier, Expectation, RoundObserver, RoundSummary, WorkerId,
};
use std::sync::{Arc, Barrier};
use std::thread;

const WORKER_COUNTS: &[usize] = &[1, 8, 64];

struct Silent;

impl RoundObserver for Silent {
    fn round_satisfied(&self, summary: &RoundSummary) {
        black_box(summary.elapsed);
    }
}

fn bench_count_round(c: &mut Criterion) {
    let mut group = c.benchmark_group("barrier_count_round");
    let barrier = CompletionBarrier::new(Arc::new(Silent));

    for &workers in WORKER_COUNTS {
        let expectation = Expectation::count(workers).expect("count expectation");
        group.bench_with_input(
            BenchmarkId::from_parameter(workers),
            &expectation,
            |b, expectation| {
                b.iter(|| {
                    barrier.arm(expectation.clone());
                    for _ in 0..workers {
                        black_box(barrier.report(None));
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_identity_round(c: &mut Criterion) {
    let mut group = c.benchmark_group("barrier_identity_round");
    let barrier = CompletionBarrier::new(Arc::new(Silent));

    for &workers in WORKER_COUNTS {
        let ids: Vec<WorkerId> = (0..workers)
            .map(|i| WorkerId::new(format!("worker-{}", i)).expect("worker id"))
            .collect();
        let expectation = Expectation::identities(ids.clone()).expect("identity expectation");

        group.bench_with_input(BenchmarkId::from_parameter(workers), &ids, |b, ids| {
            b.iter(|| {
                barrier.arm(expectation.clone());
                for id in ids {
                    black_box(barrier.report(Some(id)));
                }
            });
        });
    }

    group.finish();
}

fn bench_contended_round(c: &mut Criterion) {
    let mut group = c.benchmark_group("barrier_contended_round");
    group.sample_size(20);

    for &threads in &[2usize, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            let barrier = CompletionBarrier::new_shared(Arc::new(Silent));
            let expectation = Expectation::count(threads).expect("count expectation");

            b.iter(|| {
                barrier.arm(expectation.clone());
                let start = Arc::new(Barrier::new(threads));
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let barrier = Arc::clone(&barrier);
                        let start = Arc::clone(&start);
                        thread::spawn(move || {
                            start.wait();
                            barrier.report(None)
                        })
                    })
                    .collect();
                for handle in handles {
                    black_box(handle.join().expect("reporter thread"));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_count_round,
    bench_identity_round,
    bench_contended_round
);
criterion_main!(benches);
