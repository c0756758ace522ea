// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Wire codec microbenchmarks.
//!
//! Encoding and decoding cost of the calls a round actually sends: `arm`
//! with a count or an identity list, and `report` with an identity.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use snapsync_core::wire::{decode_call, decode_result, encode_call, encode_result};
use snapsync_core::Call;

/// Identity list sizes for `arm` calls.
const WORKER_COUNTS: &[usize] = &[1, 16, 256];

fn arm_call(workers: usize) -> Call {
    let ids: Vec<String> = (0..workers).map(|i| format!("worker-{}", i)).collect();
    Call::new("arm").kwarg("workers", ids)
}

fn bench_encode_arm(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire_encode_arm");

    for &workers in WORKER_COUNTS {
        let call = arm_call(workers);
        let size = encode_call(&call).map(|b| b.len()).unwrap_or(0);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(workers), &call, |b, call| {
            b.iter(|| encode_call(black_box(call)));
        });
    }

    group.finish();
}

fn bench_decode_arm(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire_decode_arm");

    for &workers in WORKER_COUNTS {
        let bytes = encode_call(&arm_call(workers)).expect("encode arm call");
        group.throughput(Throughput::Bytes(bytes.len() as u64));

        group.bench_with_input(BenchmarkId::from_parameter(workers), &bytes, |b, bytes| {
            b.iter(|| decode_call(black_box(bytes)));
        });
    }

    group.finish();
}

fn bench_report_round_trip(c: &mut Criterion) {
    let call = Call::new("report").kwarg("identity", "worker-0");
    let ack = Ok(json!({ "outcome": "counted", "round": 1, "received": 1, "expected": 4 }));

    c.bench_function("wire_report_round_trip", |b| {
        b.iter(|| {
            let request = encode_call(black_box(&call)).expect("encode");
            let decoded = decode_call(&request).expect("decode");
            let reply = encode_result(black_box(&ack)).expect("encode result");
            (decoded, decode_result(&reply))
        });
    });
}

fn bench_decode_malformed(c: &mut Criterion) {
    let garbage = b"{\"method\": 42, \"args\": \"nope\"}".to_vec();
    c.bench_function("wire_decode_malformed", |b| {
        b.iter(|| decode_call(black_box(&garbage)).is_err());
    });
}

criterion_group!(
    benches,
    bench_encode_arm,
    bench_decode_arm,
    bench_report_round_trip,
    bench_decode_malformed
);
criterion_main!(benches);
