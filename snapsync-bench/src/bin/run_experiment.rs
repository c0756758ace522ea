// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Run a loopback snapsync experiment and write a JSON report.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use snapsync_bench::harness::BenchmarkHarness;
use snapsync_bench::{
    BenchmarkCategory, BenchmarkReport, BenchmarkResult, JsonReporter, LatencyMetrics,
    LoopbackExperiment,
};
use snapsync_core::config::Accounting;
use snapsync_core::wire::{decode_call, decode_result, encode_call, encode_result};
use snapsync_core::{
    Call, CompletionBarrier, DatagramWake, DatagramWaker, Endpoint, Expectation, MmapController,
    MmapSignal, RoundObserver, RoundSummary, SignalError, WakeSource,
};

#[derive(Parser)]
#[command(name = "run_experiment")]
#[command(about = "Run loopback snapsync rounds and overhead microbenchmarks")]
struct Args {
    /// Output directory for reports
    #[arg(short, long, default_value = "data")]
    output: PathBuf,

    /// Datagram workers in the loopback experiment
    #[arg(short, long, default_value_t = 4)]
    workers: usize,

    /// Loopback rounds
    #[arg(short, long, default_value_t = 100)]
    rounds: u64,

    /// Per-round workload of each worker, in milliseconds
    #[arg(long, default_value_t = 1)]
    workload_ms: u64,

    /// Account reports by worker identity instead of count
    #[arg(long)]
    identity: bool,

    /// Iterations for each microbenchmark
    #[arg(short, long, default_value_t = 1000)]
    iterations: u64,

    /// Skip the microbenchmarks
    #[arg(long)]
    rounds_only: bool,

    /// Fewer rounds and iterations
    #[arg(long)]
    quick: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let (rounds, iterations) = if args.quick {
        (args.rounds.min(10), args.iterations.min(100))
    } else {
        (args.rounds, args.iterations)
    };

    println!("Snapsync Experiment");
    println!("===================");
    println!("Output directory: {:?}", args.output);
    println!("Workers: {}, rounds: {}", args.workers, rounds);
    println!();

    let reporter = JsonReporter::new(&args.output)?;
    let mut report = BenchmarkReport::new();

    run_loopback(&mut report, &args, rounds)?;

    if !args.rounds_only {
        let harness = BenchmarkHarness::new()
            .warmup((iterations / 10).max(1))
            .iterations(iterations)
            .keep_samples(false);
        run_wake_benchmarks(&mut report, &harness)?;
        run_barrier_benchmark(&mut report, &harness)?;
        run_codec_benchmark(&mut report, &harness)?;
    }

    let path = reporter.save(&report)?;
    println!();
    println!("Report {} saved to: {:?}", report.run_id, path);
    println!();

    print_summary(&report);
    Ok(())
}

fn run_loopback(report: &mut BenchmarkReport, args: &Args, rounds: u64) -> anyhow::Result<()> {
    let accounting = if args.identity {
        Accounting::Identity
    } else {
        Accounting::Count
    };
    let experiment = LoopbackExperiment {
        workers: args.workers,
        rounds,
        workload: Duration::from_millis(args.workload_ms),
        accounting,
        ..Default::default()
    };

    println!("Running loopback rounds...");
    let run = experiment.run().context("loopback experiment failed")?;

    let samples = run
        .rounds
        .iter()
        .map(|r| r.elapsed.as_nanos() as u64)
        .collect();
    report.add_result(
        BenchmarkResult::latency("loopback_round", BenchmarkCategory::Round, samples, true)
            .with_metadata("workers", args.workers)
            .with_metadata("workload_ms", args.workload_ms)
            .with_metadata("accounting", if args.identity { "identity" } else { "count" })
            .with_metadata("failed_wakes", run.failed_wakes())
            .with_metadata("wall_ms", run.wall.as_secs_f64() * 1000.0),
    );
    println!("  ✓ loopback_round ({} rounds)", run.rounds.len());
    Ok(())
}

fn run_wake_benchmarks(
    report: &mut BenchmarkReport,
    harness: &BenchmarkHarness,
) -> anyhow::Result<()> {
    println!("Running wake benchmarks...");

    let mut wake = DatagramWake::bind("127.0.0.1:0")?;
    let target = Endpoint::from_socket_addr(wake.local_addr()?)?;
    let waker = DatagramWaker::new()?;
    let samples = harness.run(|| -> Result<(), SignalError> {
        waker.wake(&target)?;
        wake.wait_for_release()
    })?;
    report.add_result(
        BenchmarkResult::latency(
            "wake_datagram_loopback",
            BenchmarkCategory::Wake,
            samples,
            harness.should_keep_samples(),
        )
        .with_metadata("transport", "udp"),
    );
    println!("  ✓ wake_datagram_loopback");

    let path = std::env::temp_dir().join(format!("snapsync-bench-{}.signal", std::process::id()));
    let controller = MmapController::create(&path, b'0')?;
    let mut signal = MmapSignal::open(&path, b'0')?;
    let samples = harness.run_with_setup(
        || controller.arm(),
        || -> Result<(), SignalError> {
            controller.release(b'1')?;
            signal.wait_for_release()
        },
    )?;
    report.add_result(
        BenchmarkResult::latency(
            "wake_mmap_same_thread",
            BenchmarkCategory::Wake,
            samples,
            harness.should_keep_samples(),
        )
        .with_metadata("transport", "mmap"),
    );
    drop(signal);
    drop(controller);
    std::fs::remove_file(&path).ok();
    println!("  ✓ wake_mmap_same_thread");
    Ok(())
}

fn run_barrier_benchmark(
    report: &mut BenchmarkReport,
    harness: &BenchmarkHarness,
) -> anyhow::Result<()> {
    println!("Running barrier benchmark...");

    let barrier = CompletionBarrier::new(Arc::new(SilentObserver));
    let expectation = Expectation::count(4)?;
    let samples = harness.run(|| -> Result<(), std::convert::Infallible> {
        barrier.arm(expectation.clone());
        for _ in 0..4 {
            barrier.report(None);
        }
        Ok(())
    })?;
    report.add_result(
        BenchmarkResult::latency(
            "barrier_arm_and_four_reports",
            BenchmarkCategory::Barrier,
            samples,
            harness.should_keep_samples(),
        )
        .with_metadata("expected", 4),
    );
    println!("  ✓ barrier_arm_and_four_reports");
    Ok(())
}

fn run_codec_benchmark(
    report: &mut BenchmarkReport,
    harness: &BenchmarkHarness,
) -> anyhow::Result<()> {
    println!("Running codec benchmark...");

    let call = Call::new("report").kwarg("identity", "worker-0");
    let samples = harness.run(|| -> anyhow::Result<()> {
        let bytes = encode_call(&call)?;
        let decoded = decode_call(&bytes)?;
        let reply = encode_result(&Ok(serde_json::json!({ "outcome": "counted" })))?;
        decode_result(&reply)?;
        anyhow::ensure!(decoded.method == call.method, "method mangled in transit");
        Ok(())
    })?;
    report.add_result(BenchmarkResult::latency(
        "codec_report_call_round_trip",
        BenchmarkCategory::Codec,
        samples,
        harness.should_keep_samples(),
    ));
    println!("  ✓ codec_report_call_round_trip");
    Ok(())
}

struct SilentObserver;

impl RoundObserver for SilentObserver {
    fn round_satisfied(&self, _summary: &RoundSummary) {}
}

fn print_summary(report: &BenchmarkReport) {
    println!("Summary");
    println!("-------");
    println!();

    for result in &report.results {
        println!(
            "{}: median={}, p99={}",
            result.name,
            LatencyMetrics::format_latency(result.latency.median_ns),
            LatencyMetrics::format_latency(result.latency.p99_ns)
        );
    }

    if let Some(round) = report.results_in(BenchmarkCategory::Round).next() {
        println!();
        println!("[loopback] rounds: {}", round.latency.summary_line());
    }
}
