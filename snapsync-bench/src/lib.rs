// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Snapsync experiment runner and overhead benchmarks.
//!
//! # Measurements
//!
//! - **Round**: full loopback rounds, arm to last report, as the master sees them
//! - **Wake**: controller release to waiter observation, datagram and mmap
//! - **Barrier**: in-process arm and report, no network
//! - **Codec**: call and result encoding on the wire
//!
//! Reports are JSON files tagged with a run id and the host's system info.

pub mod experiment;
pub mod harness;
pub mod metrics;
pub mod reporter;

pub use experiment::{ExperimentError, ExperimentRun, LoopbackExperiment};
pub use harness::BenchmarkHarness;
pub use metrics::{
    BenchmarkCategory, BenchmarkReport, BenchmarkResult, LatencyMetrics, SystemInfo,
};
pub use reporter::JsonReporter;
