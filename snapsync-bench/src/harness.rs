// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Sampling harness for the experiment runner.
//!
//! Operations are fallible: a failed wake or report aborts the measurement
//! instead of being timed as if it succeeded.

use std::time::{Duration, Instant};

/// Collects per-iteration latency samples after a warmup phase.
#[derive(Debug, Clone)]
pub struct BenchmarkHarness {
    warmup_iterations: u64,
    measurement_iterations: u64,
    keep_raw_samples: bool,
}

impl BenchmarkHarness {
    pub fn new() -> Self {
        Self {
            warmup_iterations: 10,
            measurement_iterations: 100,
            keep_raw_samples: true,
        }
    }

    pub fn warmup(mut self, iterations: u64) -> Self {
        self.warmup_iterations = iterations;
        self
    }

    pub fn iterations(mut self, iterations: u64) -> Self {
        self.measurement_iterations = iterations;
        self
    }

    pub fn keep_samples(mut self, keep: bool) -> Self {
        self.keep_raw_samples = keep;
        self
    }

    pub fn should_keep_samples(&self) -> bool {
        self.keep_raw_samples
    }

    /// Time `operation` once per iteration, returning nanosecond samples.
    pub fn run<F, E>(&self, mut operation: F) -> Result<Vec<u64>, E>
    where
        F: FnMut() -> Result<(), E>,
    {
        self.run_with_setup(|| Ok(()), &mut operation)
    }

    /// Like [`run`](Self::run), with an untimed `setup` before every
    /// iteration (re-arming a signal file, for instance).
    pub fn run_with_setup<S, O, E>(&self, mut setup: S, mut operation: O) -> Result<Vec<u64>, E>
    where
        S: FnMut() -> Result<(), E>,
        O: FnMut() -> Result<(), E>,
    {
        for _ in 0..self.warmup_iterations {
            setup()?;
            operation()?;
        }

        let mut samples = Vec::with_capacity(self.measurement_iterations as usize);
        for _ in 0..self.measurement_iterations {
            setup()?;
            let start = Instant::now();
            operation()?;
            samples.push(start.elapsed().as_nanos() as u64);
        }

        Ok(samples)
    }
}

impl Default for BenchmarkHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Measure the execution time of a closure.
pub fn measure<F, T>(f: F) -> (T, Duration)
where
    F: FnOnce() -> T,
{
    let start = Instant::now();
    let result = f();
    (result, start.elapsed())
}
