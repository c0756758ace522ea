// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Latency statistics over satisfied rounds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::barrier::RoundSummary;

/// Latency distribution with percentiles, in nanoseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetrics {
    /// Number of samples the metrics were computed from
    pub count: usize,
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: f64,
    /// Median (p50)
    pub median_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
    pub std_dev_ns: f64,
    /// Raw samples, downsampled above 10k entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<u64>>,
}

impl LatencyMetrics {
    /// Calculate metrics from latency samples in nanoseconds.
    pub fn from_samples(mut samples: Vec<u64>, keep_raw: bool) -> Self {
        if samples.is_empty() {
            return Self {
                count: 0,
                min_ns: 0,
                max_ns: 0,
                mean_ns: 0.0,
                median_ns: 0,
                p95_ns: 0,
                p99_ns: 0,
                std_dev_ns: 0.0,
                samples: None,
            };
        }

        samples.sort_unstable();
        let len = samples.len();

        let sum: u128 = samples.iter().map(|&s| s as u128).sum();
        let mean_ns = sum as f64 / len as f64;

        let variance: f64 = samples
            .iter()
            .map(|&x| {
                let diff = x as f64 - mean_ns;
                diff * diff
            })
            .sum::<f64>()
            / len as f64;

        let raw_samples = keep_raw.then(|| {
            if len > 10_000 {
                samples.iter().step_by(len / 1000).copied().collect()
            } else {
                samples.clone()
            }
        });

        Self {
            count: len,
            min_ns: samples[0],
            max_ns: samples[len - 1],
            mean_ns,
            median_ns: samples[len / 2],
            p95_ns: samples[percentile_index(len, 0.95)],
            p99_ns: samples[percentile_index(len, 0.99)],
            std_dev_ns: variance.sqrt(),
            samples: raw_samples,
        }
    }

    pub fn from_durations(durations: &[Duration], keep_raw: bool) -> Self {
        Self::from_samples(
            durations
                .iter()
                .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
                .collect(),
            keep_raw,
        )
    }

    /// Metrics over the elapsed time of every round.
    pub fn from_rounds(rounds: &[RoundSummary]) -> Self {
        let durations: Vec<Duration> = rounds.iter().map(|r| r.elapsed).collect();
        Self::from_durations(&durations, false)
    }

    /// Format latency in human-readable form (auto-selects ns/μs/ms).
    pub fn format_latency(ns: u64) -> String {
        if ns < 1_000 {
            format!("{}ns", ns)
        } else if ns < 1_000_000 {
            format!("{:.2}μs", ns as f64 / 1_000.0)
        } else if ns < 1_000_000_000 {
            format!("{:.2}ms", ns as f64 / 1_000_000.0)
        } else {
            format!("{:.2}s", ns as f64 / 1_000_000_000.0)
        }
    }

    /// One-line summary, e.g. for shutdown logs.
    pub fn summary_line(&self) -> String {
        format!(
            "n={} min={} median={} mean={} p95={} p99={} max={}",
            self.count,
            Self::format_latency(self.min_ns),
            Self::format_latency(self.median_ns),
            Self::format_latency(self.mean_ns as u64),
            Self::format_latency(self.p95_ns),
            Self::format_latency(self.p99_ns),
            Self::format_latency(self.max_ns),
        )
    }
}

fn percentile_index(len: usize, quantile: f64) -> usize {
    ((len as f64 * quantile) as usize).min(len - 1)
}
