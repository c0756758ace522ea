// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CPU pinning for spinning workers.
//!
//! A worker busy-polling a signal file burns its core for the whole wait.
//! Pinning keeps that core stable and off the cores running workloads.

use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
use nix::unistd::Pid;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AffinityError {
    #[error("CPU {cpu} is not online (online: {online:?})")]
    NotOnline { cpu: usize, online: Vec<usize> },

    #[error("sched_setaffinity failed: {0}")]
    Sched(#[from] nix::Error),
}

/// Online CPUs from `/sys/devices/system/cpu/online`, falling back to
/// `0..num_cpus` when sysfs is unavailable.
pub fn online_cpus() -> Vec<usize> {
    std::fs::read_to_string("/sys/devices/system/cpu/online")
        .ok()
        .map(|list| parse_cpu_list(list.trim()))
        .filter(|cpus| !cpus.is_empty())
        .unwrap_or_else(|| (0..num_cpus::get()).collect())
}

/// Pin the calling thread to `cpu`.
pub fn pin_current_thread(cpu: usize) -> Result<(), AffinityError> {
    let online = online_cpus();
    if !online.contains(&cpu) {
        return Err(AffinityError::NotOnline { cpu, online });
    }

    let mut cpuset = CpuSet::new();
    cpuset.set(cpu)?;
    // Pid 0 targets the calling thread.
    sched_setaffinity(Pid::from_raw(0), &cpuset)?;

    tracing::debug!(cpu = cpu, "Thread pinned to CPU");
    Ok(())
}

/// CPUs the calling thread may currently run on.
pub fn current_affinity() -> Result<Vec<usize>, AffinityError> {
    let cpuset = sched_getaffinity(Pid::from_raw(0))?;
    Ok((0..CpuSet::count())
        .filter(|&cpu| cpuset.is_set(cpu).unwrap_or(false))
        .collect())
}

/// Parse a CPU list string like "0-3,8-11" into a Vec of CPU indices.
fn parse_cpu_list(s: &str) -> Vec<usize> {
    let mut cpus = Vec::new();
    for part in s.split(',') {
        let part = part.trim();
        if let Some((start, end)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.parse::<usize>(), end.parse::<usize>()) {
                cpus.extend(start..=end);
            }
        } else if let Ok(cpu) = part.parse::<usize>() {
            cpus.push(cpu);
        }
    }
    cpus
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_list_range() {
        assert_eq!(parse_cpu_list("0-3"), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_parse_cpu_list_mixed() {
        assert_eq!(
            parse_cpu_list("0,2-4,7,10-12"),
            vec![0, 2, 3, 4, 7, 10, 11, 12]
        );
    }

    #[test]
    fn test_parse_cpu_list_empty() {
        assert_eq!(parse_cpu_list(""), Vec::<usize>::new());
    }

    #[test]
    fn test_online_cpus_nonempty() {
        assert!(!online_cpus().is_empty());
    }

    #[test]
    fn test_pin_offline_cpu_rejected() {
        assert!(matches!(
            pin_current_thread(usize::MAX),
            Err(AffinityError::NotOnline { .. })
        ));
    }

    #[test]
    fn test_pin_current_thread() {
        let cpu = current_affinity().unwrap()[0];
        // Runs on its own thread so the test harness thread keeps its mask.
        std::thread::spawn(move || match pin_current_thread(cpu) {
            Ok(()) => assert_eq!(current_affinity().unwrap(), vec![cpu]),
            // Restricted environments may refuse; that is not a logic error.
            Err(e) => println!("Pin failed (expected in restricted environments): {}", e),
        })
        .join()
        .unwrap();
    }
}
