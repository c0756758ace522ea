// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Loopback experiment: master, trigger and datagram workers in one process.
//!
//! The master runs on a private tokio runtime bound to 127.0.0.1. Every
//! worker is a thread with its own wake socket and a sleeping workload.
//! Rounds run back to back: the next round is armed only after the master
//! reports the previous one satisfied.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use snapsync_core::config::Accounting;
use snapsync_core::{
    BarrierError, BarrierSnapshot, CompletionBarrier, DatagramWake, Endpoint, Expectation,
    HardValidationError, LatencyMetrics, Master, MasterClient, RoundObserver, RoundSummary,
    RpcClient, SignalError, SnapsyncError, Trigger, TriggerOutcome, WakeTarget, Worker, WorkerId,
    WorkerSummary, WorkloadError,
};

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("Invalid experiment parameter: {reason}")]
    InvalidParameter { reason: String },

    #[error("Round {round} not satisfied within {waited:?}")]
    RoundTimeout { round: u64, waited: Duration },

    #[error("Worker {id} panicked")]
    WorkerPanicked { id: String },

    #[error(transparent)]
    Snapsync(#[from] SnapsyncError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Validation(#[from] HardValidationError),

    #[error(transparent)]
    Barrier(#[from] BarrierError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parameters of one loopback run.
#[derive(Debug, Clone)]
pub struct LoopbackExperiment {
    pub workers: usize,
    pub rounds: u64,
    /// Time each worker sleeps per round before reporting
    pub workload: Duration,
    pub accounting: Accounting,
    pub round_interval: Duration,
    pub round_timeout: Duration,
}

impl Default for LoopbackExperiment {
    fn default() -> Self {
        Self {
            workers: 4,
            rounds: 10,
            workload: Duration::from_millis(1),
            accounting: Accounting::Count,
            round_interval: Duration::ZERO,
            round_timeout: Duration::from_secs(5),
        }
    }
}

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct ExperimentRun {
    /// Master-side summaries, one per satisfied round
    pub rounds: Vec<RoundSummary>,
    pub outcomes: Vec<TriggerOutcome>,
    pub workers: Vec<WorkerSummary>,
    pub wall: Duration,
}

impl ExperimentRun {
    pub fn round_metrics(&self, keep_raw: bool) -> LatencyMetrics {
        let elapsed: Vec<Duration> = self.rounds.iter().map(|r| r.elapsed).collect();
        LatencyMetrics::from_durations(&elapsed, keep_raw)
    }

    pub fn failed_wakes(&self) -> usize {
        self.outcomes.iter().map(|o| o.failed_wakes).sum()
    }
}

/// Satisfied rounds are only logged; the runner reads the barrier history.
struct QuietObserver;

impl RoundObserver for QuietObserver {
    fn round_satisfied(&self, summary: &RoundSummary) {
        tracing::debug!(
            round = summary.round,
            expected = summary.expected,
            elapsed_ms = summary.elapsed_ms(),
            "Round satisfied"
        );
    }
}

impl LoopbackExperiment {
    fn validate(&self) -> Result<(), ExperimentError> {
        if self.workers == 0 {
            return Err(ExperimentError::InvalidParameter {
                reason: "at least one worker is required".to_string(),
            });
        }
        if self.rounds == 0 {
            return Err(ExperimentError::InvalidParameter {
                reason: "at least one round is required".to_string(),
            });
        }
        Ok(())
    }

    /// Run the experiment to completion.
    ///
    /// On a round timeout the worker threads are left blocked on their wake
    /// sockets; the caller is expected to exit.
    pub fn run(&self) -> Result<ExperimentRun, ExperimentError> {
        self.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;

        let master = Master::new(Arc::new(QuietObserver));
        let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0"))?;
        let master_endpoint = Endpoint::from_socket_addr(listener.local_addr()?)?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        runtime.spawn(master.rpc_server().serve_until(listener, async move {
            let _ = shutdown_rx.await;
        }));

        let mut ids = Vec::with_capacity(self.workers);
        let mut targets = Vec::with_capacity(self.workers);
        let mut handles = Vec::with_capacity(self.workers);
        for i in 0..self.workers {
            let id = WorkerId::new(format!("worker-{}", i))?;
            let wake = DatagramWake::bind("127.0.0.1:0")?;
            targets.push(WakeTarget::Datagram(Endpoint::from_socket_addr(
                wake.local_addr()?,
            )?));
            handles.push(self.spawn_worker(id.clone(), wake, master_endpoint.clone()));
            ids.push(id);
        }

        let expectation = match self.accounting {
            Accounting::Count => Expectation::count(self.workers)?,
            Accounting::Identity => Expectation::identities(ids.iter().cloned())?,
        };
        let trigger = Trigger::new(
            MasterClient::new(RpcClient::new(master_endpoint.clone())),
            targets,
        )?;

        tracing::info!(
            workers = self.workers,
            rounds = self.rounds,
            mode = expectation.mode(),
            master = %master_endpoint,
            "Loopback experiment starting"
        );

        let start = Instant::now();
        let mut outcomes = Vec::with_capacity(self.rounds as usize);
        for i in 0..self.rounds {
            if i > 0 && !self.round_interval.is_zero() {
                thread::sleep(self.round_interval);
            }
            let outcome = trigger.run_round(&expectation)?;
            wait_until_idle(master.barrier(), outcome.round, self.round_timeout)?;
            outcomes.push(outcome);
        }
        let wall = start.elapsed();

        let mut workers = Vec::with_capacity(handles.len());
        for (id, handle) in ids.iter().zip(handles) {
            let summary = handle
                .join()
                .map_err(|_| ExperimentError::WorkerPanicked {
                    id: id.to_string(),
                })??;
            workers.push(summary);
        }

        let _ = shutdown_tx.send(());
        runtime.shutdown_timeout(Duration::from_secs(1));

        Ok(ExperimentRun {
            rounds: master.barrier().history(),
            outcomes,
            workers,
            wall,
        })
    }

    fn spawn_worker(
        &self,
        id: WorkerId,
        wake: DatagramWake,
        master: Endpoint,
    ) -> JoinHandle<Result<WorkerSummary, SnapsyncError>> {
        let workload = self.workload;
        let rounds = self.rounds;
        thread::spawn(move || {
            let sleep = move || -> Result<(), WorkloadError> {
                if !workload.is_zero() {
                    thread::sleep(workload);
                }
                Ok(())
            };
            Worker::new(wake, sleep, MasterClient::new(RpcClient::new(master)))
                .with_id(id)
                .with_rounds(rounds)
                .run()
        })
    }
}

/// Poll until the barrier leaves `round`. Arming is synchronous, so idle
/// here means the round was satisfied.
fn wait_until_idle(
    barrier: &CompletionBarrier,
    round: u64,
    timeout: Duration,
) -> Result<(), ExperimentError> {
    let start = Instant::now();
    loop {
        match barrier.state() {
            BarrierSnapshot::Idle => return Ok(()),
            BarrierSnapshot::Armed { round: current, .. } if current != round => return Ok(()),
            BarrierSnapshot::Armed { .. } => {}
        }
        let waited = start.elapsed();
        if waited >= timeout {
            return Err(ExperimentError::RoundTimeout { round, waited });
        }
        thread::sleep(Duration::from_micros(200));
    }
}
