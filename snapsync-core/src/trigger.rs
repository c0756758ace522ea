// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Trigger role: starts a round and fans out wake signals.
//!
//! Per round the trigger arms the master, then wakes every worker without
//! waiting in between, then optionally times one synchronous call to a
//! worker's RPC endpoint. It never polls the master: the master's aggregate
//! duration and the trigger's round-trip are separate measurements.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::barrier::Expectation;
use crate::error::{SignalError, SnapsyncResult};
use crate::master::MasterClient;
use crate::rpc::RpcClient;
use crate::signal::{DatagramWaker, MmapController};
use crate::types::Endpoint;
use crate::wire::Call;

/// Method a synchronous worker serves its workload under.
pub const INVOKE_METHOD: &str = "invoke";

/// One worker to release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeTarget {
    /// Worker waiting on a datagram at this endpoint.
    Datagram(Endpoint),
    /// Same-host worker spinning on a signal file.
    Mmap {
        path: PathBuf,
        armed: u8,
        release: u8,
    },
}

/// What one round looked like from the trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerOutcome {
    pub round: u64,
    /// Wake signals handed off successfully.
    pub woken: usize,
    /// Wake signals that could not be sent (logged, not retried).
    pub failed_wakes: usize,
    /// Round-trip of the synchronous worker call, if one is configured.
    pub round_trip: Option<Duration>,
}

impl TriggerOutcome {
    pub fn round_trip_ms(&self) -> Option<f64> {
        self.round_trip.map(|d| d.as_secs_f64() * 1000.0)
    }
}

struct MmapTarget {
    controller: MmapController,
    release: u8,
}

/// The trigger.
pub struct Trigger {
    master: MasterClient,
    datagram_targets: Vec<Endpoint>,
    mmap_targets: Vec<MmapTarget>,
    waker: DatagramWaker,
    sync_worker: Option<RpcClient>,
}

impl Trigger {
    /// Build a trigger. Signal files of mmap targets are created and armed
    /// here, so workers can start waiting before the first round.
    pub fn new(master: MasterClient, targets: Vec<WakeTarget>) -> Result<Self, SignalError> {
        let mut datagram_targets = Vec::new();
        let mut mmap_targets = Vec::new();

        for target in targets {
            match target {
                WakeTarget::Datagram(endpoint) => datagram_targets.push(endpoint),
                WakeTarget::Mmap {
                    path,
                    armed,
                    release,
                } => {
                    if release == armed {
                        return Err(SignalError::ReleaseEqualsArmed { byte: release });
                    }
                    mmap_targets.push(MmapTarget {
                        controller: MmapController::create(&path, armed)?,
                        release,
                    });
                }
            }
        }

        Ok(Self {
            master,
            datagram_targets,
            mmap_targets,
            waker: DatagramWaker::new()?,
            sync_worker: None,
        })
    }

    /// Time a synchronous `invoke` call against this worker each round.
    pub fn with_sync_worker(mut self, client: RpcClient) -> Self {
        self.sync_worker = Some(client);
        self
    }

    pub fn target_count(&self) -> usize {
        self.datagram_targets.len() + self.mmap_targets.len()
    }

    /// Re-arm every signal file for the next round.
    pub fn prepare(&self) -> Result<(), SignalError> {
        for target in &self.mmap_targets {
            target.controller.arm()?;
        }
        Ok(())
    }

    /// Run one round: arm, wake all, then the optional synchronous call.
    pub fn run_round(&self, expectation: &Expectation) -> SnapsyncResult<TriggerOutcome> {
        let round = self.master.arm(expectation)?;

        let report = self.waker.wake_all(&self.datagram_targets);
        let mut woken = report.sent;
        let mut failed_wakes = report.failed;

        for target in &self.mmap_targets {
            match target.controller.release(target.release) {
                Ok(()) => woken += 1,
                Err(e) => {
                    tracing::warn!(path = %target.controller.path().display(), error = %e, "Signal release failed");
                    failed_wakes += 1;
                }
            }
        }

        tracing::info!(
            round = round,
            woken = woken,
            failed = failed_wakes,
            "Workers woken"
        );

        let round_trip = match &self.sync_worker {
            Some(client) => Some(self.time_invoke(client)?),
            None => None,
        };

        Ok(TriggerOutcome {
            round,
            woken,
            failed_wakes,
            round_trip,
        })
    }

    /// Run `rounds` rounds, re-arming signal files between them.
    pub fn run_rounds(
        &self,
        expectation: &Expectation,
        rounds: u64,
        interval: Duration,
    ) -> SnapsyncResult<Vec<TriggerOutcome>> {
        let mut outcomes = Vec::new();
        for i in 0..rounds {
            if i > 0 {
                if !interval.is_zero() {
                    std::thread::sleep(interval);
                }
                self.prepare()?;
            }
            outcomes.push(self.run_round(expectation)?);
        }
        Ok(outcomes)
    }

    fn time_invoke(&self, client: &RpcClient) -> SnapsyncResult<Duration> {
        let start = Instant::now();
        client.call(&Call::new(INVOKE_METHOD))?;
        let elapsed = start.elapsed();

        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        tracing::info!(endpoint = %client.endpoint(), elapsed_ms = elapsed_ms, "Synchronous worker returned");
        println!("[trigger] round-trip: {:.2} ms", elapsed_ms);
        Ok(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::LogObserver;
    use crate::master::{Master, MasterStatus};
    use crate::signal::{DatagramWake, MmapSignal, WakeSource};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    fn start_master(rt: &tokio::runtime::Runtime) -> MasterClient {
        let master = Master::new(Arc::new(LogObserver::default()));
        let listener = rt.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let endpoint = Endpoint::from_socket_addr(listener.local_addr().unwrap()).unwrap();
        rt.spawn(master.rpc_server().serve(listener));
        MasterClient::new(RpcClient::new(endpoint))
    }

    #[test]
    fn test_round_arms_master_and_wakes_workers() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let master = start_master(&rt);

        let mut wake = DatagramWake::bind("127.0.0.1:0").unwrap();
        let endpoint = Endpoint::from_socket_addr(wake.local_addr().unwrap()).unwrap();

        let dir = TempDir::new().unwrap();
        let flag = dir.path().join("flag");

        let trigger = Trigger::new(
            master.clone(),
            vec![
                WakeTarget::Datagram(endpoint),
                WakeTarget::Mmap {
                    path: flag.clone(),
                    armed: b'0',
                    release: b'1',
                },
            ],
        )
        .unwrap();
        assert_eq!(trigger.target_count(), 2);

        let mut signal = MmapSignal::open(&flag, b'0').unwrap();
        assert!(!signal.is_released().unwrap());

        let outcome = trigger.run_round(&Expectation::count(2).unwrap()).unwrap();
        assert_eq!(outcome.round, 1);
        assert_eq!(outcome.woken, 2);
        assert_eq!(outcome.failed_wakes, 0);
        assert!(outcome.round_trip.is_none());

        wake.wait_for_release().unwrap();
        signal.wait_for_release().unwrap();
        assert!(matches!(master.status().unwrap(), MasterStatus::Armed { round: 1, .. }));

        trigger.prepare().unwrap();
        assert!(!signal.is_released().unwrap());
    }

    #[test]
    fn test_sync_worker_round_trip() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let master = start_master(&rt);

        let dispatcher = crate::dispatch::MethodDispatcher::new();
        dispatcher.register(INVOKE_METHOD, |_, _| {
            std::thread::sleep(Duration::from_millis(5));
            Ok(json!(null))
        });
        let listener = rt.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let endpoint = Endpoint::from_socket_addr(listener.local_addr().unwrap()).unwrap();
        rt.spawn(crate::rpc::RpcServer::new(Arc::new(dispatcher)).serve(listener));

        let trigger = Trigger::new(master, Vec::new())
            .unwrap()
            .with_sync_worker(RpcClient::new(endpoint));

        let outcomes = trigger
            .run_rounds(&Expectation::count(1).unwrap(), 2, Duration::ZERO)
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[1].round, 2);
        assert!(outcomes[0].round_trip.unwrap() >= Duration::from_millis(5));
    }

    #[test]
    fn test_mmap_target_rejects_equal_bytes() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let master = start_master(&rt);
        let dir = TempDir::new().unwrap();

        let result = Trigger::new(
            master,
            vec![WakeTarget::Mmap {
                path: dir.path().join("flag"),
                armed: b'0',
                release: b'0',
            }],
        );
        assert!(matches!(result, Err(SignalError::ReleaseEqualsArmed { .. })));
    }
}
