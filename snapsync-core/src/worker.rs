// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Worker role: wait for release, run the workload, report completion.

use std::process::Command;
use std::sync::{Mutex, PoisonError};

use serde_json::json;

use crate::dispatch::MethodDispatcher;
use crate::error::{SnapsyncResult, WorkloadError};
use crate::master::{MasterClient, ReportAck};
use crate::signal::WakeSource;
use crate::trigger::INVOKE_METHOD;
use crate::types::WorkerId;

/// The timed unit of work. Opaque to the protocol.
pub trait Workload: Send {
    fn run(&mut self) -> Result<(), WorkloadError>;
}

impl<F> Workload for F
where
    F: FnMut() -> Result<(), WorkloadError> + Send,
{
    fn run(&mut self) -> Result<(), WorkloadError> {
        self()
    }
}

/// Shell command run through `sh -c`, waited for to completion.
#[derive(Debug, Clone)]
pub struct CommandWorkload {
    command: String,
}

impl CommandWorkload {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Workload for CommandWorkload {
    fn run(&mut self) -> Result<(), WorkloadError> {
        let status = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .status()
            .map_err(|source| WorkloadError::SpawnFailed {
                command: self.command.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(WorkloadError::ExitStatus {
                command: self.command.clone(),
                status: status.to_string(),
            })
        }
    }
}

/// Counters for one worker run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub rounds: u64,
    pub workload_failures: u64,
    pub reports_sent: u64,
    pub report_failures: u64,
}

/// A worker bound to one wake source and one workload.
pub struct Worker<W, L> {
    id: Option<WorkerId>,
    wake: W,
    workload: L,
    master: MasterClient,
    rounds: Option<u64>,
}

impl<W: WakeSource, L: Workload> Worker<W, L> {
    /// A worker that runs forever and reports anonymously.
    pub fn new(wake: W, workload: L, master: MasterClient) -> Self {
        Self {
            id: None,
            wake,
            workload,
            master,
            rounds: None,
        }
    }

    /// Report under this identity.
    pub fn with_id(mut self, id: WorkerId) -> Self {
        self.id = Some(id);
        self
    }

    /// Stop after `rounds` rounds. Zero means run forever.
    pub fn with_rounds(mut self, rounds: u64) -> Self {
        self.rounds = (rounds > 0).then_some(rounds);
        self
    }

    /// Run the wait → workload → report loop.
    ///
    /// A failing workload skips the report, so its round never satisfies.
    /// Report delivery failures are logged and not retried. Only a broken
    /// wake source ends the loop with an error.
    pub fn run(&mut self) -> SnapsyncResult<WorkerSummary> {
        let mut summary = WorkerSummary::default();
        let worker = self.id.as_ref().map(WorkerId::as_str).unwrap_or("-").to_string();

        while self.rounds.map_or(true, |limit| summary.rounds < limit) {
            self.wake.wait_for_release()?;
            summary.rounds += 1;
            tracing::debug!(worker = %worker, round = summary.rounds, "Released");

            if let Err(e) = self.workload.run() {
                tracing::warn!(worker = %worker, error = %e, "Workload failed, skipping report");
                summary.workload_failures += 1;
                continue;
            }

            match self.master.report(self.id.as_ref()) {
                Ok(ack) => {
                    summary.reports_sent += 1;
                    if let ReportAck::Rejected { reason, .. } = &ack {
                        tracing::warn!(worker = %worker, reason = %reason, "Master rejected report");
                    } else {
                        tracing::debug!(worker = %worker, ack = ?ack, "Completion reported");
                    }
                }
                Err(e) => {
                    tracing::warn!(worker = %worker, error = %e, "Completion report not delivered");
                    summary.report_failures += 1;
                }
            }
        }

        tracing::info!(
            worker = %worker,
            rounds = summary.rounds,
            failures = summary.workload_failures,
            "Worker finished"
        );
        Ok(summary)
    }
}

/// Dispatcher exposing `workload` as the `invoke` method of a synchronous
/// worker. Calls are serialized; the reply is sent once the workload ends.
pub fn sync_worker_dispatcher<L: Workload + 'static>(workload: L) -> MethodDispatcher {
    let workload = Mutex::new(workload);
    let dispatcher = MethodDispatcher::new();
    dispatcher.register(INVOKE_METHOD, move |_, _| {
        let mut workload = workload.lock().unwrap_or_else(PoisonError::into_inner);
        workload.run().map_err(|e| e.to_string())?;
        Ok(json!({ "status": "ok" }))
    });
    dispatcher
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::{Expectation, LogObserver};
    use crate::master::Master;
    use crate::error::SignalError;
    use crate::rpc::RpcClient;
    use crate::types::Endpoint;
    use serde_json::Map;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    /// Wake source that releases a fixed number of times, then fails.
    struct Scripted(VecDeque<()>);

    impl WakeSource for Scripted {
        fn wait_for_release(&mut self) -> Result<(), SignalError> {
            self.0.pop_front().ok_or_else(|| SignalError::Socket {
                context: "scripted wake exhausted".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
            })
        }
    }

    fn noop() -> Result<(), WorkloadError> {
        Ok(())
    }

    fn scripted(n: usize) -> Scripted {
        Scripted(std::iter::repeat(()).take(n).collect())
    }

    fn start_master(rt: &tokio::runtime::Runtime) -> (Master, MasterClient) {
        let master = Master::new(Arc::new(LogObserver::default()));
        let listener = rt.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let endpoint = Endpoint::from_socket_addr(listener.local_addr().unwrap()).unwrap();
        rt.spawn(master.rpc_server().serve(listener));
        (master, MasterClient::new(RpcClient::new(endpoint)))
    }

    #[test]
    fn test_command_workload_exit_status() {
        assert!(CommandWorkload::new("true").run().is_ok());
        assert!(matches!(
            CommandWorkload::new("exit 3").run(),
            Err(WorkloadError::ExitStatus { .. })
        ));
    }

    #[test]
    fn test_worker_reports_each_round() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (master, client) = start_master(&rt);
        master.barrier().arm(Expectation::count(3).unwrap());

        let mut worker = Worker::new(scripted(3), noop, client)
            .with_id(WorkerId::new("w0").unwrap())
            .with_rounds(3);
        let summary = worker.run().unwrap();

        assert_eq!(summary.rounds, 3);
        assert_eq!(summary.reports_sent, 3);
        assert_eq!(master.barrier().history().len(), 1);
    }

    #[test]
    fn test_failed_workload_skips_report() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (master, client) = start_master(&rt);
        master.barrier().arm(Expectation::count(1).unwrap());

        let failing = || -> Result<(), WorkloadError> {
            Err(WorkloadError::Failed {
                reason: "boom".to_string(),
            })
        };
        let mut worker = Worker::new(scripted(1), failing, client).with_rounds(1);
        let summary = worker.run().unwrap();

        assert_eq!(summary.workload_failures, 1);
        assert_eq!(summary.reports_sent, 0);
        assert!(master.barrier().history().is_empty());
    }

    #[test]
    fn test_unreachable_master_is_logged_not_fatal() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let client = MasterClient::new(RpcClient::new(Endpoint::from_socket_addr(addr).unwrap()));

        let mut worker = Worker::new(scripted(2), noop, client).with_rounds(2);
        let summary = worker.run().unwrap();
        assert_eq!(summary.report_failures, 2);
    }

    #[test]
    fn test_broken_wake_source_ends_loop() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (_master, client) = start_master(&rt);
        let mut worker = Worker::new(scripted(0), noop, client);
        assert!(worker.run().is_err());
    }

    #[test]
    fn test_sync_worker_dispatcher_invoke() {
        let mut calls = 0u32;
        let dispatcher = sync_worker_dispatcher(move || {
            calls += 1;
            if calls > 1 {
                Err(WorkloadError::Failed {
                    reason: "second call".to_string(),
                })
            } else {
                Ok(())
            }
        });

        assert_eq!(
            dispatcher.dispatch(INVOKE_METHOD, &[], &Map::new()).unwrap(),
            json!({"status": "ok"})
        );
        assert!(dispatcher.dispatch(INVOKE_METHOD, &[], &Map::new()).is_err());
    }
}
