// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Master role: the completion barrier exposed over RPC and datagrams.
//!
//! RPC methods:
//!
//! | method   | arguments                                              | result                 |
//! |----------|--------------------------------------------------------|------------------------|
//! | `arm`    | `[n]`, `{"expected": n}` or `{"workers": ["id", ..]}` | `{"round": r}`         |
//! | `report` | `[]`, `["id"]` or `{"identity": "id"}`                 | `{"outcome": .., ..}`  |
//! | `status` | none                                                   | `{"state": .., ..}`    |
//!
//! Datagram ingress accepts `finish`, `finish:<id>` (a report) and a decimal
//! number (arm with that count).

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::net::UdpSocket;

use crate::barrier::{
    BarrierSnapshot, CompletionBarrier, Expectation, ReportOutcome, RoundObserver,
};
use crate::dispatch::MethodDispatcher;
use crate::error::{SnapsyncError, SnapsyncResult};
use crate::rpc::{RpcClient, RpcServer};
use crate::types::{Endpoint, WorkerId};
use crate::wire::Call;

/// Largest datagram accepted on the ingress socket.
const INGRESS_BUF_LEN: usize = 512;

/// Reply to a `report` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ReportAck {
    Counted {
        round: u64,
        received: usize,
        expected: usize,
    },
    Duplicate {
        round: u64,
        identity: String,
    },
    Rejected {
        round: u64,
        reason: String,
    },
    Satisfied {
        round: u64,
        expected: usize,
        elapsed_ms: f64,
    },
    Stale,
}

impl From<&ReportOutcome> for ReportAck {
    fn from(outcome: &ReportOutcome) -> Self {
        match outcome {
            ReportOutcome::Counted {
                round,
                received,
                expected,
            } => Self::Counted {
                round: *round,
                received: *received,
                expected: *expected,
            },
            ReportOutcome::Duplicate { round, identity } => Self::Duplicate {
                round: *round,
                identity: identity.to_string(),
            },
            ReportOutcome::Rejected { round, reason } => Self::Rejected {
                round: *round,
                reason: reason.clone(),
            },
            ReportOutcome::Satisfied(summary) => Self::Satisfied {
                round: summary.round,
                expected: summary.expected,
                elapsed_ms: summary.elapsed_ms(),
            },
            ReportOutcome::Stale => Self::Stale,
        }
    }
}

/// Reply to a `status` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MasterStatus {
    Idle,
    Armed {
        round: u64,
        mode: String,
        received: usize,
        expected: usize,
        elapsed_ms: f64,
    },
}

impl From<BarrierSnapshot> for MasterStatus {
    fn from(snapshot: BarrierSnapshot) -> Self {
        match snapshot {
            BarrierSnapshot::Idle => Self::Idle,
            BarrierSnapshot::Armed {
                round,
                mode,
                received,
                expected,
                elapsed,
            } => Self::Armed {
                round,
                mode: mode.to_string(),
                received,
                expected,
                elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            },
        }
    }
}

/// The coordinating master.
#[derive(Clone)]
pub struct Master {
    barrier: Arc<CompletionBarrier>,
    dispatcher: Arc<MethodDispatcher>,
}

impl Master {
    pub fn new(observer: Arc<dyn RoundObserver>) -> Self {
        let barrier = CompletionBarrier::new_shared(observer);
        let dispatcher = Arc::new(MethodDispatcher::new());
        register_methods(&dispatcher, &barrier);
        Self {
            barrier,
            dispatcher,
        }
    }

    pub fn barrier(&self) -> &Arc<CompletionBarrier> {
        &self.barrier
    }

    pub fn dispatcher(&self) -> &Arc<MethodDispatcher> {
        &self.dispatcher
    }

    /// RPC server answering `arm`, `report` and `status`.
    pub fn rpc_server(&self) -> RpcServer {
        RpcServer::new(Arc::clone(&self.dispatcher))
    }

    /// Serve the datagram ingress until `shutdown` resolves.
    pub async fn serve_datagrams<F>(&self, socket: UdpSocket, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        if let Ok(addr) = socket.local_addr() {
            tracing::info!(addr = %addr, "Datagram ingress listening");
        }

        tokio::pin!(shutdown);
        let mut buf = [0u8; INGRESS_BUF_LEN];

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => {
                        let payload = String::from_utf8_lossy(&buf[..len]);
                        match parse_ingress(&payload) {
                            Some(IngressMessage::Arm(expectation)) => {
                                self.barrier.arm(expectation);
                            }
                            Some(IngressMessage::Finish(identity)) => {
                                self.barrier.report(identity.as_ref());
                            }
                            None => {
                                tracing::warn!(peer = %peer, payload = %payload.trim(), "Ignoring unrecognized datagram");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Datagram receive failed");
                    }
                }
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum IngressMessage {
    Arm(Expectation),
    Finish(Option<WorkerId>),
}

fn parse_ingress(payload: &str) -> Option<IngressMessage> {
    let payload = payload.trim();
    if payload == "finish" {
        return Some(IngressMessage::Finish(None));
    }
    if let Some(id) = payload.strip_prefix("finish:") {
        return WorkerId::new(id)
            .ok()
            .map(|id| IngressMessage::Finish(Some(id)));
    }
    payload
        .parse::<usize>()
        .ok()
        .and_then(|n| Expectation::count(n).ok())
        .map(IngressMessage::Arm)
}

fn register_methods(dispatcher: &MethodDispatcher, barrier: &Arc<CompletionBarrier>) {
    let arm_barrier = Arc::clone(barrier);
    dispatcher.register("arm", move |args, kwargs| {
        let expectation = expectation_from_args(args, kwargs)?;
        let round = arm_barrier.arm(expectation);
        Ok(json!({ "round": round }))
    });

    let report_barrier = Arc::clone(barrier);
    dispatcher.register("report", move |args, kwargs| {
        let identity = identity_from_args(args, kwargs)?;
        let outcome = report_barrier.report(identity.as_ref());
        serde_json::to_value(ReportAck::from(&outcome)).map_err(|e| e.to_string())
    });

    let status_barrier = Arc::clone(barrier);
    dispatcher.register("status", move |_, _| {
        serde_json::to_value(MasterStatus::from(status_barrier.state()))
            .map_err(|e| e.to_string())
    });
}

fn expectation_from_args(args: &[Value], kwargs: &Map<String, Value>) -> Result<Expectation, String> {
    let requested = kwargs
        .get("workers")
        .or_else(|| kwargs.get("expected"))
        .or_else(|| args.first())
        .ok_or("arm requires an expected count or a worker list")?;

    let expectation = match requested {
        Value::Array(items) => {
            let ids = items
                .iter()
                .map(|item| {
                    item.as_str()
                        .ok_or_else(|| format!("worker id must be a string, got {}", item))
                        .and_then(|s| WorkerId::new(s).map_err(|e| e.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Expectation::identities(ids)
        }
        Value::Number(n) => {
            let count = n
                .as_u64()
                .ok_or_else(|| format!("expected count must be a non-negative integer, got {}", n))?;
            Expectation::count(count as usize)
        }
        other => return Err(format!("invalid expectation: {}", other)),
    };

    expectation.map_err(|e| e.to_string())
}

fn identity_from_args(args: &[Value], kwargs: &Map<String, Value>) -> Result<Option<WorkerId>, String> {
    match kwargs.get("identity").or_else(|| args.first()) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => WorkerId::new(s.as_str()).map(Some).map_err(|e| e.to_string()),
        Some(other) => Err(format!("identity must be a string, got {}", other)),
    }
}

/// Typed client for a master's RPC methods.
#[derive(Debug, Clone)]
pub struct MasterClient {
    rpc: RpcClient,
}

impl MasterClient {
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.rpc.endpoint()
    }

    /// Arm a new round and return its number.
    pub fn arm(&self, expectation: &Expectation) -> SnapsyncResult<u64> {
        let call = match expectation {
            Expectation::Count(n) => Call::new("arm").kwarg("expected", n.get()),
            Expectation::Identities(ids) => Call::new("arm").kwarg(
                "workers",
                ids.iter().map(|id| Value::from(id.as_str())).collect::<Vec<_>>(),
            ),
        };

        let value = self.rpc.call(&call)?;
        value
            .get("round")
            .and_then(Value::as_u64)
            .ok_or_else(|| self.unexpected(format!("arm returned {}", value)))
    }

    /// Report one completion.
    pub fn report(&self, identity: Option<&WorkerId>) -> SnapsyncResult<ReportAck> {
        let mut call = Call::new("report");
        if let Some(id) = identity {
            call = call.kwarg("identity", id.as_str());
        }
        let value = self.rpc.call(&call)?;
        serde_json::from_value(value).map_err(|e| self.unexpected(format!("report reply: {}", e)))
    }

    /// Current barrier state.
    pub fn status(&self) -> SnapsyncResult<MasterStatus> {
        let value = self.rpc.call(&Call::new("status"))?;
        serde_json::from_value(value).map_err(|e| self.unexpected(format!("status reply: {}", e)))
    }

    fn unexpected(&self, message: String) -> SnapsyncError {
        SnapsyncError::UnexpectedResponse {
            endpoint: self.endpoint().clone(),
            message,
        }
    }
}
