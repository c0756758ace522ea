//! snapsync Core Library
//!
//! Coordination core for snapshot cold-start experiments: a completion
//! barrier on the master, a one-call-per-connection JSON RPC transport,
//! and wake signals (memory-mapped flag, UDP datagram) that release
//! workers with minimal skew on the measured interval.

pub mod barrier;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod master;
pub mod rpc;
pub mod signal;
pub mod stats;
pub mod trigger;
pub mod types;
pub mod wire;
pub mod worker;

// Re-export commonly used types
pub use barrier::{
    BarrierSnapshot, CompletionBarrier, Expectation, LogObserver, ReportOutcome, RoundObserver,
    RoundSummary,
};
pub use config::{Config, ConfigLoader, MasterConfig, TriggerConfig, WakeConfig, WorkerConfig};
pub use dispatch::MethodDispatcher;
pub use error::{
    BarrierError, DispatchError, HardValidationError, RpcError, SignalError, SnapsyncError,
    SnapsyncResult, WireError, WorkloadError,
};
pub use master::{Master, MasterClient, MasterStatus, ReportAck};
pub use rpc::{RpcClient, RpcServer};
pub use signal::{DatagramWake, DatagramWaker, MmapController, MmapSignal, WakeSource};
pub use stats::LatencyMetrics;
pub use trigger::{Trigger, TriggerOutcome, WakeTarget};
pub use types::{Endpoint, Port, WorkerId};
pub use wire::Call;
pub use worker::{CommandWorkload, Worker, WorkerSummary, Workload};
