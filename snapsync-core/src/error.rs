//! Custom error types for snapsync.
//!
//! This module defines explicit enum error types as per coding guidelines.
//! No `Box<dyn Error>`, no `anyhow::Result` - all errors are strongly typed.
//!
//! Two failure modes of the protocol are deliberately *not* errors: a lost
//! wake datagram surfaces as a round that never satisfies, and a late
//! completion report surfaces as [`crate::barrier::ReportOutcome::Stale`].

use std::path::PathBuf;

use thiserror::Error;

use crate::types::Endpoint;

/// Top-level error type for snapsync roles.
#[derive(Debug, Error)]
pub enum SnapsyncError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Protocol Errors - Local to One Connection
    // =========================================================================
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    // =========================================================================
    // Coordination Errors
    // =========================================================================
    #[error("Barrier error: {0}")]
    Barrier(#[from] BarrierError),

    #[error("Signal error: {0}")]
    Signal(#[from] SignalError),

    #[error("Workload error: {0}")]
    Workload(#[from] WorkloadError),

    #[error("Unexpected response from {endpoint}: {message}")]
    UnexpectedResponse { endpoint: Endpoint, message: String },

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Hard validation errors cause immediate process termination.
/// Used when configuration is invalid and a role cannot safely start.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid port: {port} - {reason}")]
    InvalidPort { port: u16, reason: String },

    #[error("Duplicate worker ID: {id}")]
    DuplicateWorkerId { id: String },

    #[error("Schema validation failed: {message}")]
    SchemaValidation { message: String },
}

/// Errors produced while encoding or decoding one wire message.
#[derive(Debug, Error)]
pub enum WireError {
    /// The bytes are not a JSON document.
    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String },

    /// The JSON document does not have the call/result shape.
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    /// The peer answered with an error result.
    #[error("Remote error: {message}")]
    Remote { message: String },

    #[error("Message size exceeds maximum: {size} > {max}")]
    TooLarge { size: usize, max: usize },

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors returned by [`crate::dispatch::MethodDispatcher::dispatch`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("application error: {0}")]
    Application(String),
}

/// Client-side RPC failures.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error talking to {endpoint}: {source}")]
    Io {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Wire(#[from] WireError),
}

impl RpcError {
    /// Message carried by an error result from the peer, if this is one.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Self::Wire(WireError::Remote { message }) => Some(message),
            _ => None,
        }
    }
}

/// Completion barrier errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BarrierError {
    #[error("Invalid expectation: {reason}")]
    InvalidExpectation { reason: String },
}

/// Wake signal errors - setup failures of the mmap flag or datagram socket.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Failed to open signal file {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to map signal file {path}: {reason}")]
    MapFailed { path: PathBuf, reason: String },

    #[error("Release byte {byte:#04x} equals the armed byte")]
    ReleaseEqualsArmed { byte: u8 },

    #[error("Failed to write signal file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Datagram socket error on {context}: {source}")]
    Socket {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Workload failures observed by a worker.
#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("Failed to spawn workload '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Workload '{command}' exited with {status}")]
    ExitStatus { command: String, status: String },

    #[error("Workload failed: {reason}")]
    Failed { reason: String },
}

/// Result type alias using SnapsyncError.
pub type SnapsyncResult<T> = Result<T, SnapsyncError>;
