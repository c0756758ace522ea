// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! One-call-per-connection RPC transport.
//!
//! The client opens a TCP connection, writes one encoded [`Call`], reads one
//! encoded result and closes. Both sides stop reading once a complete JSON
//! document has arrived, or at EOF. There is no pipelining and no
//! multiplexing.
//!
//! The server runs on tokio with one task per connection; handlers run on
//! the blocking pool so a slow or panicking handler never stalls the accept
//! loop.

use std::future::Future;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::dispatch::MethodDispatcher;
use crate::error::{DispatchError, RpcError, WireError};
use crate::types::Endpoint;
use crate::wire::{self, Call, CallResult, MAX_MESSAGE_BYTES};

const READ_CHUNK: usize = 8192;

/// RPC server backed by a shared [`MethodDispatcher`].
#[derive(Debug, Clone)]
pub struct RpcServer {
    dispatcher: Arc<MethodDispatcher>,
}

impl RpcServer {
    pub fn new(dispatcher: Arc<MethodDispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<MethodDispatcher> {
        &self.dispatcher
    }

    /// Serve connections forever.
    pub async fn serve(self, listener: TcpListener) {
        self.serve_until(listener, std::future::pending()).await
    }

    /// Serve connections until `shutdown` resolves.
    ///
    /// Accept failures and per-connection errors are logged; neither stops
    /// the loop.
    pub async fn serve_until<F>(self, listener: TcpListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, methods = ?self.dispatcher.method_names(), "RPC server listening");
        }

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("RPC server shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let dispatcher = Arc::clone(&self.dispatcher);
                        tokio::spawn(async move {
                            handle_connection(dispatcher, stream, peer).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    dispatcher: Arc<MethodDispatcher>,
    mut stream: tokio::net::TcpStream,
    peer: SocketAddr,
) {
    stream.set_nodelay(true).ok();

    let buf = match read_call(&mut stream).await {
        Ok(buf) => buf,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "Failed to read call");
            return;
        }
    };

    let result: CallResult = match wire::decode_call(&buf) {
        Ok(call) => {
            let method = call.method.clone();
            let outcome =
                tokio::task::spawn_blocking(move || dispatcher.dispatch_call(&call)).await;

            match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e @ DispatchError::MethodNotFound(_))) => {
                    tracing::warn!(peer = %peer, method = %method, "Call to unknown method");
                    Err(e.to_string())
                }
                Ok(Err(e)) => {
                    tracing::warn!(peer = %peer, method = %method, error = %e, "Handler failed");
                    Err(e.to_string())
                }
                Err(join_err) => {
                    tracing::error!(peer = %peer, method = %method, error = %join_err, "Handler panicked");
                    Err(DispatchError::Application(format!("handler panicked: {}", join_err))
                        .to_string())
                }
            }
        }
        Err(e) => {
            // Answer with an error result and drop the connection.
            tracing::warn!(peer = %peer, error = %e, bytes = buf.len(), "Rejected malformed call");
            Err(e.to_string())
        }
    };

    let bytes = match wire::encode_result(&result) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(peer = %peer, error = %e, "Failed to encode result");
            return;
        }
    };

    if let Err(e) = stream.write_all(&bytes).await {
        tracing::debug!(peer = %peer, error = %e, "Failed to write result");
        return;
    }
    let _ = stream.shutdown().await;
}

/// Read until one complete document, EOF, or one byte past the size cap.
async fn read_call(stream: &mut tokio::net::TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buf);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_MESSAGE_BYTES || wire::is_complete_document(&buf) {
            return Ok(buf);
        }
    }
}

/// Blocking counterpart of [`read_call`] for the client side.
fn read_result(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Ok(buf);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_MESSAGE_BYTES || wire::is_complete_document(&buf) {
            return Ok(buf);
        }
    }
}

/// Blocking RPC client for one endpoint.
///
/// No timeouts are applied unless configured; a silent peer blocks the
/// caller indefinitely.
#[derive(Debug, Clone)]
pub struct RpcClient {
    endpoint: Endpoint,
    connect_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
}

impl RpcClient {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            connect_timeout: None,
            io_timeout: None,
        }
    }

    /// Bound the connection setup time.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Bound each read and write on the connection.
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Perform one call over a fresh connection.
    pub fn call(&self, call: &Call) -> Result<serde_json::Value, RpcError> {
        let request = wire::encode_call(call)?;

        let mut stream = self.connect()?;
        let io_err = |source: std::io::Error| RpcError::Io {
            endpoint: self.endpoint.clone(),
            source,
        };

        stream.set_nodelay(true).ok();
        stream.set_read_timeout(self.io_timeout).map_err(io_err)?;
        stream.set_write_timeout(self.io_timeout).map_err(io_err)?;

        stream.write_all(&request).map_err(io_err)?;
        let response = read_result(&mut stream).map_err(io_err)?;

        tracing::trace!(
            endpoint = %self.endpoint,
            method = %call.method,
            bytes = response.len(),
            "RPC response received"
        );

        if response.len() > MAX_MESSAGE_BYTES {
            return Err(WireError::TooLarge {
                size: response.len(),
                max: MAX_MESSAGE_BYTES,
            }
            .into());
        }

        Ok(wire::decode_result(&response)?)
    }

    fn connect(&self) -> Result<TcpStream, RpcError> {
        let connect_err = |source: std::io::Error| RpcError::Connect {
            endpoint: self.endpoint.clone(),
            source,
        };

        let addr = self.endpoint.resolve().map_err(connect_err)?;
        match self.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout).map_err(connect_err),
            None => TcpStream::connect(addr).map_err(connect_err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::Shutdown;

    fn start_server(dispatcher: MethodDispatcher) -> (tokio::runtime::Runtime, Endpoint) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let listener = rt.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let endpoint = Endpoint::from_socket_addr(listener.local_addr().unwrap()).unwrap();
        rt.spawn(RpcServer::new(Arc::new(dispatcher)).serve(listener));
        (rt, endpoint)
    }

    #[test]
    fn test_call_round_trip_over_tcp() {
        let dispatcher = MethodDispatcher::new();
        dispatcher.register("echo", |args, kwargs| Ok(json!({"args": args, "kwargs": kwargs})));
        let (_rt, endpoint) = start_server(dispatcher);

        let client = RpcClient::new(endpoint);
        let value = client
            .call(&Call::new("echo").arg(1).kwarg("k", "v"))
            .unwrap();
        assert_eq!(value, json!({"args": [1], "kwargs": {"k": "v"}}));
    }

    #[test]
    fn test_unknown_method_then_server_keeps_serving() {
        let dispatcher = MethodDispatcher::new();
        dispatcher.register("ping", |_, _| Ok(json!("pong")));
        let (_rt, endpoint) = start_server(dispatcher);

        let client = RpcClient::new(endpoint);
        let err = client.call(&Call::new("nonexistent")).unwrap_err();
        assert_eq!(err.remote_message(), Some("method not found: nonexistent"));

        assert_eq!(client.call(&Call::new("ping")).unwrap(), json!("pong"));
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let dispatcher = MethodDispatcher::new();
        dispatcher.register("boom", |_, _| panic!("workload exploded"));
        dispatcher.register("ping", |_, _| Ok(json!("pong")));
        let (_rt, endpoint) = start_server(dispatcher);

        let client = RpcClient::new(endpoint);
        let err = client.call(&Call::new("boom")).unwrap_err();
        assert!(err.remote_message().unwrap().contains("panicked"));

        assert_eq!(client.call(&Call::new("ping")).unwrap(), json!("pong"));
    }

    #[test]
    fn test_malformed_call_gets_error_and_server_survives() {
        let dispatcher = MethodDispatcher::new();
        dispatcher.register("ping", |_, _| Ok(json!("pong")));
        let (_rt, endpoint) = start_server(dispatcher);

        let mut raw = TcpStream::connect(endpoint.resolve().unwrap()).unwrap();
        raw.write_all(b"{\"args\": [1]}").unwrap();
        raw.shutdown(Shutdown::Write).unwrap();
        let mut response = Vec::new();
        raw.read_to_end(&mut response).unwrap();
        let err = wire::decode_result(&response).unwrap_err();
        assert!(err.to_string().contains("missing method name"));

        let client = RpcClient::new(endpoint);
        assert_eq!(client.call(&Call::new("ping")).unwrap(), json!("pong"));
    }

    #[test]
    fn test_call_answered_without_half_close() {
        let dispatcher = MethodDispatcher::new();
        dispatcher.register("ping", |_, _| Ok(json!("pong")));
        let (_rt, endpoint) = start_server(dispatcher);

        // Write side stays open; the server must answer on the complete document.
        let mut raw = TcpStream::connect(endpoint.resolve().unwrap()).unwrap();
        raw.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        raw.write_all(b"{\"method\":\"ping\",\"args\":[],\"kwargs\":{}}")
            .unwrap();

        let mut response = Vec::new();
        raw.read_to_end(&mut response).unwrap();
        assert_eq!(wire::decode_result(&response).unwrap(), json!("pong"));
    }

    #[test]
    fn test_call_split_across_writes() {
        let dispatcher = MethodDispatcher::new();
        dispatcher.register("echo", |args, _| Ok(json!(args)));
        let (_rt, endpoint) = start_server(dispatcher);

        let mut raw = TcpStream::connect(endpoint.resolve().unwrap()).unwrap();
        raw.set_nodelay(true).unwrap();
        raw.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        raw.write_all(b"{\"method\":\"echo\",\"args\":[1,").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        raw.write_all(b"2]}").unwrap();

        let mut response = Vec::new();
        raw.read_to_end(&mut response).unwrap();
        assert_eq!(wire::decode_result(&response).unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to find a port with no listener.
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let client = RpcClient::new(Endpoint::from_socket_addr(addr).unwrap())
            .connect_timeout(Duration::from_secs(1));
        assert!(matches!(
            client.call(&Call::new("ping")),
            Err(RpcError::Connect { .. })
        ));
    }
}
