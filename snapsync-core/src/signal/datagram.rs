//! Single-datagram wake for cross-host release.
//!
//! The waker sends one unacknowledged datagram per target. A dropped
//! datagram is not detected here: the round it belonged to simply never
//! satisfies at the master.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::OnceLock;

use crate::error::SignalError;
use crate::types::Endpoint;

use super::WakeSource;

/// Payload of a wake datagram. Only its arrival matters.
pub const WAKE_PAYLOAD: &[u8] = b"wake";

/// Receive buffer size; longer datagrams are truncated.
const RECV_BUF_LEN: usize = 1024;

/// Waiting side: a UDP socket bound to the worker's fixed endpoint.
///
/// The socket stays bound across rounds, so a wake that arrives while the
/// worker is still busy with the previous round is queued by the kernel.
pub struct DatagramWake {
    socket: UdpSocket,
    buf: [u8; RECV_BUF_LEN],
}

impl DatagramWake {
    /// Bind the wake socket.
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self, SignalError> {
        let socket = UdpSocket::bind(addr).map_err(|source| SignalError::Socket {
            context: "bind wake socket".to_string(),
            source,
        })?;

        if let Ok(local) = socket.local_addr() {
            tracing::debug!(addr = %local, "Wake socket bound");
        }

        Ok(Self {
            socket,
            buf: [0u8; RECV_BUF_LEN],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SignalError> {
        self.socket.local_addr().map_err(|source| SignalError::Socket {
            context: "wake socket address".to_string(),
            source,
        })
    }
}

impl WakeSource for DatagramWake {
    /// One blocking receive. No timeout.
    fn wait_for_release(&mut self) -> Result<(), SignalError> {
        let (len, peer) =
            self.socket
                .recv_from(&mut self.buf)
                .map_err(|source| SignalError::Socket {
                    context: "receive wake datagram".to_string(),
                    source,
                })?;
        tracing::trace!(peer = %peer, bytes = len, "Wake datagram received");
        Ok(())
    }
}

/// Outcome of a fan-out of wake datagrams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WakeReport {
    /// Datagrams handed to the kernel.
    pub sent: usize,
    /// Targets that could not be resolved or sent to.
    pub failed: usize,
}

/// Controller side: sends wake datagrams.
///
/// Holds one ephemeral socket per address family, each bound on first use,
/// so IPv4 and IPv6 targets can be mixed in one fan-out.
pub struct DatagramWaker {
    v4: OnceLock<UdpSocket>,
    v6: OnceLock<UdpSocket>,
}

impl DatagramWaker {
    /// Bind the IPv4 sending socket; the IPv6 one waits for an IPv6 target.
    pub fn new() -> Result<Self, SignalError> {
        let waker = Self {
            v4: OnceLock::new(),
            v6: OnceLock::new(),
        };
        waker.socket_for(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))?;
        Ok(waker)
    }

    /// Sending socket matching the family of `addr`.
    fn socket_for(&self, addr: &SocketAddr) -> Result<&UdpSocket, SignalError> {
        let (slot, local) = match addr {
            SocketAddr::V4(_) => (&self.v4, SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))),
            SocketAddr::V6(_) => (&self.v6, SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))),
        };
        if let Some(socket) = slot.get() {
            return Ok(socket);
        }

        let socket = UdpSocket::bind(local).map_err(|source| SignalError::Socket {
            context: format!("bind waker socket on {}", local),
            source,
        })?;
        tracing::debug!(addr = %local, "Waker socket bound");
        // A concurrent caller may have won the race; either socket works.
        Ok(slot.get_or_init(|| socket))
    }

    /// Send one wake datagram to `target`. Best effort: success only means
    /// the kernel accepted the datagram.
    pub fn wake(&self, target: &Endpoint) -> Result<(), SignalError> {
        let addr = target.resolve().map_err(|source| SignalError::Socket {
            context: format!("resolve {}", target),
            source,
        })?;

        self.socket_for(&addr)?
            .send_to(WAKE_PAYLOAD, addr)
            .map_err(|source| SignalError::Socket {
                context: format!("send wake to {}", target),
                source,
            })?;
        Ok(())
    }

    /// Wake every target without waiting in between. Failures are logged
    /// and counted, never retried.
    pub fn wake_all<'a>(&self, targets: impl IntoIterator<Item = &'a Endpoint>) -> WakeReport {
        let mut report = WakeReport::default();
        for target in targets {
            match self.wake(target) {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    tracing::warn!(target = %target, error = %e, "Wake datagram not sent");
                    report.failed += 1;
                }
            }
        }
        report
    }
}
