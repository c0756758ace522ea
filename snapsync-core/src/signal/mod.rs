// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! One-bit wake signals between a controller and a waiting worker.
//!
//! Two transports share the [`WakeSource`] contract:
//!
//! - [`MmapSignal`]: a memory-mapped flag byte polled by busy-wait, for
//!   lowest-latency same-host release.
//! - [`DatagramWake`]: a single best-effort UDP datagram, for cross-host
//!   wake-up. No retry and no acknowledgment.

mod datagram;
mod mmap;

pub use datagram::{DatagramWake, DatagramWaker, WakeReport, WAKE_PAYLOAD};
pub use mmap::{MmapController, MmapSignal, SIGNAL_MAP_LEN};

use crate::error::SignalError;

/// Waiting side of a wake signal.
pub trait WakeSource: Send {
    /// Block until the controller releases this waiter.
    fn wait_for_release(&mut self) -> Result<(), SignalError>;
}

impl<W: WakeSource + ?Sized> WakeSource for Box<W> {
    fn wait_for_release(&mut self) -> Result<(), SignalError> {
        (**self).wait_for_release()
    }
}
