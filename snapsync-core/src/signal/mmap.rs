//! Memory-mapped flag byte for same-host release.
//!
//! The waiting process maps the first page of a backing file read-only and
//! spins on the first byte until it differs from the armed byte. The
//! controller flips the byte with a plain positional write; the page cache
//! keeps the write coherent with every `MAP_SHARED` mapping of the file.
//!
//! # CPU-for-latency tradeoff
//!
//! [`MmapSignal::wait_for_release`] never sleeps. A blocking wait would add
//! scheduler wake-up latency to exactly the interval being measured, so the
//! waiter burns one core for the whole wait instead. Pin the waiter to a
//! dedicated core when running several on one host.
//!
//! # Truncation
//!
//! A truncated file reads as released. Reading a mapped page past EOF raises
//! `SIGBUS`, so every live mapping is registered with a process-wide fault
//! guard. The guard swaps the faulting page for a private zero page and
//! marks the mapping truncated; the spin loop sees the mark right after the
//! faulting load returns. Faults outside signal mappings are handed back to
//! the previously installed `SIGBUS` action.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::OnceLock;

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::SignalError;

use super::WakeSource;

/// Length of the read-only mapping over the signal file.
pub const SIGNAL_MAP_LEN: usize = 4096;

/// Signal mappings that may be live at once in one process.
const GUARD_SLOTS: usize = 64;

#[allow(clippy::declare_interior_mutable_const)]
const VACANT: AtomicUsize = AtomicUsize::new(0);
#[allow(clippy::declare_interior_mutable_const)]
const INTACT: AtomicBool = AtomicBool::new(false);

/// Base address of each guarded mapping; 0 marks a free slot.
static GUARDED_PAGES: [AtomicUsize; GUARD_SLOTS] = [VACANT; GUARD_SLOTS];
/// Set by the fault guard once the slot's file was found truncated.
static TRUNCATED: [AtomicBool; GUARD_SLOTS] = [INTACT; GUARD_SLOTS];
/// The `SIGBUS` action replaced by the guard, or the install error.
static PREVIOUS_ACTION: OnceLock<Result<SigAction, nix::Error>> = OnceLock::new();

extern "C" fn on_sigbus(_signo: libc::c_int, info: *mut libc::siginfo_t, _ctx: *mut libc::c_void) {
    // SAFETY: SA_SIGINFO handlers receive a valid siginfo from the kernel.
    let addr = unsafe { (*info).si_addr() } as usize;

    for (slot, page) in GUARDED_PAGES.iter().enumerate() {
        let base = page.load(Ordering::Acquire);
        if base == 0 || addr < base || addr >= base + SIGNAL_MAP_LEN {
            continue;
        }
        // SAFETY: base is a live mapping owned by a Mapping in this process;
        // MAP_FIXED replaces it in place with readable zero-filled memory.
        let patched = unsafe {
            libc::mmap(
                base as *mut libc::c_void,
                SIGNAL_MAP_LEN,
                libc::PROT_READ,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED,
                -1,
                0,
            )
        };
        if patched != libc::MAP_FAILED {
            TRUNCATED[slot].store(true, Ordering::Release);
            return;
        }
    }

    // Not ours: reinstate the previous action; the retried access reaches it.
    match PREVIOUS_ACTION.get() {
        Some(Ok(previous)) => {
            // SAFETY: restores an action the kernel handed back to us earlier.
            let _ = unsafe { sigaction(Signal::SIGBUS, previous) };
        }
        _ => {
            // SAFETY: resetting to the default action is always valid.
            unsafe { libc::signal(libc::SIGBUS, libc::SIG_DFL) };
        }
    }
}

fn install_fault_guard(path: &Path) -> Result<(), SignalError> {
    let installed = PREVIOUS_ACTION.get_or_init(|| {
        let action = SigAction::new(
            SigHandler::SigAction(on_sigbus),
            SaFlags::SA_SIGINFO,
            SigSet::empty(),
        );
        // SAFETY: the handler only touches atomics and issues mmap/sigaction.
        unsafe { sigaction(Signal::SIGBUS, &action) }
    });

    match installed {
        Ok(_) => Ok(()),
        Err(errno) => Err(SignalError::MapFailed {
            path: path.to_path_buf(),
            reason: format!("cannot install SIGBUS guard: {}", errno),
        }),
    }
}

/// Read-only mapping of the first page of the signal file.
struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
    slot: usize,
}

// SAFETY: the mapping is owned and only read through volatile loads.
unsafe impl Send for Mapping {}

impl Mapping {
    fn truncated(&self) -> bool {
        TRUNCATED[self.slot].load(Ordering::Acquire)
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        GUARDED_PAGES[self.slot].store(0, Ordering::Release);
        TRUNCATED[self.slot].store(false, Ordering::Release);
        // SAFETY: ptr and len came from a successful mmap call.
        let result = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len) };
        if result < 0 {
            tracing::error!(
                error = %std::io::Error::last_os_error(),
                "Failed to unmap signal file"
            );
        }
    }
}

/// Waiting side of the memory-mapped flag.
pub struct MmapSignal {
    path: PathBuf,
    file: File,
    armed: u8,
    mapping: Option<Mapping>,
}

impl MmapSignal {
    /// Open the signal file read-only.
    ///
    /// The mapping is created on first use so that a file which is still
    /// empty can be opened (an empty file reads as released).
    pub fn open(path: impl AsRef<Path>, armed: u8) -> Result<Self, SignalError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| SignalError::OpenFailed {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(path = %path.display(), armed = armed, "Opened signal file");

        Ok(Self {
            path,
            file,
            armed,
            mapping: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn armed(&self) -> u8 {
        self.armed
    }

    /// Check the flag once without waiting.
    pub fn is_released(&mut self) -> Result<bool, SignalError> {
        if self.file_len()? == 0 {
            return Ok(true);
        }
        let (ptr, slot) = self.ensure_mapped()?;
        // SAFETY: byte 0 is backed, or the fault guard patches the page.
        let current = unsafe { std::ptr::read_volatile(ptr.as_ptr()) };
        Ok(TRUNCATED[slot].load(Ordering::Acquire) || current != self.armed)
    }

    fn file_len(&self) -> Result<u64, SignalError> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|source| SignalError::OpenFailed {
                path: self.path.clone(),
                source,
            })
    }

    /// Map the file, replacing a mapping the fault guard already patched.
    fn ensure_mapped(&mut self) -> Result<(NonNull<u8>, usize), SignalError> {
        if let Some(mapping) = &self.mapping {
            if !mapping.truncated() {
                return Ok((mapping.ptr, mapping.slot));
            }
        }
        self.mapping = None;

        install_fault_guard(&self.path)?;

        // SAFETY: fd is a valid open file, length and offset are valid.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                SIGNAL_MAP_LEN,
                libc::PROT_READ,
                libc::MAP_SHARED,
                self.file.as_raw_fd(),
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(SignalError::MapFailed {
                path: self.path.clone(),
                reason: format!("mmap failed: {}", std::io::Error::last_os_error()),
            });
        }

        let ptr = NonNull::new(ptr as *mut u8).ok_or_else(|| SignalError::MapFailed {
            path: self.path.clone(),
            reason: "mmap returned null".to_string(),
        })?;

        let base = ptr.as_ptr() as usize;
        let claimed = GUARDED_PAGES.iter().position(|page| {
            page.compare_exchange(0, base, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        });
        let Some(slot) = claimed else {
            // SAFETY: ptr came from the mmap call above and is not shared.
            unsafe { libc::munmap(ptr.as_ptr() as *mut libc::c_void, SIGNAL_MAP_LEN) };
            return Err(SignalError::MapFailed {
                path: self.path.clone(),
                reason: format!("more than {} signal files mapped at once", GUARD_SLOTS),
            });
        };

        self.mapping = Some(Mapping {
            ptr,
            len: SIGNAL_MAP_LEN,
            slot,
        });

        Ok((ptr, slot))
    }
}

impl WakeSource for MmapSignal {
    /// Spin until the first byte differs from the armed byte or the file is
    /// truncated.
    ///
    /// Returns immediately if the flag is already released.
    fn wait_for_release(&mut self) -> Result<(), SignalError> {
        if self.file_len()? == 0 {
            return Ok(());
        }

        let (ptr, slot) = self.ensure_mapped()?;
        let armed = self.armed;

        loop {
            // SAFETY: byte 0 is backed, or the fault guard patches the page.
            let current = unsafe { std::ptr::read_volatile(ptr.as_ptr()) };
            if TRUNCATED[slot].load(Ordering::Acquire) {
                tracing::trace!(path = %self.path.display(), "Signal file truncated");
                return Ok(());
            }
            if current != armed {
                tracing::trace!(path = %self.path.display(), byte = current, "Signal released");
                return Ok(());
            }

            std::hint::spin_loop();
        }
    }
}

/// Controller side of the memory-mapped flag.
pub struct MmapController {
    path: PathBuf,
    file: File,
    armed: u8,
}

impl MmapController {
    /// Create the signal file if needed and write the armed byte.
    ///
    /// An existing file is never truncated: a waiter already spinning on it
    /// would read the empty file as a release.
    pub fn create(path: impl AsRef<Path>, armed: u8) -> Result<Self, SignalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| SignalError::OpenFailed {
                path: path.clone(),
                source,
            })?;

        let controller = Self { path, file, armed };
        controller.arm()?;
        Ok(controller)
    }

    /// Open an existing signal file without touching its contents.
    pub fn open(path: impl AsRef<Path>, armed: u8) -> Result<Self, SignalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| SignalError::OpenFailed {
                path: path.clone(),
                source,
            })?;

        Ok(Self { path, file, armed })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the armed byte, blocking future waiters until the next release.
    pub fn arm(&self) -> Result<(), SignalError> {
        self.write_flag(self.armed)?;
        tracing::debug!(path = %self.path.display(), byte = self.armed, "Signal armed");
        Ok(())
    }

    /// Flip the flag to `byte`, releasing every waiter.
    pub fn release(&self, byte: u8) -> Result<(), SignalError> {
        if byte == self.armed {
            return Err(SignalError::ReleaseEqualsArmed { byte });
        }
        self.write_flag(byte)?;
        tracing::debug!(path = %self.path.display(), byte = byte, "Signal released");
        Ok(())
    }

    /// Current flag byte, or `None` for an empty file.
    pub fn current(&self) -> Result<Option<u8>, SignalError> {
        let mut buf = [0u8; 1];
        match self.file.read_at(&mut buf, 0) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(source) => Err(SignalError::OpenFailed {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn write_flag(&self, byte: u8) -> Result<(), SignalError> {
        self.file
            .write_all_at(&[byte], 0)
            .map_err(|source| SignalError::WriteFailed {
                path: self.path.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    #[test]
    fn test_release_wakes_spinning_waiter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");
        let controller = MmapController::create(&path, b'0').unwrap();

        let mut signal = MmapSignal::open(&path, b'0').unwrap();
        assert!(!signal.is_released().unwrap());

        let (tx, rx) = mpsc::channel();
        let waiter = thread::spawn(move || {
            signal.wait_for_release().unwrap();
            tx.send(Instant::now()).unwrap();
            signal
        });

        // Still spinning while armed.
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        let released_at = Instant::now();
        controller.release(b'1').unwrap();
        let woke_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(woke_at >= released_at);

        // Second wait without re-arming returns immediately.
        let mut signal = waiter.join().unwrap();
        let start = Instant::now();
        signal.wait_for_release().unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_rearm_blocks_again() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");
        let controller = MmapController::create(&path, b'0').unwrap();
        let mut signal = MmapSignal::open(&path, b'0').unwrap();

        controller.release(b'1').unwrap();
        assert!(signal.is_released().unwrap());

        controller.arm().unwrap();
        assert!(!signal.is_released().unwrap());
        assert_eq!(controller.current().unwrap(), Some(b'0'));
    }

    #[test]
    fn test_empty_file_reads_as_released() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");
        std::fs::write(&path, b"").unwrap();

        let mut signal = MmapSignal::open(&path, b'0').unwrap();
        assert!(signal.is_released().unwrap());
        signal.wait_for_release().unwrap();
    }

    #[test]
    fn test_truncation_while_spinning_reads_as_released() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");
        let controller = MmapController::create(&path, b'0').unwrap();
        let mut signal = MmapSignal::open(&path, b'0').unwrap();
        assert!(!signal.is_released().unwrap());

        let (tx, rx) = mpsc::channel();
        let waiter = thread::spawn(move || {
            let result = signal.wait_for_release();
            tx.send(result.is_ok()).unwrap();
            signal
        });
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(0)
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(3)).unwrap());

        // Re-arming refills the file; the waiter maps it afresh and blocks.
        let mut signal = waiter.join().unwrap();
        assert!(signal.is_released().unwrap());
        controller.arm().unwrap();
        assert!(!signal.is_released().unwrap());
        controller.release(b'1').unwrap();
        signal.wait_for_release().unwrap();
    }

    #[test]
    fn test_create_over_watched_file_keeps_waiter_blocked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");
        MmapController::create(&path, b'0').unwrap();
        let mut signal = MmapSignal::open(&path, b'0').unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = thread::spawn(move || {
            signal.wait_for_release().unwrap();
            tx.send(()).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        // A second controller (a restarted trigger) must not release anyone.
        let controller = MmapController::create(&path, b'0').unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(controller.current().unwrap(), Some(b'0'));

        controller.release(b'1').unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn test_create_keeps_existing_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");
        std::fs::write(&path, b"1abc").unwrap();

        let controller = MmapController::create(&path, b'0').unwrap();
        assert_eq!(controller.current().unwrap(), Some(b'0'));
        assert_eq!(std::fs::read(&path).unwrap(), b"0abc");
    }

    #[test]
    fn test_release_with_armed_byte_rejected() {
        let dir = TempDir::new().unwrap();
        let controller = MmapController::create(dir.path().join("lock"), b'0').unwrap();
        assert!(matches!(
            controller.release(b'0'),
            Err(SignalError::ReleaseEqualsArmed { byte: b'0' })
        ));
    }

    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            MmapSignal::open(dir.path().join("missing"), b'0'),
            Err(SignalError::OpenFailed { .. })
        ));
    }
}
