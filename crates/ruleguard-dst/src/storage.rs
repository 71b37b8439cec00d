//! Fault-injecting file system for deterministic testing
//!
//! TigerStyle: Decorate the real interface, decide each fault exactly once.
//!
//! | operation    | faults, in decision order              |
//! |--------------|----------------------------------------|
//! | `read_file`  | slow I/O, corruption                   |
//! | `write_file` | slow I/O, disk full, partial write     |
//! | `rename`     | slow I/O, crash                        |
//! | `mkdir_all`, `remove`, `stat` | none (pass-through)   |
//!
//! Slow I/O advances the virtual clock instead of sleeping.

use crate::clock::VirtualClock;
use crate::fault::{FaultInjector, FaultKind};
use ruleguard_core::{Error, FileInfo, FileSystem, Result};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Minimum delay added by a slow I/O fault in milliseconds
pub const SLOW_IO_DELAY_MS_MIN: u64 = 10;
/// Maximum delay added by a slow I/O fault in milliseconds (exclusive)
pub const SLOW_IO_DELAY_MS_MAX: u64 = 500;

/// A scripted crash on the next matching operation
///
/// Armed points fire once, consume no randomness and count as crash faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashPoint {
    /// Next write fails before any byte is stored
    BeforeWrite,
    /// Next write stores a strict prefix, then fails
    DuringWrite,
    /// Next write completes, then reports failure
    AfterWrite,
    /// Next rename fails without renaming
    BeforeRename,
    /// Next rename fails; whether it took effect is drawn from the RNG
    DuringRename,
    /// Next rename completes, then reports failure
    AfterRename,
}

impl CrashPoint {
    pub const ALL: [CrashPoint; 6] = [
        Self::BeforeWrite,
        Self::DuringWrite,
        Self::AfterWrite,
        Self::BeforeRename,
        Self::DuringRename,
        Self::AfterRename,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::BeforeWrite => "crash_before_write",
            Self::DuringWrite => "crash_during_write",
            Self::AfterWrite => "crash_after_write",
            Self::BeforeRename => "crash_before_rename",
            Self::DuringRename => "crash_during_rename",
            Self::AfterRename => "crash_after_rename",
        }
    }

    fn is_write(&self) -> bool {
        matches!(self, Self::BeforeWrite | Self::DuringWrite | Self::AfterWrite)
    }
}

/// Operation counts seen by the decorator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileSystemStats {
    pub reads: u64,
    pub writes: u64,
    pub renames: u64,
    pub bytes_written: u64,
}

/// File system decorator injecting faults into reads, writes and renames
pub struct FaultyFileSystem<F: FileSystem> {
    inner: F,
    faults: Arc<FaultInjector>,
    clock: VirtualClock,
    armed: Mutex<Option<CrashPoint>>,
    reads: AtomicU64,
    writes: AtomicU64,
    renames: AtomicU64,
    bytes_written: AtomicU64,
}

impl<F: FileSystem> std::fmt::Debug for FaultyFileSystem<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultyFileSystem")
            .field("stats", &self.stats())
            .field("armed", &self.armed_crash())
            .finish()
    }
}

impl<F: FileSystem> FaultyFileSystem<F> {
    pub fn new(inner: F, faults: Arc<FaultInjector>, clock: VirtualClock) -> Self {
        Self {
            inner,
            faults,
            clock,
            armed: Mutex::new(None),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            renames: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    /// The undecorated file system, for inspecting what was really stored
    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn fault_injector(&self) -> &Arc<FaultInjector> {
        &self.faults
    }

    /// Arm a one-shot crash, replacing any armed one
    pub fn arm_crash(&self, point: CrashPoint) {
        *self.armed.lock().unwrap_or_else(PoisonError::into_inner) = Some(point);
        tracing::debug!(point = point.name(), "Armed crash point");
    }

    /// Arm a crash point drawn uniformly from `CrashPoint::ALL`
    pub fn arm_random_crash(&self) -> CrashPoint {
        let point = self
            .faults
            .rng()
            .choose(&CrashPoint::ALL)
            .copied()
            .unwrap_or(CrashPoint::BeforeWrite);
        self.arm_crash(point);
        point
    }

    /// Disarm without firing
    pub fn disarm_crash(&self) -> Option<CrashPoint> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn armed_crash(&self) -> Option<CrashPoint> {
        *self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> FileSystemStats {
        FileSystemStats {
            reads: self.reads.load(Ordering::SeqCst),
            writes: self.writes.load(Ordering::SeqCst),
            renames: self.renames.load(Ordering::SeqCst),
            bytes_written: self.bytes_written.load(Ordering::SeqCst),
        }
    }

    /// Take the armed point if it applies to writes (`true`) or renames
    fn take_armed(&self, write: bool) -> Option<CrashPoint> {
        let mut armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        match *armed {
            Some(point) if point.is_write() == write => {
                *armed = None;
                self.faults.record_forced(FaultKind::Crash);
                Some(point)
            }
            _ => None,
        }
    }

    fn maybe_slow(&self, operation: &str, path: &Path) {
        if self.faults.should_inject_slow_io() {
            let delay = self.faults.rng().duration(
                Duration::from_millis(SLOW_IO_DELAY_MS_MIN),
                Duration::from_millis(SLOW_IO_DELAY_MS_MAX),
            );
            tracing::debug!(
                operation = operation,
                path = %path.display(),
                delay_ms = delay.as_millis() as u64,
                "Slow I/O"
            );
            self.clock.advance(delay);
        }
    }

    /// Strict prefix length in [0, len)
    fn prefix_len(&self, len: usize) -> usize {
        debug_assert!(len > 0);
        self.faults.rng().int_n(len as i64) as usize
    }

    fn store(&self, path: &Path, data: &[u8], mode: u32) -> Result<()> {
        self.inner.write_file(path, data, mode)?;
        self.bytes_written
            .fetch_add(data.len() as u64, Ordering::SeqCst);
        Ok(())
    }
}

impl<F: FileSystem> FileSystem for FaultyFileSystem<F> {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.maybe_slow("read", path);

        let mut data = self.inner.read_file(path)?;
        if !data.is_empty() && self.faults.should_inject_corruption() {
            let index = self.faults.rng().int_n(data.len() as i64) as usize;
            data[index] = !data[index];
            tracing::debug!(path = %path.display(), byte = index, "Corrupted read");
        }
        Ok(data)
    }

    fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.maybe_slow("write", path);
        let path_str = path.display().to_string();

        if let Some(point) = self.take_armed(true) {
            tracing::debug!(point = point.name(), path = %path_str, "Scripted crash");
            match point {
                CrashPoint::BeforeWrite => {}
                CrashPoint::DuringWrite => {
                    let len = if data.is_empty() { 0 } else { self.prefix_len(data.len()) };
                    self.store(path, &data[..len], mode)?;
                }
                _ => self.store(path, data, mode)?,
            }
            return Err(Error::interrupted(path_str, "write"));
        }

        if self.faults.should_inject_disk_full() {
            return Err(Error::disk_full(path_str));
        }

        if !data.is_empty() && self.faults.should_inject_partial_write() {
            let len = self.prefix_len(data.len());
            tracing::debug!(
                path = %path_str,
                written = len,
                expected = data.len(),
                "Partial write"
            );
            return self.store(path, &data[..len], mode);
        }

        self.store(path, data, mode)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.renames.fetch_add(1, Ordering::SeqCst);
        self.maybe_slow("rename", from);
        let path_str = from.display().to_string();

        if let Some(point) = self.take_armed(false) {
            let took_effect = match point {
                CrashPoint::AfterRename => true,
                CrashPoint::DuringRename => self.faults.rng().next_bool(),
                _ => false,
            };
            tracing::debug!(
                point = point.name(),
                path = %path_str,
                took_effect = took_effect,
                "Scripted crash"
            );
            if took_effect {
                self.inner.rename(from, to)?;
            }
            return Err(Error::interrupted(path_str, "rename"));
        }

        if self.faults.should_inject_crash() {
            return Err(Error::interrupted(path_str, "rename"));
        }

        self.inner.rename(from, to)
    }

    fn mkdir_all(&self, path: &Path, mode: u32) -> Result<()> {
        self.inner.mkdir_all(path, mode)
    }

    fn remove(&self, path: &Path) -> Result<()> {
        self.inner.remove(path)
    }

    fn stat(&self, path: &Path) -> Result<FileInfo> {
        self.inner.stat(path)
    }
}
