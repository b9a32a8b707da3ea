//! RAM-backed bus target.
//!
//! A flat memory region answering timed and debug accesses and granting DMI over its whole
//! backing buffer. Used by the launcher as the default bus model and as a loopback target.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

use super::{AccessStatus, BusTarget, Direction};
use crate::common::abi::{DMI_PROT_READ, DMI_PROT_WRITE, Dmi};

/// Access counters of a [`MemoryTarget`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Accepted timed reads.
    pub reads: u64,
    /// Accepted timed writes.
    pub writes: u64,
    /// Rejected timed accesses.
    pub rejected: u64,
    /// Debug accesses, accepted or not.
    pub debug: u64,
    /// Granted DMI requests.
    pub dmi_grants: u64,
    /// Last simulated time reported through `sync`.
    pub last_sync_ns: u64,
}

/// A zero-initialised memory region at a fixed bus address.
///
/// The backing bytes sit behind the target's own lock, held only for the copy of one access.
/// Counters are atomics.
#[derive(Debug)]
pub struct MemoryTarget {
    base: u64,
    data: Mutex<Box<[u8]>>,
    len: usize,
    counters: Counters,
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    rejected: AtomicU64,
    debug: AtomicU64,
    dmi_grants: AtomicU64,
    last_sync_ns: AtomicU64,
}

impl MemoryTarget {
    /// Creates a region of `size` bytes mapped at `base`.
    pub fn new(base: u64, size: usize) -> Self {
        Self {
            base,
            data: Mutex::new(vec![0; size].into_boxed_slice()),
            len: size,
            counters: Counters::default(),
        }
    }

    /// Bus address of the first byte.
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Region size in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for a zero-sized region.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Start of the backing bytes, as granted through DMI.
    pub fn as_ptr(&self) -> *const u8 {
        self.bytes().as_ptr()
    }

    /// Copy of the backing bytes.
    pub fn contents(&self) -> Vec<u8> {
        self.bytes().to_vec()
    }

    /// Access counters.
    pub fn stats(&self) -> MemoryStats {
        let c = &self.counters;
        MemoryStats {
            reads: c.reads.load(Ordering::Relaxed),
            writes: c.writes.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            debug: c.debug.load(Ordering::Relaxed),
            dmi_grants: c.dmi_grants.load(Ordering::Relaxed),
            last_sync_ns: c.last_sync_ns.load(Ordering::Relaxed),
        }
    }

    fn bytes(&self) -> MutexGuard<'_, Box<[u8]>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Byte range inside the region for an access of `len` bytes at `addr`, if fully inside.
    fn window(&self, addr: u64, len: usize) -> Option<Range<usize>> {
        let start = usize::try_from(addr.checked_sub(self.base)?).ok()?;
        let end = start.checked_add(len)?;
        (end <= self.len).then_some(start..end)
    }

    fn transfer(&self, dir: Direction, addr: u64, buf: &mut [u8]) -> bool {
        let Some(range) = self.window(addr, buf.len()) else {
            return false;
        };
        let mut bytes = self.bytes();
        match dir {
            Direction::Read => buf.copy_from_slice(&bytes[range]),
            Direction::Write => bytes[range].copy_from_slice(buf),
        }
        true
    }
}

impl BusTarget for MemoryTarget {
    fn access(&self, clock: i64, dir: Direction, addr: u64, data: &mut [u8]) -> AccessStatus {
        if !self.transfer(dir, addr, data) {
            let _ = self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            trace!(clock, ?dir, addr = format_args!("{addr:#x}"), len = data.len(), "access outside memory");
            return AccessStatus::Rejected;
        }
        let counter = match dir {
            Direction::Read => &self.counters.reads,
            Direction::Write => &self.counters.writes,
        };
        let _ = counter.fetch_add(1, Ordering::Relaxed);
        AccessStatus::Accepted
    }

    fn access_debug(&self, _clock: i64, dir: Direction, addr: u64, data: &mut [u8]) {
        let _ = self.counters.debug.fetch_add(1, Ordering::Relaxed);
        let _ = self.transfer(dir, addr, data);
    }

    fn get_dmi(&self, addr: u64, dmi: &mut Dmi) {
        if self.window(addr, 1).is_none() {
            return;
        }
        dmi.ptr = self.bytes().as_mut_ptr();
        dmi.base = self.base;
        dmi.size = self.len as u64;
        dmi.prot = DMI_PROT_READ | DMI_PROT_WRITE;
        dmi.read_latency = 0;
        dmi.write_latency = 0;
        let _ = self.counters.dmi_grants.fetch_add(1, Ordering::Relaxed);
    }

    fn sync(&self, time_ns: u64) {
        self.counters.last_sync_ns.store(time_ns, Ordering::Relaxed);
    }
}
