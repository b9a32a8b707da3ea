//! Bus bridge between the module and the external bus model.
//!
//! Transactions cross the bridge in both directions and are always synchronous. This module provides:
//! 1. **Transactions:** `Direction` and `AccessStatus`, the safe faces of the `rw` and status integers.
//! 2. **Inbound:** The `BusTarget` trait implemented by the bus model, reached from the module through
//!    `extern "C"` trampolines installed in the module's callback cells.
//! 3. **Outbound:** `BusPort`, a thread-safe handle for timed, debug and DMI accesses into the module.
//!
//! The bridge never buffers, reorders or retries; each call returns when the other side returns.

use std::fmt;
use std::sync::Arc;

use libc::c_int;

use crate::common::abi::{BusAccessDbgFn, BusAccessFn, Dmi, GetDmiPtrFn, RW_READ, RW_WRITE};
use crate::loader::binder::LoadUnit;

/// RAM-backed bus target.
pub mod memory;
/// `extern "C"` trampolines from module callbacks into a `BusTarget`.
pub mod trampoline;

pub use memory::MemoryTarget;

/// Direction of a bus transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Data flows from the target into the buffer.
    Read,
    /// Data flows from the buffer into the target.
    Write,
}

impl Direction {
    /// Decodes the wire `rw` value; anything non-zero is a write.
    pub const fn from_raw(rw: c_int) -> Self {
        if rw == RW_READ { Self::Read } else { Self::Write }
    }

    /// Encodes the wire `rw` value.
    pub const fn as_raw(self) -> c_int {
        match self {
            Self::Read => RW_READ,
            Self::Write => RW_WRITE,
        }
    }
}

/// Outcome of a timed access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessStatus {
    /// The address was decoded and the data transferred.
    Accepted,
    /// The address is not mapped or the access is not allowed.
    Rejected,
}

impl AccessStatus {
    /// Decodes the wire status; anything non-zero is accepted.
    pub const fn from_raw(status: c_int) -> Self {
        if status == 0 { Self::Rejected } else { Self::Accepted }
    }

    /// Encodes the wire status.
    pub const fn as_raw(self) -> c_int {
        match self {
            Self::Accepted => 1,
            Self::Rejected => 0,
        }
    }

    /// Returns `true` for [`AccessStatus::Accepted`].
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// The bus model as seen by the module.
///
/// Timed accesses and `sync` arrive on the module's thread in program order. Accesses that a
/// `BusPort` user routes back through the module arrive on that user's thread, possibly while
/// the module thread is inside `sync`. The bridge takes no lock around these calls, so
/// implementations synchronise their own state.
pub trait BusTarget: Send + Sync {
    /// Performs a timed access at simulated time `clock`.
    ///
    /// For reads the target fills `data`; for writes it consumes `data`. The buffer length is
    /// the access length.
    fn access(&self, clock: i64, dir: Direction, addr: u64, data: &mut [u8]) -> AccessStatus;

    /// Performs an untimed access for inspection; must not advance or wait on simulated time.
    fn access_debug(&self, clock: i64, dir: Direction, addr: u64, data: &mut [u8]);

    /// Fills `dmi` with a direct window covering `addr`, or leaves it ungranted.
    fn get_dmi(&self, addr: u64, dmi: &mut Dmi) {
        let _ = (addr, dmi);
    }

    /// Observes simulated time; called at most once per configured sync period.
    fn sync(&self, time_ns: u64) {
        let _ = time_ns;
    }
}

/// Outbound handle for accesses from the bus side into the module.
///
/// Cloneable and usable from any thread; keeps the module mapped while alive.
#[derive(Clone)]
pub struct BusPort {
    unit: Arc<LoadUnit>,
    access: BusAccessFn,
    access_dbg: BusAccessDbgFn,
    get_dmi_ptr: GetDmiPtrFn,
}

impl BusPort {
    pub(crate) fn new(
        unit: Arc<LoadUnit>,
        access: BusAccessFn,
        access_dbg: BusAccessDbgFn,
        get_dmi_ptr: GetDmiPtrFn,
    ) -> Self {
        Self {
            unit,
            access,
            access_dbg,
            get_dmi_ptr,
        }
    }

    /// Performs a timed access into the module's address space.
    ///
    /// # Arguments
    ///
    /// * `dir` - Read fills `data`; write sends it.
    /// * `addr` - Bus address.
    /// * `data` - Transfer buffer; its length is the access length.
    ///
    /// # Returns
    ///
    /// The module's verdict; buffers longer than `i32::MAX` are rejected without a call.
    pub fn access(&self, dir: Direction, addr: u64, data: &mut [u8]) -> AccessStatus {
        let Ok(len) = c_int::try_from(data.len()) else {
            return AccessStatus::Rejected;
        };
        // SAFETY: matches `BusAccessFn`; `data` is valid for `len` bytes for the call.
        let status = unsafe { (self.access)(dir.as_raw(), addr, data.as_mut_ptr().cast(), len) };
        AccessStatus::from_raw(status)
    }

    /// Performs an untimed debug access; oversize buffers are ignored.
    pub fn access_debug(&self, dir: Direction, addr: u64, data: &mut [u8]) {
        let Ok(len) = c_int::try_from(data.len()) else {
            return;
        };
        // SAFETY: matches `BusAccessDbgFn`; `data` is valid for `len` bytes for the call.
        unsafe { (self.access_dbg)(dir.as_raw(), addr, data.as_mut_ptr().cast(), len) };
    }

    /// Asks the module for a DMI window around `dmi.base`.
    ///
    /// # Returns
    ///
    /// `true` if the module granted a window; `dmi` then describes it.
    pub fn get_dmi_ptr(&self, dmi: &mut Dmi) -> bool {
        // SAFETY: matches `GetDmiPtrFn`; `dmi` is a valid, exclusive descriptor for the call.
        unsafe { (self.get_dmi_ptr)(dmi) != 0 }
    }

    /// Reads `buf.len()` bytes at `addr` with a timed access.
    pub fn read(&self, addr: u64, buf: &mut [u8]) -> AccessStatus {
        self.access(Direction::Read, addr, buf)
    }

    /// Writes `data` at `addr` with a timed access.
    pub fn write(&self, addr: u64, data: &[u8]) -> AccessStatus {
        let mut buf = data.to_vec();
        self.access(Direction::Write, addr, &mut buf)
    }
}

impl fmt::Debug for BusPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusPort")
            .field("module", &self.unit.path())
            .finish_non_exhaustive()
    }
}
