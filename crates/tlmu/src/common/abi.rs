//! Raw C ABI of the TLMu module contract.
//!
//! A conforming module exports a fixed set of functions and data cells. This module defines:
//! 1. **Signatures:** `extern "C"` function pointer types for every exported function and callback slot.
//! 2. **Structures:** The `#[repr(C)]` DMI descriptor exchanged in both directions.
//! 3. **Wire values:** Access direction, DMI protection bits, boot state and event kinds.
//!
//! Nothing here dereferences module memory; see `loader::binder` for that.

use libc::{c_char, c_int, c_uint, c_void};
use serde::Deserialize;

/// `vl_main(preamble0, preamble1, preamble2, argc, argv, envp)`.
pub type MainFn = unsafe extern "C" fn(
    c_int,
    c_int,
    c_int,
    c_int,
    *const *const c_char,
    *const *const c_char,
) -> c_int;
/// `qemu_set_log_filename(path)`.
pub type SetLogFilenameFn = unsafe extern "C" fn(*const c_char);
/// `tlm_map_ram(name, addr, size, rw, nosync)`.
pub type MapRamFn = unsafe extern "C" fn(*const c_char, u64, u64, c_int, c_int);
/// `tlm_notify_event(event, detail)`.
pub type NotifyEventFn = unsafe extern "C" fn(c_uint, *mut c_void);
/// `tlm_bus_access(rw, addr, data, len) -> accepted`.
pub type BusAccessFn = unsafe extern "C" fn(c_int, u64, *mut c_void, c_int) -> c_int;
/// `tlm_bus_access_dbg(rw, addr, data, len)`.
pub type BusAccessDbgFn = unsafe extern "C" fn(c_int, u64, *mut c_void, c_int);
/// `tlm_get_dmi_ptr(dmi) -> granted`.
pub type GetDmiPtrFn = unsafe extern "C" fn(*mut Dmi) -> c_int;
/// `qemu_system_shutdown_request()`.
pub type ShutdownRequestFn = unsafe extern "C" fn();

/// Inbound timed access: `(opaque, clock, rw, addr, data, len) -> accepted`.
pub type BusAccessCb = unsafe extern "C" fn(*mut c_void, i64, c_int, u64, *mut c_void, c_int) -> c_int;
/// Inbound debug access: `(opaque, clock, rw, addr, data, len)`.
pub type BusAccessDbgCb = unsafe extern "C" fn(*mut c_void, i64, c_int, u64, *mut c_void, c_int);
/// Inbound DMI request: `(opaque, addr, dmi)`.
pub type GetDmiPtrCb = unsafe extern "C" fn(*mut c_void, u64, *mut Dmi);
/// Inbound time sync: `(opaque, time_ns)`.
pub type SyncCb = unsafe extern "C" fn(*mut c_void, u64);

/// Leading arguments `vl_main` expects before `argc`.
pub const MAIN_PREAMBLE: [c_int; 3] = [0, 1, 1];

/// Wire value of a read access.
pub const RW_READ: c_int = 0;
/// Wire value of a write access.
pub const RW_WRITE: c_int = 1;

/// DMI protection bit: the window may be read.
pub const DMI_PROT_READ: c_int = 1 << 0;
/// DMI protection bit: the window may be written.
pub const DMI_PROT_WRITE: c_int = 1 << 1;

/// Direct-memory-interface descriptor (`struct tlmu_dmi`).
///
/// The requester fills `base` with the address of interest; the responder fills the
/// window pointer, the window extent and its protection. A null `ptr` means "no DMI".
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dmi {
    /// Host pointer to the first byte of the window.
    pub ptr: *mut u8,
    /// Bus address mapped at `ptr`.
    pub base: u64,
    /// Window length in bytes.
    pub size: u64,
    /// `DMI_PROT_READ | DMI_PROT_WRITE` bits.
    pub prot: c_int,
    /// Read latency in nanoseconds the requester should account per access.
    pub read_latency: u64,
    /// Write latency in nanoseconds the requester should account per access.
    pub write_latency: u64,
}

impl Dmi {
    /// Creates an empty request for the window covering `addr`.
    pub const fn request(addr: u64) -> Self {
        Self {
            ptr: std::ptr::null_mut(),
            base: addr,
            size: 0,
            prot: 0,
            read_latency: 0,
            write_latency: 0,
        }
    }

    /// Returns `true` if the responder granted a window.
    pub fn is_granted(&self) -> bool {
        !self.ptr.is_null() && self.size != 0
    }

    /// Returns `true` if `addr` falls inside the granted window.
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr - self.base < self.size
    }

    /// Returns `true` if the window allows reads.
    pub const fn readable(&self) -> bool {
        self.prot & DMI_PROT_READ != 0
    }

    /// Returns `true` if the window allows writes.
    pub const fn writable(&self) -> bool {
        self.prot & DMI_PROT_WRITE != 0
    }
}

/// Lifecycle event delivered to the module through `tlm_notify_event`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventKind(pub c_uint);

impl EventKind {
    /// No event; clears any event subscription.
    pub const NONE: Self = Self(0);
    /// Translation-block execution notification.
    pub const TB_EXEC: Self = Self(1 << 0);

    /// Wraps a module-defined event code.
    pub const fn from_raw(raw: c_uint) -> Self {
        Self(raw)
    }
}

/// Value written to `tlm_boot_state` before the entry point runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootState {
    /// CPUs stay halted until the bus side wakes them.
    Sleeping,
    /// CPUs start executing immediately.
    #[default]
    Running,
}

impl BootState {
    /// Returns the `int` stored in the module cell.
    pub const fn as_raw(self) -> c_int {
        match self {
            Self::Sleeping => 0,
            Self::Running => 1,
        }
    }
}

/// Access mode of a RAM region registered with `tlm_map_ram`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RamAccess {
    /// Read-only (ROM-like) region.
    ReadOnly,
    /// Read-write region.
    #[default]
    ReadWrite,
}

impl RamAccess {
    /// Returns the `rw` flag passed to `tlm_map_ram`.
    pub const fn as_raw(self) -> c_int {
        match self {
            Self::ReadOnly => 0,
            Self::ReadWrite => 1,
        }
    }
}
