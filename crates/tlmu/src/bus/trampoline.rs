//! FFI entry points installed into the module's callback cells.
//!
//! The opaque cell points at a `TargetSlot` owned by the load unit. Each trampoline rebuilds a
//! safe view of the arguments and forwards to the `BusTarget` through a shared reference; no
//! lock is taken on the way, so a blocking `sync` never holds up accesses arriving from other
//! threads. A panic in the target is caught here, logged, and turned into a rejected access,
//! since unwinding into C is undefined.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::slice;

use libc::{c_int, c_void};
use tracing::error;

use super::{AccessStatus, BusTarget, Direction};
use crate::common::abi::Dmi;

/// Shared home of an attached bus target; the opaque pointer addresses this value.
pub struct TargetSlot {
    target: Box<dyn BusTarget>,
}

impl TargetSlot {
    /// Wraps `target` for installation behind an opaque pointer.
    pub const fn new(target: Box<dyn BusTarget>) -> Self {
        Self { target }
    }

    /// The attached target.
    pub fn target(&self) -> &dyn BusTarget {
        self.target.as_ref()
    }
}

impl fmt::Debug for TargetSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetSlot").finish_non_exhaustive()
    }
}

/// Returns the opaque pointer identifying `slot`.
pub fn opaque_of(slot: &TargetSlot) -> *mut c_void {
    std::ptr::from_ref(slot).cast_mut().cast()
}

/// # Safety
///
/// `opaque` must be null or a pointer produced by [`opaque_of`] whose slot is still alive.
unsafe fn target<'a>(opaque: *mut c_void) -> Option<&'a dyn BusTarget> {
    // SAFETY: forwarded caller guarantee.
    let slot = unsafe { opaque.cast::<TargetSlot>().as_ref() }?;
    Some(slot.target())
}

/// # Safety
///
/// `data` must be valid for `len` bytes when `len > 0`.
unsafe fn buffer<'a>(data: *mut c_void, len: c_int) -> Option<&'a mut [u8]> {
    let len = usize::try_from(len).ok()?;
    if len == 0 {
        return Some(&mut []);
    }
    if data.is_null() {
        return None;
    }
    // SAFETY: non-null and valid for `len` bytes per the caller.
    Some(unsafe { slice::from_raw_parts_mut(data.cast::<u8>(), len) })
}

fn guarded<T>(callback: &'static str, fallback: T, f: impl FnOnce() -> T) -> T {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        error!(callback, "bus target panicked; access dropped");
        fallback
    })
}

/// `tlm_bus_access_cb` trampoline.
///
/// # Safety
///
/// Called by the module with the opaque pointer installed alongside it and a buffer valid for `len` bytes.
pub unsafe extern "C" fn bus_access(
    opaque: *mut c_void,
    clock: i64,
    rw: c_int,
    addr: u64,
    data: *mut c_void,
    len: c_int,
) -> c_int {
    guarded("bus_access", AccessStatus::Rejected, || {
        // SAFETY: module contract for the callback arguments.
        let (Some(target), Some(data)) = (unsafe { target(opaque) }, unsafe { buffer(data, len) }) else {
            return AccessStatus::Rejected;
        };
        target.access(clock, Direction::from_raw(rw), addr, data)
    })
    .as_raw()
}

/// `tlm_bus_access_dbg_cb` trampoline.
///
/// # Safety
///
/// See [`bus_access`].
pub unsafe extern "C" fn bus_access_dbg(
    opaque: *mut c_void,
    clock: i64,
    rw: c_int,
    addr: u64,
    data: *mut c_void,
    len: c_int,
) {
    guarded("bus_access_dbg", (), || {
        // SAFETY: module contract for the callback arguments.
        if let (Some(target), Some(data)) = (unsafe { target(opaque) }, unsafe { buffer(data, len) }) {
            target.access_debug(clock, Direction::from_raw(rw), addr, data);
        }
    });
}

/// `tlm_get_dmi_ptr_cb` trampoline.
///
/// # Safety
///
/// Called by the module with its opaque pointer and a valid, exclusive descriptor.
pub unsafe extern "C" fn get_dmi_ptr(opaque: *mut c_void, addr: u64, dmi: *mut Dmi) {
    guarded("get_dmi_ptr", (), || {
        // SAFETY: module contract for the callback arguments.
        if let (Some(target), Some(dmi)) = (unsafe { target(opaque) }, unsafe { dmi.as_mut() }) {
            target.get_dmi(addr, dmi);
        }
    });
}

/// `tlm_sync` trampoline.
///
/// # Safety
///
/// Called by the module with its opaque pointer.
pub unsafe extern "C" fn sync(opaque: *mut c_void, time_ns: u64) {
    guarded("sync", (), || {
        // SAFETY: module contract for the callback arguments.
        if let Some(target) = unsafe { target(opaque) } {
            target.sync(time_ns);
        }
    });
}
