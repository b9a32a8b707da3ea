//! In-process module exporting the symbol contract from Rust.
//!
//! Data cells live in a shared `MockCells` so a test can inspect what the binder wrote after
//! the source has been moved into a load unit. Functions record their calls in thread-local
//! logs, which keeps parallel tests apart as long as each binds on its own thread.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::ffi::CStr;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicPtr, AtomicU64};

use libc::{c_char, c_int, c_uint, c_void};
use tlmu::common::Dmi;
use tlmu::common::abi::{
    BusAccessDbgFn, BusAccessFn, GetDmiPtrFn, MainFn, MapRamFn, NotifyEventFn, SetLogFilenameFn,
    ShutdownRequestFn,
};
use tlmu::loader::SymbolSource;

/// Storage behind the module's data symbols.
#[derive(Debug, Default)]
pub struct MockCells {
    pub image_load_base: AtomicU64,
    pub image_load_size: AtomicU64,
    pub opaque: AtomicPtr<c_void>,
    pub sync: AtomicPtr<c_void>,
    pub sync_period_ns: AtomicU64,
    pub boot_state: AtomicI32,
    pub bus_access_cb: AtomicPtr<c_void>,
    pub bus_access_dbg_cb: AtomicPtr<c_void>,
    pub get_dmi_ptr_cb: AtomicPtr<c_void>,
}

/// A RAM registration seen by `tlm_map_ram`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamCall {
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub rw: c_int,
    pub nosync: c_int,
}

thread_local! {
    static LOG_NAMES: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    static RAM_CALLS: RefCell<Vec<RamCall>> = const { RefCell::new(Vec::new()) };
    static EVENTS: RefCell<Vec<c_uint>> = const { RefCell::new(Vec::new()) };
}

/// Log filenames set on this thread, in call order; clears the record.
pub fn take_log_names() -> Vec<String> {
    LOG_NAMES.with(|names| names.take())
}

/// RAM registrations made on this thread; clears the record.
pub fn take_ram_calls() -> Vec<RamCall> {
    RAM_CALLS.with(|calls| calls.take())
}

/// Events delivered on this thread; clears the record.
pub fn take_events() -> Vec<c_uint> {
    EVENTS.with(|events| events.take())
}

unsafe extern "C" fn vl_main(
    _a: c_int,
    _b: c_int,
    _c: c_int,
    argc: c_int,
    _argv: *const *const c_char,
    _envp: *const *const c_char,
) -> c_int {
    argc
}

unsafe extern "C" fn set_log_filename(name: *const c_char) {
    let name = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
    LOG_NAMES.with(|names| names.borrow_mut().push(name));
}

unsafe extern "C" fn map_ram(name: *const c_char, base: u64, size: u64, rw: c_int, nosync: c_int) {
    let name = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
    RAM_CALLS.with(|calls| {
        calls.borrow_mut().push(RamCall {
            name,
            base,
            size,
            rw,
            nosync,
        });
    });
}

unsafe extern "C" fn notify_event(event: c_uint, _detail: *mut c_void) {
    EVENTS.with(|events| events.borrow_mut().push(event));
}

unsafe extern "C" fn bus_access(_rw: c_int, _addr: u64, _data: *mut c_void, _len: c_int) -> c_int {
    0
}

unsafe extern "C" fn bus_access_dbg(_rw: c_int, _addr: u64, _data: *mut c_void, _len: c_int) {}

unsafe extern "C" fn get_dmi_ptr(_dmi: *mut Dmi) -> c_int {
    0
}

unsafe extern "C" fn shutdown_request() {}

/// A fake module; every symbol in `omit` is reported as undefined.
#[derive(Debug)]
pub struct MockModule {
    pub cells: Arc<MockCells>,
    omit: BTreeSet<&'static str>,
    path: PathBuf,
}

impl MockModule {
    pub fn new() -> Self {
        Self {
            cells: Arc::default(),
            omit: BTreeSet::new(),
            path: PathBuf::from("/mock/libtlmu-mock.so"),
        }
    }

    #[must_use]
    pub fn without(mut self, symbol: &'static str) -> Self {
        let _ = self.omit.insert(symbol);
        self
    }
}

impl SymbolSource for MockModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn lookup(&self, name: &str) -> Result<NonNull<c_void>, String> {
        if self.omit.contains(name) {
            return Err(format!("{}: undefined symbol: {name}", self.path.display()));
        }
        let cells = &self.cells;
        let addr: *mut c_void = match name {
            "vl_main" => vl_main as MainFn as *mut c_void,
            "qemu_set_log_filename" => set_log_filename as SetLogFilenameFn as *mut c_void,
            "tlm_image_load_base" => cells.image_load_base.as_ptr().cast(),
            "tlm_image_load_size" => cells.image_load_size.as_ptr().cast(),
            "tlm_map_ram" => map_ram as MapRamFn as *mut c_void,
            "tlm_opaque" => cells.opaque.as_ptr().cast(),
            "tlm_notify_event" => notify_event as NotifyEventFn as *mut c_void,
            "tlm_sync" => cells.sync.as_ptr().cast(),
            "tlm_sync_period_ns" => cells.sync_period_ns.as_ptr().cast(),
            "tlm_boot_state" => cells.boot_state.as_ptr().cast(),
            "tlm_bus_access_cb" => cells.bus_access_cb.as_ptr().cast(),
            "tlm_bus_access_dbg_cb" => cells.bus_access_dbg_cb.as_ptr().cast(),
            "tlm_bus_access" => bus_access as BusAccessFn as *mut c_void,
            "tlm_bus_access_dbg" => bus_access_dbg as BusAccessDbgFn as *mut c_void,
            "tlm_get_dmi_ptr_cb" => cells.get_dmi_ptr_cb.as_ptr().cast(),
            "tlm_get_dmi_ptr" => get_dmi_ptr as GetDmiPtrFn as *mut c_void,
            "qemu_system_shutdown_request" => shutdown_request as ShutdownRequestFn as *mut c_void,
            _ => std::ptr::null_mut(),
        };
        NonNull::new(addr).ok_or_else(|| format!("undefined symbol: {name}"))
    }
}
