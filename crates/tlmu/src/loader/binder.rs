//! Symbol binder and bound-module handle.
//!
//! The binder resolves the fixed TLMu symbol contract from a load unit. It performs:
//! 1. **Resolution:** Every required function and data cell is looked up; misses are logged one by one.
//! 2. **Decision:** Only after all lookups does it either build a complete `SymbolTable` or fail with
//!    every missing name.
//! 3. **Binding:** `BoundModule` owns the table and is the only writer of the module's data cells.

use std::any::Any;
use std::ffi::CString;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, PoisonError};

use libc::{c_char, c_int, c_void};
use tracing::{debug, error};

use crate::bus::BusPort;
use crate::common::abi::{
    BootState, BusAccessCb, BusAccessDbgCb, BusAccessDbgFn, BusAccessFn, EventKind, GetDmiPtrCb,
    GetDmiPtrFn, MAIN_PREAMBLE, MainFn, MapRamFn, NotifyEventFn, RamAccess, SetLogFilenameFn,
    ShutdownRequestFn, SyncCb,
};
use crate::common::error::{Error, Result};
use crate::loader::claim::PathClaim;
use crate::loader::dl::Library;

/// Every symbol a module must export, in resolution order.
pub const REQUIRED_SYMBOLS: [&str; 17] = [
    "vl_main",
    "qemu_set_log_filename",
    "tlm_image_load_base",
    "tlm_image_load_size",
    "tlm_map_ram",
    "tlm_opaque",
    "tlm_notify_event",
    "tlm_sync",
    "tlm_sync_period_ns",
    "tlm_boot_state",
    "tlm_bus_access_cb",
    "tlm_bus_access_dbg_cb",
    "tlm_bus_access",
    "tlm_bus_access_dbg",
    "tlm_get_dmi_ptr_cb",
    "tlm_get_dmi_ptr",
    "qemu_system_shutdown_request",
];

/// Anything symbols can be resolved from.
pub trait SymbolSource: Send + Sync {
    /// Path of the underlying module, used in diagnostics.
    fn path(&self) -> &Path;
    /// Resolves `name` to an address, or returns the loader diagnostic.
    fn lookup(&self, name: &str) -> std::result::Result<NonNull<c_void>, String>;
}

impl SymbolSource for Library {
    fn path(&self) -> &Path {
        Self::path(self)
    }

    fn lookup(&self, name: &str) -> std::result::Result<NonNull<c_void>, String> {
        self.symbol(name)
    }
}

/// One isolated load of a module plus everything that must outlive it.
///
/// Handles that may be used from other threads (`BusPort`, `ShutdownHandle`) share the unit
/// through an `Arc`, so the module stays mapped and its callbacks' contexts stay alive until
/// the last of them is dropped.
pub struct LoadUnit {
    // Field order is drop order: unmap first, then release the name, then the contexts.
    source: Box<dyn SymbolSource>,
    claim: Option<PathClaim>,
    anchors: Mutex<Vec<Arc<dyn Any + Send + Sync>>>,
}

impl LoadUnit {
    /// Wraps a symbol source; `claim` reserves the private copy path for this unit's lifetime.
    pub fn new(source: Box<dyn SymbolSource>, claim: Option<PathClaim>) -> Self {
        Self {
            source,
            claim,
            anchors: Mutex::new(Vec::new()),
        }
    }

    /// Module path.
    pub fn path(&self) -> &Path {
        self.source.path()
    }

    /// Keeps `value` alive for as long as the unit is mapped.
    pub fn retain(&self, value: Arc<dyn Any + Send + Sync>) {
        self.anchors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(value);
    }
}

impl fmt::Debug for LoadUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadUnit")
            .field("path", &self.path())
            .field("claimed", &self.claim.is_some())
            .finish_non_exhaustive()
    }
}

/// Addresses of the module's data cells.
#[derive(Debug, Clone, Copy)]
struct Cells {
    opaque: NonNull<*mut c_void>,
    bus_access_cb: NonNull<Option<BusAccessCb>>,
    bus_access_dbg_cb: NonNull<Option<BusAccessDbgCb>>,
    get_dmi_ptr_cb: NonNull<Option<GetDmiPtrCb>>,
    sync: NonNull<Option<SyncCb>>,
    sync_period_ns: NonNull<u64>,
    boot_state: NonNull<c_int>,
    image_load_base: NonNull<u64>,
    image_load_size: NonNull<u64>,
}

/// Fully resolved symbol contract of one load unit.
#[derive(Debug, Clone, Copy)]
pub struct SymbolTable {
    main: MainFn,
    set_log_filename: SetLogFilenameFn,
    map_ram: MapRamFn,
    notify_event: NotifyEventFn,
    bus_access: BusAccessFn,
    bus_access_dbg: BusAccessDbgFn,
    get_dmi_ptr: GetDmiPtrFn,
    shutdown_request: ShutdownRequestFn,
    cells: Cells,
}

// SAFETY: the table holds code addresses and addresses of module globals; it never
// dereferences them by itself.
unsafe impl Send for SymbolTable {}
// SAFETY: see `Send`.
unsafe impl Sync for SymbolTable {}

struct Resolver<'a> {
    source: &'a dyn SymbolSource,
    missing: Vec<&'static str>,
}

impl<'a> Resolver<'a> {
    fn new(source: &'a dyn SymbolSource) -> Self {
        Self {
            source,
            missing: Vec::new(),
        }
    }

    fn address(&mut self, name: &'static str) -> Option<NonNull<c_void>> {
        match self.source.lookup(name) {
            Ok(addr) => Some(addr),
            Err(reason) => {
                error!(symbol = name, module = %self.source.path().display(), %reason, "missing module symbol");
                self.missing.push(name);
                None
            }
        }
    }

    /// # Safety
    ///
    /// `F` must be the function pointer type the module really exports under `name`.
    unsafe fn function<F: Copy>(&mut self, name: &'static str) -> Option<F> {
        const { assert!(size_of::<F>() == size_of::<*mut c_void>()) };
        self.address(name)
            // SAFETY: sizes match (checked above) and the caller vouches for the signature.
            .map(|addr| unsafe { std::mem::transmute_copy::<*mut c_void, F>(&addr.as_ptr()) })
    }

    fn cell<T>(&mut self, name: &'static str) -> Option<NonNull<T>> {
        self.address(name).map(NonNull::cast)
    }
}

impl SymbolTable {
    /// Resolves the whole contract from `source`.
    ///
    /// Every symbol is attempted even after a miss so that one call reports all of them.
    ///
    /// # Returns
    ///
    /// The complete table, or `Error::MissingSymbols` listing every miss in contract order.
    pub fn resolve(source: &dyn SymbolSource) -> Result<Self> {
        let mut r = Resolver::new(source);

        // SAFETY: signatures follow the module contract (see `common::abi`).
        let (main, set_log_filename) = unsafe {
            (
                r.function::<MainFn>("vl_main"),
                r.function::<SetLogFilenameFn>("qemu_set_log_filename"),
            )
        };
        let image_load_base = r.cell::<u64>("tlm_image_load_base");
        let image_load_size = r.cell::<u64>("tlm_image_load_size");
        // SAFETY: as above.
        let map_ram = unsafe { r.function::<MapRamFn>("tlm_map_ram") };
        let opaque = r.cell::<*mut c_void>("tlm_opaque");
        // SAFETY: as above.
        let notify_event = unsafe { r.function::<NotifyEventFn>("tlm_notify_event") };
        let sync = r.cell::<Option<SyncCb>>("tlm_sync");
        let sync_period_ns = r.cell::<u64>("tlm_sync_period_ns");
        let boot_state = r.cell::<c_int>("tlm_boot_state");
        let bus_access_cb = r.cell::<Option<BusAccessCb>>("tlm_bus_access_cb");
        let bus_access_dbg_cb = r.cell::<Option<BusAccessDbgCb>>("tlm_bus_access_dbg_cb");
        // SAFETY: as above.
        let (bus_access, bus_access_dbg) = unsafe {
            (
                r.function::<BusAccessFn>("tlm_bus_access"),
                r.function::<BusAccessDbgFn>("tlm_bus_access_dbg"),
            )
        };
        let get_dmi_ptr_cb = r.cell::<Option<GetDmiPtrCb>>("tlm_get_dmi_ptr_cb");
        // SAFETY: as above.
        let (get_dmi_ptr, shutdown_request) = unsafe {
            (
                r.function::<GetDmiPtrFn>("tlm_get_dmi_ptr"),
                r.function::<ShutdownRequestFn>("qemu_system_shutdown_request"),
            )
        };

        let (
            Some(main),
            Some(set_log_filename),
            Some(image_load_base),
            Some(image_load_size),
            Some(map_ram),
            Some(opaque),
            Some(notify_event),
            Some(sync),
            Some(sync_period_ns),
            Some(boot_state),
            Some(bus_access_cb),
            Some(bus_access_dbg_cb),
            Some(bus_access),
            Some(bus_access_dbg),
            Some(get_dmi_ptr_cb),
            Some(get_dmi_ptr),
            Some(shutdown_request),
        ) = (
            main,
            set_log_filename,
            image_load_base,
            image_load_size,
            map_ram,
            opaque,
            notify_event,
            sync,
            sync_period_ns,
            boot_state,
            bus_access_cb,
            bus_access_dbg_cb,
            bus_access,
            bus_access_dbg,
            get_dmi_ptr_cb,
            get_dmi_ptr,
            shutdown_request,
        )
        else {
            return Err(Error::MissingSymbols {
                path: source.path().to_path_buf(),
                symbols: r.missing,
            });
        };

        Ok(Self {
            main,
            set_log_filename,
            map_ram,
            notify_event,
            bus_access,
            bus_access_dbg,
            get_dmi_ptr,
            shutdown_request,
            cells: Cells {
                opaque,
                bus_access_cb,
                bus_access_dbg_cb,
                get_dmi_ptr_cb,
                sync,
                sync_period_ns,
                boot_state,
                image_load_base,
                image_load_size,
            },
        })
    }
}

/// A module whose contract is fully bound.
///
/// This is the only writer of the module's data cells. Setters take `&mut self`; the
/// instance controller stops handing out `&mut` once the entry point is running.
pub struct BoundModule {
    unit: Arc<LoadUnit>,
    symbols: SymbolTable,
    log_path: PathBuf,
    // The module may keep these pointers; they live as long as the handle.
    log_name: CString,
    ram_names: Vec<CString>,
}

impl BoundModule {
    /// Resolves the contract from `unit` and points the module's log at `log_path`.
    ///
    /// The log filename setter is called exactly once, before the handle is returned.
    pub fn bind(unit: Arc<LoadUnit>, log_path: &Path) -> Result<Self> {
        let symbols = SymbolTable::resolve(unit.source.as_ref())?;
        let log_name = CString::new(log_path.as_os_str().as_bytes())
            .map_err(|_| Error::InvalidArgument(log_path.display().to_string()))?;
        // SAFETY: the setter matches `SetLogFilenameFn` and `log_name` outlives the handle.
        unsafe { (symbols.set_log_filename)(log_name.as_ptr()) };
        debug!(module = %unit.path().display(), log = %log_path.display(), "module bound");
        Ok(Self {
            unit,
            symbols,
            log_path: log_path.to_path_buf(),
            log_name,
            ram_names: Vec::new(),
        })
    }

    /// Module path.
    pub fn path(&self) -> &Path {
        self.unit.path()
    }

    /// Log file the module writes to.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Shared load unit.
    pub fn unit(&self) -> &Arc<LoadUnit> {
        &self.unit
    }

    /// Outbound port into the module, usable from any thread.
    pub fn bus_port(&self) -> BusPort {
        BusPort::new(
            Arc::clone(&self.unit),
            self.symbols.bus_access,
            self.symbols.bus_access_dbg,
            self.symbols.get_dmi_ptr,
        )
    }

    pub(crate) const fn shutdown_request_fn(&self) -> ShutdownRequestFn {
        self.symbols.shutdown_request
    }

    /// Sets the boot image placement.
    pub fn set_image_load_params(&mut self, base: u64, size: u64) {
        // SAFETY: both cells are `uint64_t` globals of the mapped module.
        unsafe {
            self.symbols.cells.image_load_base.write(base);
            self.symbols.cells.image_load_size.write(size);
        }
    }

    /// Current boot image placement as `(base, size)`.
    pub fn image_load_params(&self) -> (u64, u64) {
        // SAFETY: see `set_image_load_params`.
        unsafe {
            (
                self.symbols.cells.image_load_base.read(),
                self.symbols.cells.image_load_size.read(),
            )
        }
    }

    /// Sets the minimum simulated time between sync callbacks.
    pub fn set_sync_period_ns(&mut self, period_ns: u64) {
        // SAFETY: `uint64_t` global of the mapped module.
        unsafe { self.symbols.cells.sync_period_ns.write(period_ns) };
    }

    /// Current sync period in nanoseconds.
    pub fn sync_period_ns(&self) -> u64 {
        // SAFETY: see `set_sync_period_ns`.
        unsafe { self.symbols.cells.sync_period_ns.read() }
    }

    /// Sets whether the CPUs start running.
    pub fn set_boot_state(&mut self, state: BootState) {
        // SAFETY: `int` global of the mapped module.
        unsafe { self.symbols.cells.boot_state.write(state.as_raw()) };
    }

    /// Raw boot state cell; non-zero means running.
    pub fn boot_state(&self) -> c_int {
        // SAFETY: see `set_boot_state`.
        unsafe { self.symbols.cells.boot_state.read() }
    }

    /// Sets the opaque context pointer passed to every callback.
    ///
    /// # Safety
    ///
    /// Every installed callback must accept `opaque`, and it must stay valid while the
    /// module can invoke them.
    pub unsafe fn set_opaque(&mut self, opaque: *mut c_void) {
        // SAFETY: `void *` global of the mapped module.
        unsafe { self.symbols.cells.opaque.write(opaque) };
    }

    /// Current opaque context pointer.
    pub fn opaque(&self) -> *mut c_void {
        // SAFETY: see `set_opaque`.
        unsafe { self.symbols.cells.opaque.read() }
    }

    /// Installs the inbound timed access callback.
    ///
    /// # Safety
    ///
    /// `cb` must be sound for the current and future opaque pointer.
    pub unsafe fn set_bus_access_cb(&mut self, cb: Option<BusAccessCb>) {
        // SAFETY: nullable function pointer global of the mapped module.
        unsafe { self.symbols.cells.bus_access_cb.write(cb) };
    }

    /// Installs the inbound debug access callback.
    ///
    /// # Safety
    ///
    /// See [`set_bus_access_cb`](Self::set_bus_access_cb).
    pub unsafe fn set_bus_access_dbg_cb(&mut self, cb: Option<BusAccessDbgCb>) {
        // SAFETY: nullable function pointer global of the mapped module.
        unsafe { self.symbols.cells.bus_access_dbg_cb.write(cb) };
    }

    /// Installs the inbound DMI callback.
    ///
    /// # Safety
    ///
    /// See [`set_bus_access_cb`](Self::set_bus_access_cb).
    pub unsafe fn set_get_dmi_ptr_cb(&mut self, cb: Option<GetDmiPtrCb>) {
        // SAFETY: nullable function pointer global of the mapped module.
        unsafe { self.symbols.cells.get_dmi_ptr_cb.write(cb) };
    }

    /// Installs the time sync callback.
    ///
    /// # Safety
    ///
    /// See [`set_bus_access_cb`](Self::set_bus_access_cb).
    pub unsafe fn set_sync_cb(&mut self, cb: Option<SyncCb>) {
        // SAFETY: nullable function pointer global of the mapped module.
        unsafe { self.symbols.cells.sync.write(cb) };
    }

    /// Names of the required inbound callbacks that are still unset.
    pub fn missing_callbacks(&self) -> Vec<&'static str> {
        let cells = &self.symbols.cells;
        // SAFETY: reads of nullable function pointer globals of the mapped module.
        let installed = unsafe {
            [
                ("tlm_bus_access_cb", cells.bus_access_cb.read().is_some()),
                ("tlm_bus_access_dbg_cb", cells.bus_access_dbg_cb.read().is_some()),
                ("tlm_get_dmi_ptr_cb", cells.get_dmi_ptr_cb.read().is_some()),
            ]
        };
        installed
            .into_iter()
            .filter_map(|(name, set)| (!set).then_some(name))
            .collect()
    }

    /// Whether a sync callback is installed.
    pub fn has_sync_cb(&self) -> bool {
        // SAFETY: read of a nullable function pointer global.
        unsafe { self.symbols.cells.sync.read().is_some() }
    }

    /// Registers a RAM region the module may execute from and access without bus round trips.
    pub fn map_ram(&mut self, name: &str, base: u64, size: u64, access: RamAccess) -> Result<()> {
        self.register_ram(name, base, size, access, false)
    }

    /// Like [`map_ram`](Self::map_ram), but accesses skip the time sync first.
    pub fn map_ram_nosync(&mut self, name: &str, base: u64, size: u64, access: RamAccess) -> Result<()> {
        self.register_ram(name, base, size, access, true)
    }

    fn register_ram(&mut self, name: &str, base: u64, size: u64, access: RamAccess, nosync: bool) -> Result<()> {
        let c_name = CString::new(name).map_err(|_| Error::InvalidArgument(name.to_owned()))?;
        // SAFETY: matches `MapRamFn`; the name is kept alive in `ram_names`.
        unsafe {
            (self.symbols.map_ram)(c_name.as_ptr(), base, size, access.as_raw(), c_int::from(nosync));
        }
        debug!(name, base = format_args!("{base:#x}"), size, ?access, nosync, "RAM region mapped");
        self.ram_names.push(c_name);
        Ok(())
    }

    /// Delivers a lifecycle event with no detail payload.
    pub fn notify_event(&self, event: EventKind) {
        // SAFETY: a null detail is always accepted by the contract.
        unsafe { self.notify_event_with(event, std::ptr::null_mut()) };
    }

    /// Delivers a lifecycle event with a module-defined detail pointer.
    ///
    /// # Safety
    ///
    /// `detail` must be what the module expects for `event`.
    pub unsafe fn notify_event_with(&self, event: EventKind, detail: *mut c_void) {
        // SAFETY: matches `NotifyEventFn`; forwarded caller guarantee for `detail`.
        unsafe { (self.symbols.notify_event)(event.0, detail) };
    }

    /// Calls the entry point with a NUL-terminated argument array.
    ///
    /// # Safety
    ///
    /// `argv` must hold `argc` valid C strings followed by a null pointer, all alive for the call.
    pub(crate) unsafe fn enter(&self, argc: c_int, argv: *const *const c_char) -> c_int {
        let [p0, p1, p2] = MAIN_PREAMBLE;
        // SAFETY: matches `MainFn`; forwarded caller guarantee for `argv`.
        unsafe { (self.symbols.main)(p0, p1, p2, argc, argv, std::ptr::null()) }
    }
}

impl fmt::Debug for BoundModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundModule")
            .field("path", &self.path())
            .field("log_path", &self.log_path)
            .field("log_name", &self.log_name)
            .field("ram_regions", &self.ram_names.len())
            .finish_non_exhaustive()
    }
}

/// Opens the private copy at `path` and binds it.
///
/// `claim` must reserve `path`; it is released when the last handle on the unit is dropped.
pub fn bind_path(path: &Path, log_path: &Path, claim: PathClaim) -> Result<BoundModule> {
    let library = Library::open(path).map_err(|reason| Error::Open {
        path: PathBuf::from(path),
        reason,
    })?;
    let unit = Arc::new(LoadUnit::new(Box::new(library), Some(claim)));
    BoundModule::bind(unit, log_path)
}
