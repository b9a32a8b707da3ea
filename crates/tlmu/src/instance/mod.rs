//! Instance controller.
//!
//! An `Instance` owns one bound module, its argument vector and its lifecycle. It provides:
//! 1. **Configuration:** Arguments, sync period, boot state, image placement and RAM maps, before start.
//! 2. **Loading:** Private copy, isolated binding and log file setup, with fail-stop on any error.
//! 3. **Execution:** A blocking `run` and a `ShutdownHandle` that stops it from another thread.
//!
//! Lifecycle: `Configuring` → `Loaded` → `Running` → `Finished`. A failed `load` moves the
//! instance to `Failed`, after which every operation returns `Error::InstanceFailed`.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use libc::c_int;
use tracing::{debug, error, info};

use crate::bus::trampoline::{self, TargetSlot};
use crate::bus::{BusPort, BusTarget};
use crate::common::abi::{BootState, EventKind, RamAccess, ShutdownRequestFn};
use crate::common::error::{Error, Result};
use crate::config::InstanceConfig;
use crate::loader::binder::{self, BoundModule, LoadUnit};
use crate::loader::claim::PathClaim;
use crate::loader::store::{CopyOutcome, ModuleStore};

/// Fixed-capacity argument vector.
pub mod argv;

pub use argv::{ArgVector, DEFAULT_ARGS, MAX_ARGS, MAX_ARGV_SLOTS};

/// Lifecycle state of an [`Instance`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Created; arguments may be appended, no module yet.
    Configuring,
    /// Module bound; cells and callbacks may be set.
    Loaded,
    /// Entry point executing.
    Running,
    /// Entry point returned.
    Finished,
    /// Load failed; the instance is unusable.
    Failed,
}

impl State {
    const fn name(self) -> &'static str {
        match self {
            Self::Configuring => "configuring",
            Self::Loaded => "loaded",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Requests an orderly shutdown of a running module from any thread.
///
/// The first request per instance is forwarded to `qemu_system_shutdown_request`; later ones
/// are no-ops. Requests before `run` make the subsequent `run` return promptly, and requests
/// after it returned are harmless. The handle keeps the module mapped while alive.
#[derive(Clone)]
pub struct ShutdownHandle {
    unit: Arc<LoadUnit>,
    request: ShutdownRequestFn,
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Requests shutdown.
    ///
    /// # Returns
    ///
    /// `true` if this call forwarded the request, `false` if one was already made.
    pub fn request(&self) -> bool {
        if self.requested.swap(true, Ordering::AcqRel) {
            return false;
        }
        info!(module = %self.unit.path().display(), "shutdown requested");
        // SAFETY: matches `ShutdownRequestFn`; the module stays mapped through `unit`.
        unsafe { (self.request)() };
        true
    }

    /// Whether a shutdown has been requested for this instance.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("module", &self.unit.path())
            .field("requested", &self.is_requested())
            .finish_non_exhaustive()
    }
}

/// One runnable copy of an emulator module.
///
/// `Send`, so it can be moved to the thread that calls [`run`](Self::run), but not `Sync`:
/// other threads reach the module only through a [`BusPort`] or a [`ShutdownHandle`].
#[derive(Debug)]
pub struct Instance {
    name: String,
    argv: ArgVector,
    store: ModuleStore,
    state: State,
    module: Option<BoundModule>,
    shutdown: Arc<AtomicBool>,
    _not_sync: PhantomData<Cell<()>>,
}

impl Instance {
    /// Creates an instance named `name` with the default arguments and the default store.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_store(name, ModuleStore::default())
    }

    /// Creates an instance whose private copies live in `store`.
    pub fn with_store(name: impl Into<String>, store: ModuleStore) -> Self {
        Self {
            name: name.into(),
            argv: ArgVector::new(),
            store,
            state: State::Configuring,
            module: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            _not_sync: PhantomData,
        }
    }

    /// Creates an instance from `config`: its store directory and extra arguments.
    pub fn from_config(name: impl Into<String>, config: &InstanceConfig) -> Result<Self> {
        let mut instance = Self::with_store(name, ModuleStore::new(&config.store_dir));
        for arg in &config.args {
            instance.append_arg(arg)?;
        }
        Ok(instance)
    }

    /// Instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> State {
        self.state
    }

    /// Arguments accumulated so far, including the defaults.
    pub const fn args(&self) -> &ArgVector {
        &self.argv
    }

    /// Appends one emulator argument; only allowed before `run`.
    pub fn append_arg(&mut self, arg: &str) -> Result<()> {
        match self.state {
            State::Configuring | State::Loaded => self.argv.push(arg),
            State::Failed => Err(Error::InstanceFailed(self.name.clone())),
            state => Err(Error::InvalidState {
                operation: "append an argument",
                state: state.name(),
            }),
        }
    }

    /// Installs a private copy of `spec` and binds it.
    ///
    /// # Arguments
    ///
    /// * `spec` - Path of the module, or a name the dynamic linker can resolve.
    ///
    /// # Returns
    ///
    /// `Ok(())` once the module is bound and its log file is set; on error the instance
    /// becomes `Failed`.
    pub fn load(&mut self, spec: &str) -> Result<()> {
        match self.state {
            State::Configuring => {}
            State::Failed => return Err(Error::InstanceFailed(self.name.clone())),
            state => {
                return Err(Error::InvalidState {
                    operation: "load",
                    state: state.name(),
                });
            }
        }
        match self.bind(spec) {
            Ok(module) => {
                info!(instance = %self.name, module = %module.path().display(), "module loaded");
                self.module = Some(module);
                self.state = State::Loaded;
                Ok(())
            }
            Err(e) => {
                error!(instance = %self.name, spec, error = %e, "module load failed");
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    fn bind(&self, spec: &str) -> Result<BoundModule> {
        let paths = self.store.paths(spec, &self.name)?;
        self.store.ensure_root()?;
        let claim = PathClaim::acquire(&paths.module)?;
        match self.store.install(spec, &paths)? {
            CopyOutcome::Copied => debug!(instance = %self.name, "fresh private copy"),
            CopyOutcome::Reused => debug!(instance = %self.name, "reusing private copy"),
        }
        binder::bind_path(&paths.module, &paths.log, claim)
    }

    /// Applies the cell values and RAM maps of `config`; requires a loaded module.
    pub fn configure(&mut self, config: &InstanceConfig) -> Result<()> {
        let module = self.module_mut("configure")?;
        module.set_sync_period_ns(config.sync_period_ns);
        module.set_boot_state(config.boot_state);
        module.set_image_load_params(config.image_load_base, config.image_load_size);
        for region in &config.ram {
            if region.sync {
                module.map_ram(&region.name, region.base, region.size, region.access)?;
            } else {
                module.map_ram_nosync(&region.name, region.base, region.size, region.access)?;
            }
        }
        Ok(())
    }

    /// Bound module, for outbound calls and cell inspection.
    pub fn module(&self) -> Result<&BoundModule> {
        match (self.state, &self.module) {
            (State::Failed, _) => Err(Error::InstanceFailed(self.name.clone())),
            (_, Some(module)) => Ok(module),
            (_, None) => Err(Error::NotLoaded(self.name.clone())),
        }
    }

    /// Bound module for configuration; refused once the entry point has started.
    pub fn module_mut(&mut self, operation: &'static str) -> Result<&mut BoundModule> {
        match (self.state, self.module.as_mut()) {
            (State::Failed, _) => Err(Error::InstanceFailed(self.name.clone())),
            (State::Loaded, Some(module)) => Ok(module),
            (State::Configuring, _) | (_, None) => Err(Error::NotLoaded(self.name.clone())),
            (state, Some(_)) => Err(Error::InvalidState {
                operation,
                state: state.name(),
            }),
        }
    }

    /// Sets the minimum simulated time between sync callbacks.
    pub fn set_sync_period_ns(&mut self, period_ns: u64) -> Result<()> {
        self.module_mut("set the sync period")?
            .set_sync_period_ns(period_ns);
        Ok(())
    }

    /// Sets whether the CPUs start running.
    pub fn set_boot_state(&mut self, state: BootState) -> Result<()> {
        self.module_mut("set the boot state")?.set_boot_state(state);
        Ok(())
    }

    /// Sets the boot image placement.
    pub fn set_image_load_params(&mut self, base: u64, size: u64) -> Result<()> {
        self.module_mut("set image load parameters")?
            .set_image_load_params(base, size);
        Ok(())
    }

    /// Registers a RAM region.
    pub fn map_ram(&mut self, name: &str, base: u64, size: u64, access: RamAccess) -> Result<()> {
        self.module_mut("map RAM")?.map_ram(name, base, size, access)
    }

    /// Registers a RAM region whose accesses skip the time sync.
    pub fn map_ram_nosync(&mut self, name: &str, base: u64, size: u64, access: RamAccess) -> Result<()> {
        self.module_mut("map RAM")?
            .map_ram_nosync(name, base, size, access)
    }

    /// Routes every inbound callback of the module to `target`.
    ///
    /// Installs the timed, debug, DMI and sync trampolines and points the opaque cell at the
    /// target. The target lives as long as the module stays mapped; attaching again replaces
    /// the routing but keeps the old target alive.
    pub fn attach_bus(&mut self, target: impl BusTarget + 'static) -> Result<()> {
        let module = self.module_mut("attach a bus target")?;
        let slot: Arc<TargetSlot> = Arc::new(TargetSlot::new(Box::new(target)));
        let opaque = trampoline::opaque_of(&slot);
        module.unit().retain(slot);
        // SAFETY: the trampolines expect exactly an opaque produced by `opaque_of`, and the
        // slot is retained by the load unit for as long as the module is mapped.
        unsafe {
            module.set_opaque(opaque);
            module.set_bus_access_cb(Some(trampoline::bus_access));
            module.set_bus_access_dbg_cb(Some(trampoline::bus_access_dbg));
            module.set_get_dmi_ptr_cb(Some(trampoline::get_dmi_ptr));
            module.set_sync_cb(Some(trampoline::sync));
        }
        debug!(instance = %self.name, "bus target attached");
        Ok(())
    }

    /// Delivers a lifecycle event to the module.
    pub fn notify_event(&self, event: EventKind) -> Result<()> {
        self.module()?.notify_event(event);
        Ok(())
    }

    /// Outbound bus port into the module, usable from other threads while `run` blocks.
    pub fn bus_port(&self) -> Result<BusPort> {
        Ok(self.module()?.bus_port())
    }

    /// Handle that stops `run` from another thread.
    pub fn shutdown_handle(&self) -> Result<ShutdownHandle> {
        let module = self.module()?;
        Ok(ShutdownHandle {
            unit: Arc::clone(module.unit()),
            request: module.shutdown_request_fn(),
            requested: Arc::clone(&self.shutdown),
        })
    }

    /// Requests shutdown; idempotent.
    pub fn request_shutdown(&self) -> Result<()> {
        let _ = self.shutdown_handle()?.request();
        Ok(())
    }

    /// Runs the module's entry point with the accumulated arguments.
    ///
    /// Blocks the calling thread until the module shuts down. The timed, debug and DMI
    /// callbacks must be installed first.
    ///
    /// # Returns
    ///
    /// The entry point's exit code.
    pub fn run(&mut self) -> Result<i32> {
        let module = self.module_mut("run")?;
        let missing = module.missing_callbacks();
        if !missing.is_empty() {
            return Err(Error::CallbacksNotRegistered(missing));
        }
        let argv = self.argv.as_ptrs();
        let argc = self.argv.len() as c_int;

        self.state = State::Running;
        info!(instance = %self.name, args = ?self.argv.to_strings(), "entering module");
        let module = self.module.as_ref().ok_or_else(|| Error::NotLoaded(self.name.clone()))?;
        // SAFETY: `argv` holds `argc` C strings owned by `self.argv`, which is not modified
        // while running, followed by a null pointer.
        let code = unsafe { module.enter(argc, argv.as_ptr()) };
        self.state = State::Finished;
        info!(instance = %self.name, code, "module returned");
        Ok(code)
    }
}
