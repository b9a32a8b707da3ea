//! TLMu bridge library.
//!
//! This crate loads a pre-built emulator module at runtime and bridges it to an external
//! transaction-level bus model. It provides:
//! 1. **Store:** Per-instance private copies of a shared module binary, so every instance gets its own load unit.
//! 2. **Binder:** Eager, isolated symbol resolution of the fixed TLMu symbol contract into a typed table.
//! 3. **Bus:** Timed, debug and DMI accesses in both directions, plus time sync and event notification.
//! 4. **Instance:** Argument vector, load/run lifecycle and a thread-safe shutdown handle.
//! 5. **Configuration:** JSON-deserializable instance settings applied before the module starts.

/// Common types (errors, raw C ABI of the module contract).
pub mod common;
/// Instance configuration (defaults, RAM mappings, JSON loading).
pub mod config;
/// Bus transactions, the `BusTarget` trait and the FFI trampolines.
pub mod bus;
/// Instance controller (argument vector, lifecycle, shutdown).
pub mod instance;
/// Module store, dynamic library handle and symbol binder.
pub mod loader;

/// Crate-wide error type; every fallible operation returns [`Result`].
pub use crate::common::error::{Error, ErrorKind, Result};
/// Instance configuration root; use `InstanceConfig::default()` or deserialize from JSON.
pub use crate::config::InstanceConfig;
/// Bus-side interface implemented by the external bus simulator.
pub use crate::bus::{AccessStatus, BusTarget, Direction};
/// Runnable instance and its cross-thread shutdown handle.
pub use crate::instance::{Instance, ShutdownHandle};
