//! Module loading: private copies, dynamic library handles and symbol binding.
//!
//! Loading an instance's module runs in order:
//! 1. **Claim:** Reserve the private copy path so no other live instance binds the same load unit.
//! 2. **Store:** Locate the source module and install a byte-identical private copy.
//! 3. **Bind:** Open the copy in isolation and resolve the full symbol contract.

/// Symbol contract resolution and the bound-module handle.
pub mod binder;
/// Process-wide reservation of private copy paths.
pub mod claim;
/// `dlopen` handle.
pub mod dl;
/// Per-instance module store.
pub mod store;

pub use binder::{BoundModule, LoadUnit, REQUIRED_SYMBOLS, SymbolSource, SymbolTable};
pub use claim::PathClaim;
pub use store::{CopyOutcome, FileLocator, LinkerLocator, ModuleLocator, ModuleStore, StorePaths};
