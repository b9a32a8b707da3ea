//! Common types shared by the loader, bus bridge and instance controller.
//!
//! This module provides:
//! 1. **Errors:** The crate-wide `Error` enum and its classification.
//! 2. **ABI:** Raw C signatures, wire constants and `#[repr(C)]` structures of the module contract.

/// Raw C ABI of the module symbol contract.
pub mod abi;
/// Error taxonomy and `Result` alias.
pub mod error;

pub use abi::{BootState, Dmi, EventKind, RamAccess};
pub use error::{Error, ErrorKind, Result};
