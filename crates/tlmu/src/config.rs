//! Configuration for a bridge instance.
//!
//! This module defines the settings applied to a bound module before its entry point runs. It provides:
//! 1. **Defaults:** Store location, sync period, boot state and image placement.
//! 2. **Structures:** `InstanceConfig` and the `RamRegion` mappings registered through `tlm_map_ram`.
//! 3. **Loading:** JSON parsing from a string or a file.
//!
//! Every field is optional in JSON; missing fields fall back to the defaults below.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::common::abi::{BootState, RamAccess};
use crate::common::error::{Error, Result};

/// Default configuration constants for an instance.
mod defaults {
    /// Hidden directory, relative to the working directory, holding private module copies and logs.
    pub const STORE_DIR: &str = ".tlmu";

    /// Minimum simulated time between two sync callbacks (1 ms).
    pub const SYNC_PERIOD_NS: u64 = 1_000_000;

    /// Bus address the module places the boot image at when none is configured.
    pub const IMAGE_LOAD_BASE: u64 = 0;

    /// Size of the boot image region; zero lets the module decide.
    pub const IMAGE_LOAD_SIZE: u64 = 0;
}

/// Settings applied to an instance between `load` and `run`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstanceConfig {
    /// Directory holding private module copies and log files.
    #[serde(default = "InstanceConfig::default_store_dir")]
    pub store_dir: PathBuf,

    /// Minimum period between sync callbacks, in simulated nanoseconds.
    #[serde(default = "InstanceConfig::default_sync_period_ns")]
    pub sync_period_ns: u64,

    /// Whether the CPUs start running or sleeping.
    #[serde(default)]
    pub boot_state: BootState,

    /// Boot image load address.
    #[serde(default = "InstanceConfig::default_image_load_base")]
    pub image_load_base: u64,

    /// Boot image region size.
    #[serde(default = "InstanceConfig::default_image_load_size")]
    pub image_load_size: u64,

    /// Extra emulator arguments appended after the defaults.
    #[serde(default)]
    pub args: Vec<String>,

    /// RAM regions the module should execute from directly.
    #[serde(default)]
    pub ram: Vec<RamRegion>,
}

impl InstanceConfig {
    fn default_store_dir() -> PathBuf {
        PathBuf::from(defaults::STORE_DIR)
    }

    const fn default_sync_period_ns() -> u64 {
        defaults::SYNC_PERIOD_NS
    }

    const fn default_image_load_base() -> u64 {
        defaults::IMAGE_LOAD_BASE
    }

    const fn default_image_load_size() -> u64 {
        defaults::IMAGE_LOAD_SIZE
    }

    /// Parses a configuration from a JSON document.
    ///
    /// # Arguments
    ///
    /// * `json` - JSON object; unknown keys are ignored, missing keys take defaults.
    ///
    /// # Returns
    ///
    /// The parsed configuration, or `Error::Config` if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            store_dir: Self::default_store_dir(),
            sync_period_ns: defaults::SYNC_PERIOD_NS,
            boot_state: BootState::default(),
            image_load_base: defaults::IMAGE_LOAD_BASE,
            image_load_size: defaults::IMAGE_LOAD_SIZE,
            args: Vec::new(),
            ram: Vec::new(),
        }
    }
}

/// A RAM region registered with the module through `tlm_map_ram`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RamRegion {
    /// Region name shown in the module's memory tree.
    pub name: String,
    /// Bus base address.
    pub base: u64,
    /// Size in bytes.
    pub size: u64,
    /// Read-only or read-write.
    #[serde(default)]
    pub access: RamAccess,
    /// When false the module may access the region without syncing time first.
    #[serde(default = "RamRegion::default_sync")]
    pub sync: bool,
}

impl RamRegion {
    const fn default_sync() -> bool {
        true
    }
}
