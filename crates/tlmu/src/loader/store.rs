//! Per-instance module store.
//!
//! Every instance runs from its own copy of the module so that the dynamic linker creates a
//! separate load unit, with separate globals, per instance. This module provides:
//! 1. **Naming:** `<root>/<module basename>-<instance>` for the copy and the same name plus `.log` for the log.
//! 2. **Location:** A `ModuleLocator` strategy turns the caller's specifier into the real file to copy.
//! 3. **Installation:** The copy is written to a temporary file and renamed into place, or reused when identical.

use std::fmt;
use std::fs::{self, DirBuilder, Permissions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::common::error::{Error, Result};
use crate::loader::dl::{self, Library};

/// Mode of the store directory and of every private copy (`rwxrwx---`).
const STORE_MODE: u32 = 0o770;

/// Export whose address identifies the file backing a linker-resolved module.
pub const MARKER_SYMBOL: &str = "vl_main";

/// Resolves a module specifier to the on-disk file that should be copied.
pub trait ModuleLocator: fmt::Debug + Send + Sync {
    /// Returns the path of the file backing `spec`.
    fn locate(&self, spec: &str) -> Result<PathBuf>;
}

/// The specifier is a path to an existing regular file.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileLocator;

impl ModuleLocator for FileLocator {
    fn locate(&self, spec: &str) -> Result<PathBuf> {
        let path = Path::new(spec);
        if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(Error::Locate {
                spec: spec.to_owned(),
                reason: "not a regular file".to_owned(),
            })
        }
    }
}

/// The specifier is handed to the dynamic linker, which may search for it.
///
/// The module is opened in this process, the address of [`MARKER_SYMBOL`] is resolved and
/// mapped back to the file that provided it. The temporary handle is closed before returning.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkerLocator;

impl ModuleLocator for LinkerLocator {
    fn locate(&self, spec: &str) -> Result<PathBuf> {
        let locate_err = |reason: String| Error::Locate {
            spec: spec.to_owned(),
            reason,
        };
        let library = Library::open(Path::new(spec)).map_err(locate_err)?;
        let marker = library.symbol(MARKER_SYMBOL).map_err(locate_err)?;
        let path = dl::providing_file(marker).map_err(locate_err)?;
        debug!(spec, path = %path.display(), "module resolved through the dynamic linker");
        Ok(path)
    }
}

/// Picks [`FileLocator`] for existing regular files and [`LinkerLocator`] otherwise.
pub fn default_locator(spec: &str) -> &'static dyn ModuleLocator {
    if Path::new(spec).is_file() {
        &FileLocator
    } else {
        &LinkerLocator
    }
}

/// Paths owned by one instance inside the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    /// Private module copy.
    pub module: PathBuf,
    /// Log file handed to the module.
    pub log: PathBuf,
}

/// What `install` did to produce the private copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// A fresh copy was written.
    Copied,
    /// An identical copy already existed and was reused.
    Reused,
}

/// Directory of private module copies.
#[derive(Debug)]
pub struct ModuleStore {
    root: PathBuf,
    locator: Option<Box<dyn ModuleLocator>>,
}

impl ModuleStore {
    /// Creates a store rooted at `root`; the directory is created on first install.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locator: None,
        }
    }

    /// Replaces the default locator selection with a fixed strategy.
    #[must_use]
    pub fn with_locator(mut self, locator: Box<dyn ModuleLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Store directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Computes the private copy and log paths of `instance` for module `spec`.
    ///
    /// # Arguments
    ///
    /// * `spec` - Module specifier; only its final path component is used.
    /// * `instance` - Instance name; must be non-empty and contain no `/`.
    ///
    /// # Returns
    ///
    /// The deterministic pair of paths; the same inputs always give the same paths.
    pub fn paths(&self, spec: &str, instance: &str) -> Result<StorePaths> {
        if instance.is_empty() || instance.contains(['/', '\0']) {
            return Err(Error::InvalidArgument(instance.to_owned()));
        }
        let base = Path::new(spec)
            .file_name()
            .ok_or_else(|| Error::Locate {
                spec: spec.to_owned(),
                reason: "specifier has no file name".to_owned(),
            })?
            .to_string_lossy();
        let stem = format!("{base}-{instance}");
        Ok(StorePaths {
            module: self.root.join(&stem),
            log: self.root.join(format!("{stem}.log")),
        })
    }

    /// Ensures a byte-identical copy of the module behind `spec` exists at `paths.module`.
    ///
    /// The source is never modified. On any failure the temporary copy is removed and the
    /// existing destination, if any, is left untouched.
    pub fn install(&self, spec: &str, paths: &StorePaths) -> Result<CopyOutcome> {
        self.ensure_root()?;

        let source = match &self.locator {
            Some(locator) => locator.locate(spec)?,
            None => default_locator(spec).locate(spec)?,
        };
        let bytes = fs::read(&source).map_err(|e| Error::store(&source, e))?;

        if fs::read(&paths.module).is_ok_and(|existing| existing == bytes) {
            debug!(path = %paths.module.display(), "private module copy is up to date");
            return Ok(CopyOutcome::Reused);
        }
        if paths.module.exists() {
            warn!(path = %paths.module.display(), "replacing stale private module copy");
        }

        let mut tmp = tempfile::Builder::new()
            .prefix(".copy-")
            .tempfile_in(&self.root)
            .map_err(|e| Error::store(&self.root, e))?;
        write_copy(&mut tmp, &bytes).map_err(|e| Error::store(tmp.path(), e))?;
        let _ = tmp
            .persist(&paths.module)
            .map_err(|e| Error::store(&paths.module, e.error))?;

        debug!(
            source = %source.display(),
            path = %paths.module.display(),
            bytes = bytes.len(),
            "private module copy installed"
        );
        Ok(CopyOutcome::Copied)
    }

    /// Computes the paths and installs the copy in one step.
    pub fn prepare(&self, spec: &str, instance: &str) -> Result<(StorePaths, CopyOutcome)> {
        let paths = self.paths(spec, instance)?;
        let outcome = self.install(spec, &paths)?;
        Ok((paths, outcome))
    }

    /// Creates the store directory if it does not exist yet.
    pub fn ensure_root(&self) -> Result<()> {
        DirBuilder::new()
            .recursive(true)
            .mode(STORE_MODE)
            .create(&self.root)
            .map_err(|e| Error::store(&self.root, e))
    }
}

impl Default for ModuleStore {
    fn default() -> Self {
        Self::new(crate::config::InstanceConfig::default().store_dir)
    }
}

fn write_copy(tmp: &mut NamedTempFile, bytes: &[u8]) -> std::io::Result<()> {
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    fs::set_permissions(tmp.path(), Permissions::from_mode(STORE_MODE))
}
