//! Process-wide registry of bound private copies.
//!
//! `dlopen` of a path that is already open returns the existing load unit, so two live
//! instances with the same name would silently share every global of the module. A
//! [`PathClaim`] reserves a private copy path for one instance until it is dropped.
//!
//! Claims are keyed by the canonical path of the store directory, so a symlinked or relative
//! spelling of the same directory collides with the original.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::common::error::{Error, Result};

static LIVE: Mutex<BTreeSet<PathBuf>> = Mutex::new(BTreeSet::new());

/// Exclusive reservation of a private module copy path.
#[derive(Debug)]
pub struct PathClaim {
    path: PathBuf,
}

impl PathClaim {
    /// Reserves `path`, failing with `Error::InstanceNameInUse` if a live claim exists.
    ///
    /// The parent directory of `path` must exist; the file itself need not.
    pub fn acquire(path: &Path) -> Result<Self> {
        let path = canonical(path)?;
        let mut live = LIVE.lock().unwrap_or_else(PoisonError::into_inner);
        if !live.insert(path.clone()) {
            return Err(Error::InstanceNameInUse(path));
        }
        Ok(Self { path })
    }

    /// The reserved path, in canonical form.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn canonical(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::InvalidArgument(path.display().to_string()))?;
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let dir = fs::canonicalize(parent).map_err(|e| Error::store(parent, e))?;
    Ok(dir.join(name))
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        let _ = LIVE
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
    }
}
