//! Dynamic library handle.
//!
//! A thin owner of a `dlopen` handle. Modules are opened with eager binding, local visibility
//! and, on glibc, `RTLD_DEEPBIND`, so each private copy resolves its own globals first and never
//! leaks symbols into the process namespace. The handle is closed on drop.

use std::ffi::{CStr, CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use libc::{c_int, c_void};

#[cfg(all(target_os = "linux", target_env = "gnu"))]
const DEEPBIND: c_int = libc::RTLD_DEEPBIND;
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
const DEEPBIND: c_int = 0;

/// Flags every module is opened with.
pub const OPEN_FLAGS: c_int = libc::RTLD_NOW | libc::RTLD_LOCAL | DEEPBIND;

/// An open dynamic library.
#[derive(Debug)]
pub struct Library {
    handle: NonNull<c_void>,
    path: PathBuf,
}

// SAFETY: a dlopen handle is a process-wide token; dlsym/dlclose on it are thread-safe.
unsafe impl Send for Library {}
// SAFETY: see `Send`; `Library` exposes no interior mutability.
unsafe impl Sync for Library {}

impl Library {
    /// Opens `path` with [`OPEN_FLAGS`].
    ///
    /// A path without a `/` is searched the way the dynamic linker searches `DT_NEEDED`
    /// entries, which is what lets a bare soname act as a module specifier.
    ///
    /// # Returns
    ///
    /// The handle, or the loader diagnostic on failure.
    pub fn open(path: &Path) -> Result<Self, String> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| format!("{} contains an interior NUL byte", path.display()))?;
        // SAFETY: `c_path` is a valid NUL-terminated string for the duration of the call.
        let raw = unsafe { libc::dlopen(c_path.as_ptr(), OPEN_FLAGS) };
        NonNull::new(raw)
            .map(|handle| Self {
                handle,
                path: path.to_path_buf(),
            })
            .ok_or_else(last_error)
    }

    /// Path the library was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Looks up `name` in this load unit only.
    pub fn symbol(&self, name: &str) -> Result<NonNull<c_void>, String> {
        let c_name = CString::new(name).map_err(|_| format!("{name:?} contains an interior NUL byte"))?;
        // SAFETY: dlerror only reads and clears the calling thread's error slot.
        let _ = unsafe { libc::dlerror() };
        // SAFETY: `handle` is live until drop and `c_name` is NUL-terminated.
        let raw = unsafe { libc::dlsym(self.handle.as_ptr(), c_name.as_ptr()) };
        NonNull::new(raw).ok_or_else(|| {
            let reason = last_error();
            if reason.is_empty() {
                format!("{name} resolved to a null address")
            } else {
                reason
            }
        })
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        // SAFETY: `handle` came from a successful dlopen and is closed exactly once.
        if unsafe { libc::dlclose(self.handle.as_ptr()) } != 0 {
            tracing::warn!(path = %self.path.display(), reason = %last_error(), "dlclose failed");
        }
    }
}

/// Returns the on-disk file of the shared object that contains `addr`.
pub fn providing_file(addr: NonNull<c_void>) -> Result<PathBuf, String> {
    // SAFETY: `Dl_info` is plain old data; an all-zero value is valid.
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    // SAFETY: `info` is a valid out-parameter; dladdr does not retain it.
    if unsafe { libc::dladdr(addr.as_ptr(), &raw mut info) } == 0 || info.dli_fname.is_null() {
        return Err(format!("dladdr({:p}) found no shared object", addr.as_ptr()));
    }
    // SAFETY: dli_fname is a NUL-terminated string owned by the loader, valid while the object is mapped.
    let fname = unsafe { CStr::from_ptr(info.dli_fname) };
    Ok(PathBuf::from(OsStr::from_bytes(fname.to_bytes())))
}

fn last_error() -> String {
    // SAFETY: dlerror returns null or a thread-local NUL-terminated message.
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        String::new()
    } else {
        // SAFETY: checked non-null above; the message lives until the next dl* call on this thread.
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }
}
