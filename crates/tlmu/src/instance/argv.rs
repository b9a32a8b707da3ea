//! Argument vector handed to the module's entry point.

use std::ffi::{CStr, CString};

use libc::c_char;

use crate::common::error::{Error, Result};

/// Slots in the argument array, including the terminating null pointer.
pub const MAX_ARGV_SLOTS: usize = 64;

/// Arguments an instance can hold.
pub const MAX_ARGS: usize = MAX_ARGV_SLOTS - 1;

/// Arguments every instance starts with: a program name and a disabled QMP monitor.
pub const DEFAULT_ARGS: [&CStr; 3] = [c"TLMu", c"-qmp", c"null"];

/// Fixed-capacity, insertion-ordered list of C strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgVector {
    args: Vec<CString>,
}

impl ArgVector {
    /// Creates a vector pre-filled with [`DEFAULT_ARGS`].
    pub fn new() -> Self {
        Self {
            args: DEFAULT_ARGS.iter().map(|arg| (*arg).to_owned()).collect(),
        }
    }

    /// Creates a vector with no arguments.
    pub const fn empty() -> Self {
        Self { args: Vec::new() }
    }

    /// Appends `arg`.
    ///
    /// # Returns
    ///
    /// `Error::ArgvOverflow` once [`MAX_ARGS`] arguments are held (nothing is truncated), or
    /// `Error::InvalidArgument` if `arg` contains a NUL byte.
    pub fn push(&mut self, arg: &str) -> Result<()> {
        if self.args.len() >= MAX_ARGS {
            return Err(Error::ArgvOverflow(arg.to_owned()));
        }
        let arg = CString::new(arg).map_err(|_| Error::InvalidArgument(arg.to_owned()))?;
        self.args.push(arg);
        Ok(())
    }

    /// Number of arguments, excluding the sentinel.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Returns `true` if no argument is held.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Arguments as owned strings, in order.
    pub fn to_strings(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    /// Pointer array for `argv`, terminated by a null pointer; borrows `self`.
    pub(crate) fn as_ptrs(&self) -> Vec<*const c_char> {
        self.args
            .iter()
            .map(|arg| arg.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect()
    }
}

impl Default for ArgVector {
    fn default() -> Self {
        Self::new()
    }
}
