//! Error taxonomy for the bridge.
//!
//! Every fallible operation returns [`Result`]. Errors fall into three classes:
//! 1. **Configuration:** A bad argument vector or configuration file; the caller's input is wrong.
//! 2. **Load:** The module could not be copied, opened or bound; the instance is unusable.
//! 3. **Fatal:** A sequencing violation (running without callbacks, using a failed instance).
//!
//! Rejected bus accesses are not errors; they are reported as `AccessStatus::Rejected`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid caller input (arguments, configuration).
    Configuration,
    /// Module store or symbol binding failure.
    Load,
    /// Lifecycle sequencing violation.
    Fatal,
}

/// Errors raised by the module store, the binder and the instance controller.
#[derive(Debug, Error)]
pub enum Error {
    /// The argument vector already holds `instance::MAX_ARGS` arguments.
    #[error("argument vector is full, cannot append {0:?}")]
    ArgvOverflow(String),

    /// A string handed to the module contains an interior NUL byte.
    #[error("{0:?} contains an interior NUL byte")]
    InvalidArgument(String),

    /// The operation is not allowed in the instance's current lifecycle state.
    #[error("cannot {operation} while instance is {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// Lifecycle state the instance was in.
        state: &'static str,
    },

    /// The configuration file could not be read.
    #[error("cannot read configuration {path}: {source}")]
    ConfigRead {
        /// Configuration file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The configuration is not valid JSON for `InstanceConfig`.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// The module store could not create or copy a file.
    #[error("module store: {path}: {source}")]
    Store {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The source specifier could not be resolved to an on-disk module.
    #[error("cannot locate module {spec:?}: {reason}")]
    Locate {
        /// Specifier as given by the caller.
        spec: String,
        /// Loader diagnostic.
        reason: String,
    },

    /// `dlopen` rejected the private copy.
    #[error("cannot open module {path}: {reason}")]
    Open {
        /// Private copy path.
        path: PathBuf,
        /// Loader diagnostic.
        reason: String,
    },

    /// One or more contract symbols are absent from the module.
    #[error("module {path} is missing required symbols: {}", .symbols.join(", "))]
    MissingSymbols {
        /// Module that was bound.
        path: PathBuf,
        /// Every missing symbol, in contract order.
        symbols: Vec<&'static str>,
    },

    /// Another live instance in this process already bound the same private copy.
    #[error("private module copy {0} is already bound by a live instance")]
    InstanceNameInUse(PathBuf),

    /// `run` was called before the inbound bus callbacks were installed.
    #[error("bus callbacks not registered before run: {}", .0.join(", "))]
    CallbacksNotRegistered(Vec<&'static str>),

    /// The instance failed to load earlier and cannot be operated.
    #[error("instance {0:?} failed to load and is unusable")]
    InstanceFailed(String),

    /// The operation needs a bound module but none is loaded yet.
    #[error("instance {0:?} has no module loaded")]
    NotLoaded(String),
}

impl Error {
    /// Returns the error class.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ArgvOverflow(_)
            | Self::InvalidArgument(_)
            | Self::ConfigRead { .. }
            | Self::Config(_) => ErrorKind::Configuration,
            Self::Store { .. }
            | Self::Locate { .. }
            | Self::Open { .. }
            | Self::MissingSymbols { .. }
            | Self::InstanceNameInUse(_) => ErrorKind::Load,
            Self::InvalidState { .. }
            | Self::CallbacksNotRegistered(_)
            | Self::InstanceFailed(_)
            | Self::NotLoaded(_) => ErrorKind::Fatal,
        }
    }

    pub(crate) fn store(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Store {
            path: path.into(),
            source,
        }
    }
}
