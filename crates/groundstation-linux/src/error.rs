//! Error types for hardware access.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while talking to the drone's hardware.
#[derive(Error, Debug)]
pub enum HardwareError {
    /// No IIO device with the expected name was found.
    #[error("no IIO device named '{name}' under {root}")]
    DeviceNotFound {
        /// Driver name that was searched for.
        name: String,
        /// Directory that was scanned.
        root: PathBuf,
    },

    /// A sysfs attribute could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Attribute path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A sysfs attribute held something other than a number.
    #[error("failed to parse {path}: '{value}'")]
    Parse {
        /// Attribute path.
        path: PathBuf,
        /// The raw contents.
        value: String,
    },

    /// A helper program could not be started.
    #[error("failed to run '{program}': {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A helper program exited unsuccessfully.
    #[error("'{program}' exited with {status}: {stderr}")]
    CommandFailed {
        /// Program name.
        program: String,
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// A helper program did not finish in time.
    #[error("'{program}' timed out after {timeout:?}")]
    Timeout {
        /// Program name.
        program: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A blocking read task panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Join(String),
}

/// A specialized Result type for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

impl From<tokio::task::JoinError> for HardwareError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Join(err.to_string())
    }
}
