//! Error types for the frame cache

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while allocating, mapping or releasing cache storage
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Allocation Errors
    // =========================================================================
    /// RAM or disk storage could not be committed
    #[error("Allocation of {size} bytes failed: {reason}")]
    AllocationFailed { size: usize, reason: String },

    /// A backing file could not be opened or mapped
    #[error("Failed to map cache file {path}: {source}")]
    MappingOpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Disk storage was requested without a usable base path
    #[error("Path is empty but required for disk caching: {0}")]
    InvalidPath(String),

    /// The backing file cannot be removed while the buffer still maps it
    #[error("Backing file is still mapped: {0}")]
    StillMapped(PathBuf),

    /// The operation needs storage that was never committed
    #[error("Storage is not allocated")]
    NotAllocated,

    /// The operation is not valid in the buffer's current storage state
    #[error("Invalid storage state: {0}")]
    InvalidState(String),

    // =========================================================================
    // Ambient Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an allocation failure for `size` bytes
    pub fn allocation(size: usize, reason: impl Into<String>) -> Self {
        Error::AllocationFailed {
            size,
            reason: reason.into(),
        }
    }

    /// True for failures that leave the entry without storage
    pub fn is_allocation_failure(&self) -> bool {
        matches!(
            self,
            Error::AllocationFailed { .. } | Error::MappingOpenFailed { .. }
        )
    }
}
