//! Error types for asset resolution and material scripts

use std::path::PathBuf;
use thiserror::Error;

/// Reasons a reference cannot be bundled. The caller skips the reference;
/// no record is created.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// The asset system does not know the reference
    #[error("asset '{0}' is not loaded")]
    NotLoaded(String),

    /// Loaded without a known disk source
    #[error("asset '{0}' has no disk source")]
    NoDiskSource(String),

    /// The disk source was removed
    #[error("disk source of '{reference}' does not exist: {path}")]
    MissingDiskSource {
        /// Reference being resolved
        reference: String,
        /// Path the asset system reported
        path: PathBuf,
    },
}

/// Material script I/O and slot errors
#[derive(Debug, Error)]
pub enum MaterialError {
    /// Reading the script failed
    #[error("failed to read material {path}: {source}")]
    Read {
        /// Script file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Writing the script failed
    #[error("failed to write material {path}: {source}")]
    Write {
        /// Script file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Slot index out of range
    #[error("texture slot {0} does not exist")]
    NoSuchSlot(usize),
}
