//! Error types for the bundler core
//!
//! Three layers of failure:
//! - Configuration problems, raised before anything is touched
//! - Storage failures from the remote object store
//! - Pipeline failures that end a run through the stop path

use crate::state::PipelineState;
use bundler_scene::SceneError;
use std::path::PathBuf;

/// Invalid or unusable configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No working directory configured
    #[error("working directory is not defined")]
    MissingWorkingDir,

    /// Working directory could not be created
    #[error("working directory {path} could not be created: {source}")]
    WorkingDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Storage did not report a scene object
    #[error("input scene is not defined")]
    MissingSceneRef,

    /// Scene object is not a `.txml` reference
    #[error("input scene is not a ref to a txml: {0}")]
    NotASceneRef(String),

    /// Split size of zero
    #[error("bundle split size cannot be 0 or smaller")]
    InvalidSplitSize,

    /// Asset storage did not report a base URL
    #[error("base url could not be detected from the default asset storage")]
    MissingBaseUrl,

    /// Archive tool could not be found
    #[error("archive tool {0} was not found")]
    ArchiveToolMissing(PathBuf),

    /// Config file could not be read or written
    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be serialized
    #[error("config serialization failed: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Remote storage failures
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Operation needs an authenticated session
    #[error("storage access requires authentication")]
    NotAuthenticated,

    /// Object does not exist
    #[error("storage object '{0}' does not exist")]
    NotFound(String),

    /// Upload of one file failed
    #[error("upload of '{key}' failed: {reason}")]
    Upload { key: String, reason: String },

    /// Underlying I/O error
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run-level failure
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// `start` while a run is active
    #[error("a bundling run is already active")]
    AlreadyRunning,

    /// Configuration rejected
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Storage authentication failed
    #[error("storage access is required for running the bundler: {0}")]
    NotAuthenticated(#[source] StorageError),

    /// Host declined a required confirmation
    #[error("run aborted: {0}")]
    Aborted(String),

    /// Scene backup failed
    #[error("backup of current scene failed: {0}")]
    Backup(#[source] StorageError),

    /// One or more archives were not created
    #[error("failed to create archives: {}", failed.join(", "))]
    Archive { failed: Vec<String> },

    /// One or more uploads failed; `orphaned` were uploaded anyway
    #[error("failed to upload archives: {}", failed.join(", "))]
    Upload {
        failed: Vec<String>,
        orphaned: Vec<String>,
    },

    /// Other storage error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Scene access error
    #[error("scene error: {0}")]
    Scene(#[from] SceneError),

    /// Phase change not in the transition table
    #[error("illegal state transition {from:?} -> {to:?}")]
    IllegalTransition {
        from: PipelineState,
        to: PipelineState,
    },

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Stopped on request
    #[error("run cancelled")]
    Cancelled,
}

impl PipelineError {
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    /// Archives that were uploaded by a run that then failed
    #[must_use]
    pub fn orphaned(&self) -> &[String] {
        match self {
            PipelineError::Upload { orphaned, .. } => orphaned,
            _ => &[],
        }
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
