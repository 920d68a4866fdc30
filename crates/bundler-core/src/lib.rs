//! Bundler Core - the scene bundling pipeline
//!
//! This crate provides:
//! - `PipelineController`: backup, processing, archiving, upload and replication of one run
//! - `ReferenceRewriter`: points mesh, material and generated material refs at bundles
//! - `PackagerConfig`: TOML configuration resolved into per-run `RunSettings`
//! - `StorageClient`: the remote object store, with a directory backed `LocalStorage`
//! - `RunLog`, `PipelineEvent` and `RunSummary` for hosts
//!
//! # Example
//!
//! ```rust,ignore
//! use bundler_core::prelude::*;
//! use bundler_scene::MemoryWorld;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let world = Arc::new(MemoryWorld::load("town.json".as_ref()).await?);
//! let storage = Arc::new(LocalStorage::new("/srv/storage", "scenes/town.txml"));
//! let config = PackagerConfig::load("bundler.toml".as_ref()).await?;
//!
//! let controller = PipelineController::new(world.clone(), world, storage, Arc::new(AutoConfirm), config);
//! let summary = controller.start().await?;
//! println!("converted {} refs", summary.counters.converted_refs);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod controller;
pub mod error;
pub mod host;
pub mod log;
pub mod progress;
pub mod rewriter;
pub mod state;
pub mod storage;
pub mod summary;

pub use config::{IncludeConfig, PackagerConfig, RunSettings, TextureConfig, CONFIG_FILE_NAME};
pub use controller::{poll_interval, PipelineController};
pub use error::{ConfigError, PipelineError, Result, StorageError};
pub use host::{AutoConfirm, ConfirmPrompt, Host, PipelineEvent, StopHandle};
pub use log::{LogEntry, RunLog, Severity, MAIN_LOG_FILE};
pub use progress::{ProgressAggregator, ProgressHandle};
pub use rewriter::{generated_material_name, targets, ReferenceRewriter};
pub use state::{PhaseCell, PipelineState, RunCounters, RunState};
pub use storage::{LocalStorage, StorageClient, UploadReceipt, UPLOAD_CHUNK_SIZE};
pub use summary::{ArchiveSummary, ClassSummary, RunSummary};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        AutoConfirm, ConfirmPrompt, Host, LocalStorage, PackagerConfig, PipelineController,
        PipelineError, PipelineEvent, PipelineState, RunSummary, StorageClient,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
