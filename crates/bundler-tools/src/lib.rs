//! Bundler Tools - external texture and archive tools
//!
//! This crate provides:
//! - `ProcessRunner`: run a program with a deadline, classify the result as a `ToolOutcome`
//! - `TextureTranscoder`: convert, clamp, rescale and re-mip textures in place
//! - `ArchiveWorkerPool`: build shard archives through a bounded worker pool
//!
//! # Example
//!
//! ```rust,ignore
//! use bundler_tools::{ArchiveJob, ArchiveWorkerPool, Compression, SystemRunner, ToolArchiver};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let archiver = ToolArchiver::new("7za", Arc::new(SystemRunner));
//! let pool = ArchiveWorkerPool::new(Arc::new(archiver), ArchiveWorkerPool::DEFAULT_WORKERS);
//! let job = ArchiveJob {
//!     source_dir: "/tmp/bundles/models-1".into(),
//!     destination: "/tmp/bundles/town-models-1.zip".into(),
//!     compression: Compression::Normal,
//! };
//! let reports = pool.run_all(vec![job], |report, done| println!("{done}: {:?}", report.outcome)).await;
//! assert!(reports[0].succeeded());
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod archive;
pub mod error;
pub mod runner;
pub mod texture;

pub use archive::{
    ArchiveJob, ArchiveReport, ArchiveWorkerPool, Archiver, Compression, PoolStats, ToolArchiver,
    ARCHIVE_TOOL_TIMEOUT,
};
pub use error::ToolError;
pub use runner::{locate_tool, ProcessRunner, SystemRunner, ToolInvocation, ToolOutcome, POLL_INTERVAL};
pub use texture::{
    filter_tool_output, MipmapMode, RescaleMode, SkipReason, TextureSettings, TextureStats,
    TextureTranscoder, TranscodeOutcome, TranscodeParams, SUPPORTED_INPUT_FORMATS,
    TEXTURE_LOG_FILE, TEXTURE_TOOL_TIMEOUT,
};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        ArchiveJob, ArchiveWorkerPool, Archiver, Compression, ProcessRunner, SystemRunner,
        TextureSettings, TextureTranscoder, ToolOutcome,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
