//! Bundler Asset - identity, placement and material texture slots
//!
//! This crate provides:
//! - Asset reference parsing (external URLs, local paths, protocol refs, sub-assets)
//! - `AssetIdentityCache`: at most one working copy per source reference
//! - `BundleAllocator`: per-class shard numbering under a byte threshold
//! - Material script texture slot discovery and rewriting
//! - The `AssetSource` trait the host asset system implements
//!
//! # Example
//!
//! ```rust,ignore
//! use bundler_asset::{AssetClass, AssetIdentityCache, BundleAllocator, IdentitySettings};
//!
//! # async fn example(assets: &dyn bundler_asset::AssetSource) -> Result<(), Box<dyn std::error::Error>> {
//! let settings = IdentitySettings::new("/tmp/bundles")
//!     .with_bundle_prefix("town.zip")
//!     .with_base_url("https://storage.example.com/town/");
//! let mut cache = AssetIdentityCache::new(settings);
//! let mut allocator = BundleAllocator::default();
//!
//! let id = cache.resolve("models/house.mesh", AssetClass::Mesh, assets, &mut allocator).await?;
//! println!("{}", cache.record(id).bundle_ref()); // town-models-1.zip#models/house.mesh
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

pub mod allocator;
pub mod class;
pub mod error;
pub mod identity;
pub mod material;
pub mod record;
pub mod reference;
pub mod source;

pub use allocator::{
    shard_folder, BundleAllocator, ClassTotals, Placement, ShardSlot, ShardState,
    DEFAULT_SPLIT_SIZE,
};
pub use class::AssetClass;
pub use error::{MaterialError, ResolveError};
pub use identity::{normalize_prefix, AssetIdentityCache, IdentitySettings};
pub use material::{MaterialScript, TextureSlot};
pub use record::{AssetRecord, RecordId};
pub use reference::{resolve_relative, trim_base_url, ParsedRef, RefKind};
pub use source::{AssetSource, AssetType, DiskSource, LoadedAsset, PendingTransfer};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        AssetClass, AssetIdentityCache, AssetRecord, AssetSource, BundleAllocator,
        IdentitySettings, MaterialScript, ParsedRef, RecordId,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
