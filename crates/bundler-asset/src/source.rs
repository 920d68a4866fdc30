//! Asset-loading collaborator
//!
//! The pipeline never loads assets itself. It asks an [`AssetSource`] what
//! is loaded, where the bytes live and what is still downloading.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of a loaded asset as reported by the asset system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    /// Geometry
    Mesh,
    /// Material script
    Material,
    /// Image
    Texture,
    /// Anything the pipeline does not bundle
    Other,
}

/// Where the bytes of a loaded asset come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskSource {
    /// Backed by a file on disk (which may have been removed since)
    File(PathBuf),
    /// Created in memory; there is nothing to copy
    Programmatic,
    /// Loaded but no disk source is known
    None,
}

/// Snapshot of a loaded asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedAsset {
    /// Reference the asset was loaded under
    pub name: String,
    /// Kind reported by the asset system
    pub asset_type: AssetType,
    /// Origin of the bytes
    pub disk_source: DiskSource,
}

/// An asset transfer that has not completed yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransfer {
    /// Reference being transferred
    pub reference: String,
    /// Kind of the asset in flight
    pub asset_type: AssetType,
}

/// Read access to the host's asset system
pub trait AssetSource: Send + Sync {
    /// Look up a loaded asset by its reference
    fn lookup(&self, reference: &str) -> Option<LoadedAsset>;

    /// Pixel dimensions of a loaded texture
    fn texture_dimensions(&self, reference: &str) -> Option<(u32, u32)>;

    /// Transfers still in flight
    fn pending_transfers(&self) -> Vec<PendingTransfer>;

    /// Unload an asset that is no longer referenced
    fn forget(&self, reference: &str);

    /// Unload an asset bundle (the part of a ref before `#`)
    fn forget_bundle(&self, reference: &str);

    /// Storage base URL that relative refs resolve against
    fn default_base_url(&self) -> String;
}
