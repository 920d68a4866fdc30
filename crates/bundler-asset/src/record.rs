//! Per-asset bookkeeping for one run

use crate::class::AssetClass;
use std::path::{Path, PathBuf};

/// Index of a record inside the identity cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub(crate) usize);

impl RecordId {
    /// Position in resolve order
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// One processed asset
///
/// The source reference is the identity key. `disk_path` is set when the
/// record is created and only replaced by a successful format conversion.
/// `shard` never changes after placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecord {
    source_ref: String,
    class: AssetClass,
    disk_path: PathBuf,
    bundle_ref: String,
    shard: u32,
    dont_process: bool,
    textures_resolved: bool,
    texture_post_processed: bool,
}

impl AssetRecord {
    /// Create a record for a freshly placed asset
    pub fn new(
        source_ref: impl Into<String>,
        class: AssetClass,
        disk_path: impl Into<PathBuf>,
        bundle_ref: impl Into<String>,
        shard: u32,
    ) -> Self {
        Self {
            source_ref: source_ref.into(),
            class,
            disk_path: disk_path.into(),
            bundle_ref: bundle_ref.into(),
            shard,
            dont_process: false,
            textures_resolved: false,
            texture_post_processed: false,
        }
    }

    /// Record for an asset that is known but must never be bundled
    pub fn skipped(source_ref: impl Into<String>, class: AssetClass) -> Self {
        let mut record = Self::new(source_ref, class, PathBuf::new(), String::new(), 0);
        record.dont_process = true;
        record
    }

    /// Original reference, the identity key
    #[inline]
    #[must_use]
    pub fn source_ref(&self) -> &str {
        &self.source_ref
    }

    /// Class the asset was placed as
    #[inline]
    #[must_use]
    pub fn class(&self) -> AssetClass {
        self.class
    }

    /// Working copy inside the shard
    #[inline]
    #[must_use]
    pub fn disk_path(&self) -> &Path {
        &self.disk_path
    }

    /// Reference into the archive, e.g. `town-models-1.zip#house.mesh`
    #[inline]
    #[must_use]
    pub fn bundle_ref(&self) -> &str {
        &self.bundle_ref
    }

    /// Shard the copy was written to
    #[inline]
    #[must_use]
    pub fn shard(&self) -> u32 {
        self.shard
    }

    /// The asset is skipped for the rest of the run
    #[inline]
    #[must_use]
    pub fn dont_process(&self) -> bool {
        self.dont_process
    }

    /// Material texture slots were already walked
    #[inline]
    #[must_use]
    pub fn textures_resolved(&self) -> bool {
        self.textures_resolved
    }

    /// The texture tool already saw this record
    #[inline]
    #[must_use]
    pub fn texture_post_processed(&self) -> bool {
        self.texture_post_processed
    }

    /// Whether references to this asset may be rewritten
    #[inline]
    #[must_use]
    pub fn is_bundled(&self) -> bool {
        !self.dont_process && !self.bundle_ref.is_empty()
    }

    /// Sticky: once set the record is never processed again
    pub fn mark_dont_process(&mut self) {
        self.dont_process = true;
    }

    /// Set after the material's slots were walked
    pub fn mark_textures_resolved(&mut self) {
        self.textures_resolved = true;
    }

    /// Set before the texture tool runs
    pub fn mark_texture_post_processed(&mut self) {
        self.texture_post_processed = true;
    }

    /// Point the record at a converted file.
    ///
    /// The last occurrence of the old file name in the bundle ref is
    /// replaced with the new file name.
    pub fn apply_conversion(&mut self, new_path: impl Into<PathBuf>) {
        let new_path = new_path.into();
        let old_name = file_name_of(&self.disk_path);
        let new_name = file_name_of(&new_path);
        if !old_name.is_empty() {
            if let Some(pos) = self.bundle_ref.rfind(&old_name) {
                self.bundle_ref
                    .replace_range(pos..pos + old_name.len(), &new_name);
            }
        }
        self.disk_path = new_path;
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
