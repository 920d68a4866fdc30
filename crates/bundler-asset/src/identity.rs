//! Asset identity cache
//!
//! Maps every source reference seen during a run to exactly one
//! [`AssetRecord`]. The first resolve copies the source bytes into the shard
//! directory picked by the [`BundleAllocator`]; every later resolve of the
//! same reference returns the existing record untouched.

use crate::allocator::BundleAllocator;
use crate::class::AssetClass;
use crate::error::ResolveError;
use crate::record::{AssetRecord, RecordId};
use crate::reference::{ParsedRef, RefKind};
use crate::source::{AssetSource, DiskSource, LoadedAsset};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Naming inputs for copied assets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentitySettings {
    /// Root of the shard folders
    pub working_dir: PathBuf,
    /// Archive name prefix, always empty or ending with `-`
    pub bundle_prefix: String,
    /// Storage base URL, always empty or ending with `/`
    pub base_url: String,
    /// Replace file names with fresh UUIDs
    pub rewrite_references: bool,
}

impl IdentitySettings {
    /// Settings with no prefix, base URL or renaming
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            ..Self::default()
        }
    }

    /// Set the archive prefix. A trailing `.zip` is dropped and `-` is
    /// appended, so `scene.zip` becomes `scene-`.
    #[must_use]
    pub fn with_bundle_prefix(mut self, prefix: &str) -> Self {
        self.bundle_prefix = normalize_prefix(prefix);
        self
    }

    /// Set the storage base URL that texture refs are prefixed with
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        let mut base = base_url.trim().to_string();
        if !base.is_empty() && !base.ends_with('/') {
            base.push('/');
        }
        self.base_url = base;
        self
    }

    /// Name copies with fresh UUIDs
    #[must_use]
    pub fn with_rewrite_references(mut self, enabled: bool) -> Self {
        self.rewrite_references = enabled;
        self
    }

    /// Archive file name of a shard, e.g. `scene-textures-2.zip`
    #[must_use]
    pub fn archive_name(&self, class: AssetClass, shard: u32) -> String {
        format!(
            "{}{}.zip",
            self.bundle_prefix,
            crate::allocator::shard_folder(class, shard)
        )
    }
}

/// Normalize a user supplied bundle prefix
#[must_use]
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim();
    let stem = if trimmed.to_ascii_lowercase().ends_with(".zip") {
        &trimmed[..trimmed.len() - 4]
    } else {
        trimmed
    };
    if stem.is_empty() {
        String::new()
    } else if stem.ends_with('-') {
        stem.replace(' ', "_")
    } else {
        format!("{}-", stem.replace(' ', "_"))
    }
}

/// One record per source reference for the duration of a run
#[derive(Debug, Default)]
pub struct AssetIdentityCache {
    settings: IdentitySettings,
    records: IndexMap<String, AssetRecord>,
    host_ids: HashMap<String, String>,
    used_paths: HashSet<PathBuf>,
}

impl AssetIdentityCache {
    /// Empty cache
    pub fn new(settings: IdentitySettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Naming settings of the run
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &IdentitySettings {
        &self.settings
    }

    /// Number of records
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// No reference was resolved yet
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record id for a reference that has already been resolved
    #[must_use]
    pub fn get(&self, reference: &str) -> Option<RecordId> {
        self.records.get_index_of(reference).map(RecordId)
    }

    /// # Panics
    ///
    /// Panics if `id` did not come from this cache.
    #[must_use]
    pub fn record(&self, id: RecordId) -> &AssetRecord {
        &self.records[id.0]
    }

    /// # Panics
    ///
    /// Panics if `id` did not come from this cache.
    pub fn record_mut(&mut self, id: RecordId) -> &mut AssetRecord {
        &mut self.records[id.0]
    }

    /// Records in resolve order
    pub fn records(&self) -> impl Iterator<Item = &AssetRecord> {
        self.records.values()
    }

    /// Drop every record. Files already copied stay on disk.
    pub fn clear(&mut self) {
        self.records.clear();
        self.host_ids.clear();
        self.used_paths.clear();
    }

    /// Resolve `reference` to its record, copying the asset on first sight.
    ///
    /// A copy failure still creates a record, marked `dont_process`, so that
    /// later lookups do not retry. Errors mean the reference is unusable and
    /// nothing was recorded.
    pub async fn resolve(
        &mut self,
        reference: &str,
        class: AssetClass,
        assets: &dyn AssetSource,
        allocator: &mut BundleAllocator,
    ) -> Result<RecordId, ResolveError> {
        if let Some(id) = self.get(reference) {
            return Ok(id);
        }

        let (asset, loaded_ref) = lookup(reference, class, assets)?;
        let source_path = match asset.disk_source {
            DiskSource::File(path) => path,
            DiskSource::Programmatic => {
                info!(reference, "asset was created in memory, it will not be bundled");
                return Ok(self.insert(AssetRecord::skipped(reference, class)));
            }
            DiskSource::None => return Err(ResolveError::NoDiskSource(reference.to_string())),
        };
        if !tokio::fs::try_exists(&source_path).await.unwrap_or(false) {
            return Err(ResolveError::MissingDiskSource {
                reference: reference.to_string(),
                path: source_path,
            });
        }

        let parsed = ParsedRef::parse(&loaded_ref);
        let slot = allocator.destination_for(class);
        let (sub_path, file_name) = self.destination_name(&parsed);
        let folder = slot.folder();
        let mut dest = self
            .settings
            .working_dir
            .join(&folder)
            .join(&sub_path)
            .join(&file_name);
        let mut unique_name = self.unique_file_name(&mut dest, &file_name);
        let copied = loop {
            match copy_asset(&source_path, &dest).await {
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(dest = %dest.display(), "destination already exists, picking another name");
                    self.used_paths.insert(dest.clone());
                    unique_name = self.unique_file_name(&mut dest, &file_name);
                }
                other => break other,
            }
        };
        self.used_paths.insert(dest.clone());

        let mut bundle_ref = format!(
            "{}#{}{}",
            self.settings.archive_name(class, slot.shard),
            sub_path,
            unique_name
        );
        if class.uses_absolute_refs() {
            bundle_ref.insert_str(0, &self.settings.base_url);
        }

        match copied {
            Ok(bytes) => {
                let placement = allocator.commit(class, slot.shard, bytes);
                debug!(
                    reference,
                    dest = %dest.display(),
                    bytes,
                    shard = placement.shard,
                    "copied asset"
                );
                Ok(self.insert(AssetRecord::new(reference, class, dest, bundle_ref, slot.shard)))
            }
            Err(err) => {
                warn!(reference, dest = %dest.display(), error = %err, "failed to copy asset");
                let mut record = AssetRecord::new(reference, class, dest, bundle_ref, slot.shard);
                record.mark_dont_process();
                Ok(self.insert(record))
            }
        }
    }

    /// Claim a path for a file derived from a copied asset, e.g. a
    /// transcoder output. Returns `candidate` or the first free `_N` (or
    /// UUID) variant of it.
    pub fn reserve_path(&mut self, candidate: &Path) -> PathBuf {
        let mut path = candidate.to_path_buf();
        let file_name = candidate
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.unique_file_name(&mut path, &file_name);
        self.used_paths.insert(path.clone());
        path
    }

    /// Give up on a copied asset: the record is marked `dont_process`, its
    /// working copy is deleted and its bytes leave the shard accounting.
    pub async fn discard(&mut self, id: RecordId, allocator: &mut BundleAllocator) {
        let record = &mut self.records[id.0];
        record.mark_dont_process();
        if record.disk_path().as_os_str().is_empty() {
            return;
        }
        let path = record.disk_path().to_path_buf();
        let Ok(metadata) = tokio::fs::metadata(&path).await else {
            return;
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                allocator.uncommit(record.class(), record.shard(), metadata.len());
                debug!(reference = record.source_ref(), path = %path.display(), "discarded working copy");
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to remove discarded asset, it will be archived");
            }
        }
    }

    fn insert(&mut self, record: AssetRecord) -> RecordId {
        let (index, _) = self
            .records
            .insert_full(record.source_ref().to_string(), record);
        RecordId(index)
    }

    /// Sub path (empty or ending with `/`) and file name inside the shard
    fn destination_name(&mut self, parsed: &ParsedRef) -> (String, String) {
        let original = parsed.bundle_file_name();
        if self.settings.rewrite_references {
            let name = match parsed.extension() {
                Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
                None => Uuid::new_v4().to_string(),
            };
            return (String::new(), name);
        }

        let sub_path = match parsed.kind {
            RefKind::ExternalUrl => match parsed.url_origin_and_dir() {
                Some((origin, dir)) => {
                    let host_id = self
                        .host_ids
                        .entry(origin)
                        .or_insert_with(|| Uuid::new_v4().to_string());
                    format!("{host_id}{dir}")
                }
                None => String::new(),
            },
            RefKind::Relative => parsed.base_path.clone(),
            RefKind::LocalPath | RefKind::Protocol => String::new(),
        };
        (sanitize_sub_path(&sub_path), original)
    }

    /// Make `dest` unique among the files copied this run
    fn unique_file_name(&self, dest: &mut PathBuf, file_name: &str) -> String {
        if !self.used_paths.contains(dest.as_path()) {
            return file_name.to_string();
        }
        let (stem, ext) = match file_name.rsplit_once('.') {
            Some((stem, ext)) => (stem.to_string(), format!(".{ext}")),
            None => (file_name.to_string(), String::new()),
        };
        let mut counter = 1;
        loop {
            let candidate = if self.settings.rewrite_references {
                format!("{}{}", Uuid::new_v4(), ext.to_ascii_lowercase())
            } else {
                format!("{stem}_{counter}{ext}")
            };
            dest.set_file_name(&candidate);
            if !self.used_paths.contains(dest.as_path()) {
                return candidate;
            }
            counter += 1;
        }
    }
}

/// Loaded asset and the reference it was found under
fn lookup(
    reference: &str,
    class: AssetClass,
    assets: &dyn AssetSource,
) -> Result<(LoadedAsset, String), ResolveError> {
    if let Some(asset) = assets.lookup(reference) {
        return Ok((asset, reference.to_string()));
    }
    // textures converted by an earlier run may only be loaded as .crn
    if class.is_texture() && reference.to_ascii_lowercase().ends_with(".dds") {
        let crn = format!("{}.crn", &reference[..reference.len() - 4]);
        if let Some(asset) = assets.lookup(&crn) {
            debug!(reference, fallback = %crn, "using crn variant of texture");
            return Ok((asset, crn));
        }
    }
    Err(ResolveError::NotLoaded(reference.to_string()))
}

fn sanitize_sub_path(sub_path: &str) -> String {
    let mut clean: String = sub_path
        .split(&['/', '\\'][..])
        .filter(|seg| !seg.is_empty() && *seg != "." && *seg != "..")
        .map(|seg| seg.replace(' ', "_"))
        .collect::<Vec<_>>()
        .join("/");
    if !clean.is_empty() {
        clean.push('/');
    }
    clean
}

/// Copy without ever replacing an existing file
async fn copy_asset(source: &Path, dest: &Path) -> std::io::Result<u64> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut reader = tokio::fs::File::open(source).await?;
    let mut writer = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .await?;
    let bytes = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.flush().await?;
    Ok(bytes)
}
