//! Bundler configuration
//!
//! `PackagerConfig` is what users edit and what is persisted as TOML.
//! [`PackagerConfig::validate`] turns it into [`RunSettings`], the resolved
//! values a run works with. Out of range texture values are clamped rather
//! than rejected.

use crate::error::ConfigError;
use bundler_asset::{AssetType, IdentitySettings};
use bundler_tools::{Compression, MipmapMode, RescaleMode, TextureSettings, TEXTURE_TOOL_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Maximum texture sizes selectable by index; index 0 disables clamping
pub const MAX_TEXTURE_SIZES: [u32; 9] = [0, 4096, 2048, 1024, 512, 256, 128, 64, 32];

/// Default config file name
pub const CONFIG_FILE_NAME: &str = "bundler.toml";

const MIB: u64 = 1024 * 1024;

/// What gets bundled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncludeConfig {
    pub meshes: bool,
    pub materials: bool,
    pub generated_materials: bool,
    /// Entities with a script component
    pub script_entities: bool,
    /// Entities owned by the content tool
    pub content_tool_entities: bool,
}

impl Default for IncludeConfig {
    fn default() -> Self {
        Self {
            meshes: true,
            materials: true,
            generated_materials: true,
            script_entities: false,
            content_tool_entities: false,
        }
    }
}

/// Texture processing options as configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureConfig {
    pub process: bool,
    /// Target format such as `crn` or `dds`; empty keeps the source format
    pub format: String,
    /// Index into [`MAX_TEXTURE_SIZES`]
    pub max_size_index: usize,
    pub rescale: RescaleMode,
    pub quality: i64,
    pub mipmaps: MipmapMode,
    pub max_mipmaps: i64,
    pub tool: PathBuf,
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            process: false,
            format: String::new(),
            max_size_index: 0,
            rescale: RescaleMode::Off,
            quality: 255,
            mipmaps: MipmapMode::UseSource,
            max_mipmaps: 16,
            tool: PathBuf::from("crunch"),
        }
    }
}

impl TextureConfig {
    /// Clamp size in pixels; unknown indices disable clamping
    #[must_use]
    pub fn max_size(&self) -> u32 {
        MAX_TEXTURE_SIZES
            .get(self.max_size_index)
            .copied()
            .unwrap_or(0)
    }

    /// Quality in `0..=255`. Values below 1 become 0.
    #[must_use]
    pub fn clamped_quality(&self) -> u32 {
        if self.quality < 1 {
            0
        } else {
            u32::try_from(self.quality.min(255)).unwrap_or(255)
        }
    }

    /// Mipmap level limit in `1..=16`
    #[must_use]
    pub fn clamped_max_mipmaps(&self) -> u32 {
        u32::try_from(self.max_mipmaps.clamp(1, 16)).unwrap_or(16)
    }

    /// Lowercase target format without a leading dot
    #[must_use]
    pub fn target_format(&self) -> Option<String> {
        let format = self.format.trim().trim_start_matches('.').to_ascii_lowercase();
        (!format.is_empty()).then_some(format)
    }
}

/// Persisted bundler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagerConfig {
    /// Output directory for shard folders, archives and logs
    pub working_dir: PathBuf,
    /// Archive name prefix, `town` gives `town-models-1.zip`
    pub bundle_prefix: String,
    /// Shard size threshold in MiB
    pub split_size_mb: u64,
    pub include: IncludeConfig,
    pub remove_empty_entities: bool,
    /// Give copied files fresh UUID names
    pub rewrite_references: bool,
    /// Verbose per-asset logging
    pub debug: bool,
    pub texture: TextureConfig,
    /// 7z compatible archive tool
    pub archive_tool: PathBuf,
    /// Concurrent archive jobs
    pub archive_workers: usize,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::new(),
            bundle_prefix: String::new(),
            split_size_mb: 10,
            include: IncludeConfig::default(),
            remove_empty_entities: true,
            rewrite_references: false,
            debug: false,
            texture: TextureConfig::default(),
            archive_tool: PathBuf::from("7za"),
            archive_workers: 1,
        }
    }
}

impl PackagerConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load a config file
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&text)
    }

    /// Save the config, creating parent directories as needed
    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.to_toml()?).await?;
        Ok(())
    }

    /// Resolve the config for a run against the scene object reported by
    /// storage and the base URL of the default asset storage.
    pub fn validate(&self, scene_ref: &str, base_url: &str) -> Result<RunSettings, ConfigError> {
        if self.working_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingWorkingDir);
        }
        let scene_ref = scene_ref.trim();
        if scene_ref.is_empty() {
            return Err(ConfigError::MissingSceneRef);
        }
        if !scene_ref.contains(".txml") {
            return Err(ConfigError::NotASceneRef(scene_ref.to_string()));
        }
        if self.split_size_mb == 0 {
            return Err(ConfigError::InvalidSplitSize);
        }
        if base_url.trim().is_empty() {
            return Err(ConfigError::MissingBaseUrl);
        }
        if self.bundle_prefix.trim().to_ascii_lowercase().ends_with(".zip") {
            warn!(prefix = %self.bundle_prefix, "bundle prefix ends with .zip, cleaning it out");
        }

        let identity = IdentitySettings::new(&self.working_dir)
            .with_bundle_prefix(&self.bundle_prefix)
            .with_base_url(base_url)
            .with_rewrite_references(self.rewrite_references);

        let texture = TextureSettings {
            process: self.texture.process,
            format: self.texture.target_format(),
            max_size: self.texture.max_size(),
            rescale: self.texture.rescale,
            quality: self.texture.clamped_quality(),
            mipmaps: self.texture.mipmaps,
            max_mipmaps: self.texture.clamped_max_mipmaps(),
            tool: self.texture.tool.clone(),
            working_dir: self.working_dir.clone(),
            debug_output: self.debug,
            timeout: TEXTURE_TOOL_TIMEOUT,
        };

        Ok(RunSettings {
            identity,
            scene_ref: scene_ref.to_string(),
            split_size: self.split_size_mb.saturating_mul(MIB),
            include: self.include,
            remove_empty_entities: self.remove_empty_entities,
            debug: self.debug,
            texture,
            archive_tool: self.archive_tool.clone(),
            archive_workers: self.archive_workers.max(1),
        })
    }
}

/// Resolved settings of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub identity: IdentitySettings,
    /// Storage path of the scene object
    pub scene_ref: String,
    /// Shard threshold in bytes
    pub split_size: u64,
    pub include: IncludeConfig,
    pub remove_empty_entities: bool,
    pub debug: bool,
    pub texture: TextureSettings,
    pub archive_tool: PathBuf,
    pub archive_workers: usize,
}

impl RunSettings {
    #[inline]
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.identity.working_dir
    }

    /// Texture shards holding CRN files gain nothing from heavier
    /// compression, so they use the fastest level.
    #[must_use]
    pub fn texture_compression(&self) -> Compression {
        if self.texture.process && self.texture.format.as_deref() == Some("crn") {
            Compression::Fastest
        } else {
            Compression::Normal
        }
    }

    /// Whether an in-flight transfer of `asset_type` must finish before
    /// processing can start
    #[must_use]
    pub fn waits_for(&self, asset_type: AssetType) -> bool {
        match asset_type {
            AssetType::Mesh => self.include.meshes,
            AssetType::Material | AssetType::Texture => {
                self.include.materials || self.include.generated_materials
            }
            AssetType::Other => false,
        }
    }

    /// Where the rewritten scene is saved for inspection
    #[must_use]
    pub fn snapshot_file(&self) -> PathBuf {
        let name = self
            .scene_ref
            .rsplit(&['/', '\\'][..])
            .next()
            .unwrap_or_default();
        let mut name = if name.is_empty() {
            "bundled-output-scene".to_string()
        } else {
            name.to_string()
        };
        if !name.to_ascii_lowercase().ends_with(".txml") {
            name.push_str(".txml");
        }
        self.working_dir().join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> PackagerConfig {
        PackagerConfig {
            working_dir: PathBuf::from("/tmp/bundles"),
            bundle_prefix: "town.zip".to_string(),
            ..PackagerConfig::default()
        }
    }

    #[test]
    fn quality_below_one_becomes_zero() {
        let mut texture = TextureConfig::default();
        for (input, expected) in [(-5, 0), (0, 0), (1, 1), (128, 128), (255, 255), (900, 255)] {
            texture.quality = input;
            assert_eq!(texture.clamped_quality(), expected, "quality {input}");
        }
    }

    #[test]
    fn max_mipmaps_are_clamped() {
        let mut texture = TextureConfig::default();
        texture.max_mipmaps = 0;
        assert_eq!(texture.clamped_max_mipmaps(), 1);
        texture.max_mipmaps = 40;
        assert_eq!(texture.clamped_max_mipmaps(), 16);
    }

    #[test]
    fn max_size_table() {
        let mut texture = TextureConfig::default();
        let sizes: Vec<u32> = (0..10)
            .map(|i| {
                texture.max_size_index = i;
                texture.max_size()
            })
            .collect();
        assert_eq!(sizes, vec![0, 4096, 2048, 1024, 512, 256, 128, 64, 32, 0]);
    }

    #[test]
    fn validate_resolves_names_and_sizes() {
        let settings = config()
            .validate("scenes/town.txml", "https://storage.example.com/town")
            .unwrap();
        assert_eq!(settings.identity.bundle_prefix, "town-");
        assert_eq!(settings.identity.base_url, "https://storage.example.com/town/");
        assert_eq!(settings.split_size, 10 * 1024 * 1024);
        assert_eq!(settings.snapshot_file(), PathBuf::from("/tmp/bundles/town.txml"));
        assert_eq!(settings.texture.working_dir, PathBuf::from("/tmp/bundles"));
    }

    #[test]
    fn validate_rejects_bad_input() {
        let base = "https://storage.example.com/";
        assert!(matches!(
            config().validate("scenes/town.xml", base),
            Err(ConfigError::NotASceneRef(_))
        ));
        assert!(matches!(
            config().validate("", base),
            Err(ConfigError::MissingSceneRef)
        ));
        assert!(matches!(
            config().validate("town.txml", ""),
            Err(ConfigError::MissingBaseUrl)
        ));
        let mut zero = config();
        zero.split_size_mb = 0;
        assert!(matches!(
            zero.validate("town.txml", base),
            Err(ConfigError::InvalidSplitSize)
        ));
        let mut no_dir = config();
        no_dir.working_dir = PathBuf::new();
        assert!(matches!(
            no_dir.validate("town.txml", base),
            Err(ConfigError::MissingWorkingDir)
        ));
    }

    #[test]
    fn crn_textures_use_fastest_compression() {
        let mut cfg = config();
        cfg.texture.process = true;
        cfg.texture.format = " CRN ".to_string();
        let settings = cfg.validate("town.txml", "http://s/").unwrap();
        assert_eq!(settings.texture.format.as_deref(), Some("crn"));
        assert_eq!(settings.texture_compression(), Compression::Fastest);

        cfg.texture.format = "dds".to_string();
        let settings = cfg.validate("town.txml", "http://s/").unwrap();
        assert_eq!(settings.texture_compression(), Compression::Normal);
    }

    #[test]
    fn toml_round_trip_keeps_values() {
        let mut cfg = config();
        cfg.texture.rescale = RescaleMode::Hi;
        cfg.texture.mipmaps = MipmapMode::Generate;
        cfg.include.script_entities = true;
        let text = cfg.to_toml().unwrap();
        assert_eq!(PackagerConfig::from_toml(&text).unwrap(), cfg);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let cfg = PackagerConfig::from_toml("working_dir = \"/out\"\n[texture]\nprocess = true\n")
            .unwrap();
        assert_eq!(cfg.working_dir, PathBuf::from("/out"));
        assert!(cfg.texture.process);
        assert_eq!(cfg.texture.quality, 255);
        assert_eq!(cfg.split_size_mb, 10);
        assert!(cfg.include.meshes);
    }

    #[test]
    fn waits_only_for_processed_types() {
        let mut cfg = config();
        cfg.include.materials = false;
        cfg.include.generated_materials = false;
        let settings = cfg.validate("town.txml", "http://s/").unwrap();
        assert!(settings.waits_for(AssetType::Mesh));
        assert!(!settings.waits_for(AssetType::Texture));
        assert!(!settings.waits_for(AssetType::Other));
    }
}
