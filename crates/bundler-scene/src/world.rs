//! In-memory scene and asset system
//!
//! `MemoryWorld` loads a JSON world description (scene entities plus the
//! assets they reference) and serves it through both [`SceneStore`] and
//! [`AssetSource`]. Every write is recorded with its scope so callers can
//! inspect what a run did.

use crate::error::SceneError;
use crate::model::{
    AttributeHandle, AttributeName, AttributeValue, ChangeScope, ComponentId, ComponentInfo,
    ComponentKind, EntityFlags, EntityId,
};
use crate::store::SceneStore;
use bundler_asset::{AssetSource, AssetType, DiskSource, LoadedAsset, PendingTransfer};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Serialized world
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldDescription {
    /// Entities and components
    pub scene: SceneDescription,
    /// Loaded assets
    #[serde(default)]
    pub assets: Vec<AssetDescription>,
    /// Transfers still in flight
    #[serde(default)]
    pub pending: Vec<PendingTransfer>,
    /// Base URL the scene was loaded from
    #[serde(default)]
    pub base_url: String,
}

/// Serialized scene
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    /// Scene name
    pub name: String,
    /// Entities in id order
    #[serde(default)]
    pub entities: Vec<EntityDescription>,
}

/// Serialized entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescription {
    /// Entity id
    pub id: EntityId,
    /// Entity flags
    #[serde(flatten)]
    pub flags: EntityFlags,
    /// Components on the entity
    #[serde(default)]
    pub components: Vec<ComponentDescription>,
}

/// Serialized component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescription {
    /// Component id
    pub id: ComponentId,
    /// Component kind
    pub kind: ComponentKind,
    /// Component flags
    #[serde(flatten)]
    pub flags: EntityFlags,
    /// Attribute values in insertion order
    #[serde(default)]
    pub attributes: IndexMap<AttributeName, AttributeValue>,
}

impl ComponentDescription {
    /// Component with no attributes and no flags
    pub fn new(id: u64, kind: ComponentKind) -> Self {
        Self {
            id: ComponentId(id),
            kind,
            flags: EntityFlags::default(),
            attributes: IndexMap::new(),
        }
    }

    /// Set an attribute
    #[must_use]
    pub fn with_attribute(mut self, name: AttributeName, value: AttributeValue) -> Self {
        self.attributes.insert(name, value);
        self
    }

    /// Replace the flags
    #[must_use]
    pub fn with_flags(mut self, flags: EntityFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// A loaded asset and where its bytes live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDescription {
    /// Reference the asset was loaded under
    pub reference: String,
    /// Asset type
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    /// File backing the asset, relative to the world file
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Generated at runtime, has no file
    #[serde(default)]
    pub programmatic: bool,
    /// Texture size, when known
    #[serde(default)]
    pub dimensions: Option<(u32, u32)>,
}

impl AssetDescription {
    /// File-backed asset
    pub fn file(reference: impl Into<String>, asset_type: AssetType, path: impl Into<PathBuf>) -> Self {
        Self {
            reference: reference.into(),
            asset_type,
            path: Some(path.into()),
            programmatic: false,
            dimensions: None,
        }
    }

    /// Set the texture size
    #[must_use]
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.dimensions = Some((width, height));
        self
    }
}

/// One mutation applied to the world
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneChange {
    /// Attribute write
    Write {
        /// Attribute written
        handle: AttributeHandle,
        /// Value written
        value: AttributeValue,
        /// How the write was applied
        scope: ChangeScope,
    },
    /// Entity removal
    RemoveEntity {
        /// Entity removed
        entity: EntityId,
        /// How the removal was applied
        scope: ChangeScope,
    },
}

/// Scene plus asset system held in memory
#[derive(Debug)]
pub struct MemoryWorld {
    state: RwLock<WorldDescription>,
    base_dir: PathBuf,
    changes: Mutex<Vec<SceneChange>>,
    forgotten: Mutex<Vec<String>>,
    forgotten_bundles: Mutex<Vec<String>>,
}

impl MemoryWorld {
    /// Empty world named `name`; asset paths resolve against `base_dir`
    pub fn new(name: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        let description = WorldDescription {
            scene: SceneDescription {
                name: name.into(),
                entities: Vec::new(),
            },
            ..WorldDescription::default()
        };
        Self::from_description(description, base_dir)
    }

    /// World from a parsed description
    pub fn from_description(description: WorldDescription, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            state: RwLock::new(description),
            base_dir: base_dir.into(),
            changes: Mutex::new(Vec::new()),
            forgotten: Mutex::new(Vec::new()),
            forgotten_bundles: Mutex::new(Vec::new()),
        }
    }

    /// Parse a world description
    pub fn from_json(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self, SceneError> {
        let description: WorldDescription = serde_json::from_str(text)?;
        Ok(Self::from_description(description, base_dir))
    }

    /// Load a world file. Asset paths are relative to the file's directory.
    pub async fn load(path: &Path) -> Result<Self, SceneError> {
        let text = tokio::fs::read_to_string(path).await?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_json(&text, base_dir)
    }

    /// Write the world as pretty JSON
    pub async fn save(&self, path: &Path) -> Result<(), SceneError> {
        let text = serde_json::to_string_pretty(&*self.state.read())?;
        tokio::fs::write(path, text).await?;
        Ok(())
    }

    /// Snapshot of the current world
    #[must_use]
    pub fn description(&self) -> WorldDescription {
        self.state.read().clone()
    }

    /// Replace the scene base URL
    pub fn set_base_url(&self, base_url: impl Into<String>) {
        self.state.write().base_url = base_url.into();
    }

    /// Add an empty entity
    pub fn add_entity(&self, id: u64, flags: EntityFlags) -> EntityId {
        let entity = EntityId(id);
        self.state.write().scene.entities.push(EntityDescription {
            id: entity,
            flags,
            components: Vec::new(),
        });
        entity
    }

    /// Add a component to an existing entity
    pub fn add_component(
        &self,
        entity: EntityId,
        component: ComponentDescription,
    ) -> Result<ComponentId, SceneError> {
        let mut state = self.state.write();
        let target = state
            .scene
            .entities
            .iter_mut()
            .find(|e| e.id == entity)
            .ok_or(SceneError::EntityMissing(entity))?;
        let id = component.id;
        target.components.push(component);
        Ok(id)
    }

    /// Register a loaded asset
    pub fn add_asset(&self, asset: AssetDescription) {
        self.state.write().assets.push(asset);
    }

    /// Replace the pending transfer list
    pub fn set_pending(&self, pending: Vec<PendingTransfer>) {
        self.state.write().pending = pending;
    }

    /// Mark a transfer as finished
    pub fn complete_transfer(&self, reference: &str) {
        self.state.write().pending.retain(|p| p.reference != reference);
    }

    /// Current value of an attribute, if it exists
    #[must_use]
    pub fn attribute(&self, handle: &AttributeHandle) -> Option<AttributeValue> {
        self.read(handle).ok()
    }

    /// Every change applied so far, in order
    #[must_use]
    pub fn changes(&self) -> Vec<SceneChange> {
        self.changes.lock().clone()
    }

    /// References dropped from the asset cache
    #[must_use]
    pub fn forgotten(&self) -> Vec<String> {
        self.forgotten.lock().clone()
    }

    /// Bundles dropped from the asset cache
    #[must_use]
    pub fn forgotten_bundles(&self) -> Vec<String> {
        self.forgotten_bundles.lock().clone()
    }

    fn with_component<R>(
        &self,
        handle: &AttributeHandle,
        f: impl FnOnce(&mut ComponentDescription) -> R,
    ) -> Result<R, SceneError> {
        let mut state = self.state.write();
        let component = state
            .scene
            .entities
            .iter_mut()
            .filter(|e| e.id == handle.entity)
            .flat_map(|e| e.components.iter_mut())
            .find(|c| c.id == handle.component)
            .ok_or(SceneError::AttributeMissing(*handle))?;
        Ok(f(component))
    }
}

impl SceneStore for MemoryWorld {
    fn scene_name(&self) -> String {
        self.state.read().scene.name.clone()
    }

    fn components(&self, kind: ComponentKind) -> Vec<ComponentInfo> {
        let state = self.state.read();
        state
            .scene
            .entities
            .iter()
            .flat_map(|entity| {
                entity
                    .components
                    .iter()
                    .filter(move |c| c.kind == kind)
                    .map(move |c| ComponentInfo {
                        entity: entity.id,
                        id: c.id,
                        kind: c.kind,
                        flags: c.flags,
                    })
            })
            .collect()
    }

    fn entities(&self) -> Vec<EntityId> {
        self.state.read().scene.entities.iter().map(|e| e.id).collect()
    }

    fn entity_flags(&self, entity: EntityId) -> Option<EntityFlags> {
        self.state
            .read()
            .scene
            .entities
            .iter()
            .find(|e| e.id == entity)
            .map(|e| e.flags)
    }

    fn has_component(&self, entity: EntityId, kind: ComponentKind) -> bool {
        self.state
            .read()
            .scene
            .entities
            .iter()
            .filter(|e| e.id == entity)
            .any(|e| e.components.iter().any(|c| c.kind == kind))
    }

    fn component_count(&self, entity: EntityId) -> usize {
        self.state
            .read()
            .scene
            .entities
            .iter()
            .find(|e| e.id == entity)
            .map_or(0, |e| e.components.len())
    }

    fn read(&self, handle: &AttributeHandle) -> Result<AttributeValue, SceneError> {
        let state = self.state.read();
        state
            .scene
            .entities
            .iter()
            .filter(|e| e.id == handle.entity)
            .flat_map(|e| e.components.iter())
            .find(|c| c.id == handle.component)
            .and_then(|c| c.attributes.get(&handle.attribute).cloned())
            .ok_or(SceneError::AttributeMissing(*handle))
    }

    fn write(
        &self,
        handle: &AttributeHandle,
        value: AttributeValue,
        scope: ChangeScope,
    ) -> Result<(), SceneError> {
        let stored = value.clone();
        let updated = self.with_component(handle, |component| {
            match component.attributes.get_mut(&handle.attribute) {
                Some(slot) => {
                    *slot = stored;
                    true
                }
                None => false,
            }
        })?;
        if !updated {
            return Err(SceneError::AttributeMissing(*handle));
        }

        debug!(attribute = %handle, ?scope, "attribute written");
        self.changes.lock().push(SceneChange::Write {
            handle: *handle,
            value,
            scope,
        });
        Ok(())
    }

    fn remove_entity(&self, entity: EntityId, scope: ChangeScope) -> Result<(), SceneError> {
        {
            let mut state = self.state.write();
            let before = state.scene.entities.len();
            state.scene.entities.retain(|e| e.id != entity);
            if state.scene.entities.len() == before {
                return Err(SceneError::EntityMissing(entity));
            }
        }
        self.changes
            .lock()
            .push(SceneChange::RemoveEntity { entity, scope });
        Ok(())
    }

    fn snapshot(&self) -> Result<String, SceneError> {
        Ok(serde_json::to_string_pretty(&self.state.read().scene)?)
    }
}

impl AssetSource for MemoryWorld {
    fn lookup(&self, reference: &str) -> Option<LoadedAsset> {
        let state = self.state.read();
        let asset = state.assets.iter().find(|a| a.reference == reference)?;
        let disk_source = if asset.programmatic {
            DiskSource::Programmatic
        } else {
            match &asset.path {
                Some(path) => DiskSource::File(self.base_dir.join(path)),
                None => DiskSource::None,
            }
        };
        Some(LoadedAsset {
            name: asset.reference.clone(),
            asset_type: asset.asset_type,
            disk_source,
        })
    }

    fn texture_dimensions(&self, reference: &str) -> Option<(u32, u32)> {
        self.state
            .read()
            .assets
            .iter()
            .find(|a| a.reference == reference)
            .and_then(|a| a.dimensions)
    }

    fn pending_transfers(&self) -> Vec<PendingTransfer> {
        self.state.read().pending.clone()
    }

    fn forget(&self, reference: &str) {
        self.forgotten.lock().push(reference.to_string());
    }

    fn forget_bundle(&self, reference: &str) {
        self.forgotten_bundles.lock().push(reference.to_string());
    }

    fn default_base_url(&self) -> String {
        self.state.read().base_url.clone()
    }
}
