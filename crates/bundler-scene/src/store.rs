//! Scene collaborator trait

use crate::error::SceneError;
use crate::model::{
    AttributeHandle, AttributeValue, ChangeScope, ComponentInfo, ComponentKind, EntityFlags,
    EntityId,
};

/// Read/write view of the live scene
pub trait SceneStore: Send + Sync {
    /// Name of the scene, used for the snapshot file
    fn scene_name(&self) -> String;

    /// Every component of `kind`, in scene order
    fn components(&self, kind: ComponentKind) -> Vec<ComponentInfo>;

    /// Every entity, in scene order
    fn entities(&self) -> Vec<EntityId>;

    /// Flags of an entity, `None` if it does not exist
    fn entity_flags(&self, entity: EntityId) -> Option<EntityFlags>;

    /// Whether the entity has at least one component of `kind`
    fn has_component(&self, entity: EntityId, kind: ComponentKind) -> bool;

    /// Number of components on an entity
    fn component_count(&self, entity: EntityId) -> usize;

    /// Current value of an attribute
    fn read(&self, handle: &AttributeHandle) -> Result<AttributeValue, SceneError>;

    /// Set an attribute, either locally or replicated
    fn write(
        &self,
        handle: &AttributeHandle,
        value: AttributeValue,
        scope: ChangeScope,
    ) -> Result<(), SceneError>;

    /// Remove an entity with all its components
    fn remove_entity(&self, entity: EntityId, scope: ChangeScope) -> Result<(), SceneError>;

    /// Serialized scene, saved next to the bundles for inspection
    fn snapshot(&self) -> Result<String, SceneError>;
}
