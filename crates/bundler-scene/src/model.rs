//! Component and attribute model
//!
//! The pipeline understands a closed set of component kinds and attributes.
//! Hosts map their own component types onto these once, when they build
//! the [`SceneStore`](crate::SceneStore) view.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scene entity identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Component identifier, unique within its entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentId(pub u64);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Component kinds the pipeline reads or filters on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Display name
    Name,
    /// Carries `meshRef` and `materialRefs`
    Mesh,
    /// Generated material: `outputMat`, `inputMat`, `parameters`
    Material,
    /// Scripted entities are skipped unless opted in
    Script,
    /// Entities owned by the content tool
    ContentToolMarker,
}

/// Attributes the pipeline rewrites
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttributeName {
    /// Mesh reference of a mesh component
    #[serde(rename = "meshRef")]
    MeshRef,
    /// Material references of a mesh component
    #[serde(rename = "materialRefs")]
    MaterialRefs,
    /// Output material of a generated material
    #[serde(rename = "outputMat")]
    OutputMat,
    /// Input material of a generated material
    #[serde(rename = "inputMat")]
    InputMat,
    /// Parameter list of a generated material
    #[serde(rename = "parameters")]
    Parameters,
}

impl AttributeName {
    /// Attribute name as stored in the scene
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            AttributeName::MeshRef => "meshRef",
            AttributeName::MaterialRefs => "materialRefs",
            AttributeName::OutputMat => "outputMat",
            AttributeName::InputMat => "inputMat",
            AttributeName::Parameters => "parameters",
        }
    }
}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of one attribute in the scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttributeHandle {
    /// Owning entity
    pub entity: EntityId,
    /// Component on the entity
    pub component: ComponentId,
    /// Attribute on the component
    pub attribute: AttributeName,
}

impl AttributeHandle {
    /// Handle from its parts
    #[must_use]
    pub const fn new(entity: EntityId, component: ComponentId, attribute: AttributeName) -> Self {
        Self {
            entity,
            component,
            attribute,
        }
    }
}

impl fmt::Display for AttributeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.entity, self.component, self.attribute)
    }
}

/// Typed attribute value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValue {
    /// Single asset reference
    AssetRef(String),
    /// List of asset references
    AssetRefList(Vec<String>),
    /// Plain string
    String(String),
    /// List of plain strings
    StringList(Vec<String>),
}

impl AttributeValue {
    /// Text form as shown to users; lists are joined with `;`
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            AttributeValue::AssetRef(s) | AttributeValue::String(s) => s.clone(),
            AttributeValue::AssetRefList(items) | AttributeValue::StringList(items) => {
                items.join(";")
            }
        }
    }

    /// Parse text into a value of the same shape as `self`
    #[must_use]
    pub fn parse_like(&self, text: &str) -> Self {
        let split = || -> Vec<String> {
            if text.is_empty() {
                Vec::new()
            } else {
                text.split(';').map(str::to_string).collect()
            }
        };
        match self {
            AttributeValue::AssetRef(_) => AttributeValue::AssetRef(text.to_string()),
            AttributeValue::String(_) => AttributeValue::String(text.to_string()),
            AttributeValue::AssetRefList(_) => AttributeValue::AssetRefList(split()),
            AttributeValue::StringList(_) => AttributeValue::StringList(split()),
        }
    }

    /// Text of a single-valued attribute
    #[must_use]
    pub fn as_single(&self) -> Option<&str> {
        match self {
            AttributeValue::AssetRef(s) | AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Items of a list-valued attribute
    #[must_use]
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            AttributeValue::AssetRefList(items) | AttributeValue::StringList(items) => Some(items),
            _ => None,
        }
    }
}

/// Entity and component flags that exclude them from processing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFlags {
    /// Not saved with the scene
    #[serde(default)]
    pub temporary: bool,
    /// Not replicated to peers
    #[serde(default)]
    pub local: bool,
}

impl EntityFlags {
    /// True when either flag is set
    #[inline]
    #[must_use]
    pub fn is_excluded(&self) -> bool {
        self.temporary || self.local
    }
}

/// Component as enumerated by the scene
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentInfo {
    /// Owning entity
    pub entity: EntityId,
    /// Component id
    pub id: ComponentId,
    /// Component kind
    pub kind: ComponentKind,
    /// Component flags
    pub flags: EntityFlags,
}

impl ComponentInfo {
    /// Handle of `attribute` on this component
    #[must_use]
    pub fn handle(&self, attribute: AttributeName) -> AttributeHandle {
        AttributeHandle::new(self.entity, self.id, attribute)
    }
}

/// Whether a write is applied locally only or replicated to peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeScope {
    /// Applied to the local scene only
    Disconnected,
    /// Applied and sent to peers
    Replicate,
}
